//! Init command implementation

use std::path::PathBuf;

use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::MetaDb;

/// Write a default config and create the metadata database
pub async fn cmd_init(base_dir: PathBuf, config_path: PathBuf, force: bool) -> Result<Config> {
    if config_path.exists() && !force {
        return Err(Error::AlreadyInitialized(config_path.display().to_string()));
    }

    let mut config = Config::default();
    config.init_paths(Some(base_dir));
    config.paths.config_file = config_path;
    config.validate()?;
    config.save()?;

    let db = MetaDb::connect(&config).await?;
    db.init_schema().await?;
    info!("Created database at {:?}", config.paths.db_file);

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_writes_config_and_database() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().to_path_buf();
        let config_path = base.join("config.toml");

        let config = cmd_init(base.clone(), config_path.clone(), false)
            .await
            .unwrap();
        assert!(config.is_initialized());

        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(loaded.collection_name, config.collection_name);
        assert!(MetaDb::connect(&loaded).await.unwrap().is_initialized().await.unwrap());

        assert!(matches!(
            cmd_init(base.clone(), config_path.clone(), false).await,
            Err(Error::AlreadyInitialized(_))
        ));
        assert!(cmd_init(base, config_path, true).await.is_ok());
    }
}
