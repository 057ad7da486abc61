//! CLI commands implementation

pub mod init;
pub mod inspect;
pub mod jobs;
pub mod repo;
pub mod status;

pub use init::*;
pub use inspect::*;
pub use jobs::*;
pub use repo::*;
pub use status::*;
