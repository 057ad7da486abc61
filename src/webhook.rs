//! GitHub push webhook handling
//!
//! Verifies the delivery signature and turns the pushed commits into one
//! change set for reconciliation.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::reconcile::ChangeSet;

pub const SIGNATURE_256_HEADER: &str = "X-Hub-Signature-256";
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

/// Check a delivery against the shared secret. The `sha256=` header is
/// preferred; the legacy `sha1=` header is accepted when it is the only one.
pub fn verify_signature(
    secret: Option<&str>,
    body: &[u8],
    signature_256: Option<&str>,
    signature_1: Option<&str>,
) -> Result<()> {
    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Signature("no webhook secret configured".to_string()))?;

    if let Some(header) = signature_256 {
        let digest = decode_digest(header, "sha256=")?;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|e| Error::Signature(e.to_string()))?;
        mac.update(body);
        return mac
            .verify_slice(&digest)
            .map_err(|_| Error::Signature("sha256 signature mismatch".to_string()));
    }

    if let Some(header) = signature_1 {
        let digest = decode_digest(header, "sha1=")?;
        let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes())
            .map_err(|e| Error::Signature(e.to_string()))?;
        mac.update(body);
        return mac
            .verify_slice(&digest)
            .map_err(|_| Error::Signature("sha1 signature mismatch".to_string()));
    }

    Err(Error::Signature("missing signature header".to_string()))
}

fn decode_digest(header: &str, prefix: &str) -> Result<Vec<u8>> {
    let hex_digest = header
        .trim()
        .strip_prefix(prefix)
        .ok_or_else(|| Error::Signature(format!("signature must start with '{prefix}'")))?;
    hex::decode(hex_digest).map_err(|e| Error::Signature(format!("malformed signature: {e}")))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushCommit {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushRepository {
    pub full_name: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// The parts of a push payload reconciliation cares about
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref", default)]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub repository: Option<PushRepository>,
    #[serde(default)]
    pub commits: Vec<PushCommit>,
    #[serde(default)]
    pub head_commit: Option<PushCommit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Added,
    Modified,
    Removed,
}

impl PushEvent {
    pub fn parse(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn repository_name(&self) -> Option<&str> {
        self.repository.as_ref().map(|r| r.full_name.as_str())
    }

    /// Branch name of a `refs/heads/...` push
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.as_deref()?.strip_prefix("refs/heads/")
    }

    /// Whether the push targets the repository's default branch. Unknown
    /// when either side is missing, which counts as a match.
    pub fn targets_default_branch(&self) -> bool {
        let default = self
            .repository
            .as_ref()
            .and_then(|r| r.default_branch.as_deref());
        match (self.branch(), default) {
            (Some(branch), Some(default)) => branch == default,
            _ => true,
        }
    }

    /// Union of the commits' path lists. Commits apply in order and a
    /// path's last action wins, so adding then removing a file is a removal.
    pub fn change_set(&self) -> ChangeSet {
        let commits: Vec<&PushCommit> = if self.commits.is_empty() {
            self.head_commit.iter().collect()
        } else {
            self.commits.iter().collect()
        };

        let mut actions: BTreeMap<&str, Action> = BTreeMap::new();
        for commit in commits {
            for path in &commit.added {
                actions.insert(path, Action::Added);
            }
            for path in &commit.modified {
                actions.insert(path, Action::Modified);
            }
            for path in &commit.removed {
                actions.insert(path, Action::Removed);
            }
        }

        let mut changes = ChangeSet::default();
        for (path, action) in actions {
            let bucket = match action {
                Action::Added => &mut changes.added,
                Action::Modified => &mut changes.modified,
                Action::Removed => &mut changes.removed,
            };
            bucket.push(path.to_string());
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sign_256(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn sign_1(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_signature_verification() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let good = sign_256("s3cret", body);
        assert!(verify_signature(Some("s3cret"), body, Some(&good), None).is_ok());
        assert!(verify_signature(Some("other"), body, Some(&good), None).is_err());
        assert!(verify_signature(Some("s3cret"), b"tampered", Some(&good), None).is_err());

        let legacy = sign_1("s3cret", body);
        assert!(verify_signature(Some("s3cret"), body, None, Some(&legacy)).is_ok());
    }

    #[test]
    fn test_signature_rejections() {
        let body = b"{}";
        let good = sign_256("s3cret", body);
        assert!(matches!(
            verify_signature(None, body, Some(&good), None),
            Err(Error::Signature(_))
        ));
        assert!(verify_signature(Some("s3cret"), body, None, None).is_err());
        assert!(verify_signature(Some("s3cret"), body, Some("md5=abcd"), None).is_err());
        assert!(verify_signature(Some("s3cret"), body, Some("sha256=zz"), None).is_err());
    }

    #[test]
    fn test_change_set_last_action_wins() {
        let payload = json!({
            "ref": "refs/heads/main",
            "repository": {"full_name": "acme/widgets", "default_branch": "main"},
            "commits": [
                {"id": "1", "added": ["new.py", "tmp.py"], "modified": ["a.py"], "removed": []},
                {"id": "2", "added": ["gone.py"], "modified": ["new.py"], "removed": ["tmp.py", "old.py"]},
                {"id": "3", "added": [], "modified": [], "removed": ["gone.py"]}
            ]
        });
        let event = PushEvent::parse(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.repository_name(), Some("acme/widgets"));
        assert_eq!(event.branch(), Some("main"));
        assert!(event.targets_default_branch());

        let changes = event.change_set();
        assert!(changes.added.is_empty());
        assert_eq!(changes.modified, vec!["a.py", "new.py"]);
        assert_eq!(changes.removed, vec!["gone.py", "old.py", "tmp.py"]);
    }

    #[test]
    fn test_head_commit_fallback_and_branch_mismatch() {
        let payload = json!({
            "ref": "refs/heads/feature",
            "repository": {"full_name": "acme/widgets", "default_branch": "main"},
            "head_commit": {"added": ["x.py"], "modified": [], "removed": []}
        });
        let event = PushEvent::parse(payload.to_string().as_bytes()).unwrap();
        assert!(!event.targets_default_branch());
        assert_eq!(event.change_set().added, vec!["x.py"]);
    }
}
