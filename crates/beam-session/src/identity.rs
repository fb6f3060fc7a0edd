use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SessionError;

#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    #[serde(rename = "deviceID")]
    device_id: String,
}

/// The stable deviceID advertised over discovery. Persisted across runs in
/// the per-user data directory; created on first launch. Nothing else is
/// persisted.
pub fn load_or_create_device_id() -> Result<String, SessionError> {
    let dirs = directories::ProjectDirs::from("dev", "beam", "beam")
        .ok_or_else(|| SessionError::Identity("no home directory".into()))?;
    load_or_create_in(dirs.data_dir())
}

/// Store-location-explicit variant.
pub fn load_or_create_in(dir: &Path) -> Result<String, SessionError> {
    let path = identity_path(dir);
    if let Ok(bytes) = fs::read(&path) {
        if let Ok(stored) = serde_json::from_slice::<StoredIdentity>(&bytes) {
            if !stored.device_id.is_empty() {
                return Ok(stored.device_id);
            }
        }
    }

    let device_id = uuid::Uuid::new_v4().to_string();
    fs::create_dir_all(dir)
        .map_err(|e| SessionError::Identity(format!("create {}: {e}", dir.display())))?;
    let stored = StoredIdentity {
        device_id: device_id.clone(),
    };
    fs::write(&path, serde_json::to_vec_pretty(&stored).expect("identity serializes"))
        .map_err(|e| SessionError::Identity(format!("write {}: {e}", path.display())))?;
    info!(%device_id, "created device identity");
    Ok(device_id)
}

fn identity_path(dir: &Path) -> PathBuf {
    dir.join("identity.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "beam-identity-test-{tag}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn identity_is_stable_across_loads() {
        let dir = temp_dir("stable");
        let first = load_or_create_in(&dir).unwrap();
        let second = load_or_create_in(&dir).unwrap();
        assert_eq!(first, second);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn identity_is_a_uuid() {
        let dir = temp_dir("uuid");
        let id = load_or_create_in(&dir).unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_store_is_replaced() {
        let dir = temp_dir("corrupt");
        fs::create_dir_all(&dir).unwrap();
        fs::write(identity_path(&dir), b"not json").unwrap();
        let id = load_or_create_in(&dir).unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        // And the replacement persists.
        assert_eq!(load_or_create_in(&dir).unwrap(), id);
        let _ = fs::remove_dir_all(&dir);
    }
}
