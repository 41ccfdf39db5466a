//! Stable device identity.
//!
//! The identifier is generated once (UUID v4) when neither configuration
//! nor the persisted state supplies one, and written synchronously so a
//! crash right after first start cannot lose it.

use uuid::Uuid;

use crate::store::{Durability, Store, DEVICE_ID_KEY};

/// Resolve the device identifier.
///
/// Precedence: explicitly configured id, then the persisted id, then a
/// freshly generated one. Whatever wins is persisted synchronously under
/// the identity key.
pub fn load_or_create(store: &mut Store, configured: Option<&str>) -> String {
    if let Some(id) = configured {
        if !id.is_empty() {
            let persisted = stored_id(store);
            if persisted.as_deref() != Some(id) {
                store.set(DEVICE_ID_KEY, id.into(), Durability::Sync);
            }
            return id.to_string();
        }
    }

    if let Some(id) = stored_id(store) {
        return id;
    }

    let id = Uuid::new_v4().to_string();
    tracing::info!(device_id = %id, "generated new device identifier");
    store.set(DEVICE_ID_KEY, id.clone().into(), Durability::Sync);
    id
}

/// Persist a replacement identifier (device-id change).
pub fn set(store: &mut Store, id: &str) {
    store.set(DEVICE_ID_KEY, id.into(), Durability::Sync);
}

fn stored_id(store: &Store) -> Option<String> {
    store
        .get(DEVICE_ID_KEY)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generated_id_is_stable_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut store = Store::open(&path);
        let id = load_or_create(&mut store, None);
        assert!(!id.is_empty());
        drop(store);

        let mut store = Store::open(&path);
        let again = load_or_create(&mut store, None);
        assert_eq!(id, again);
    }

    #[test]
    fn test_configured_id_wins_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut store = Store::open(&path);
        let id = load_or_create(&mut store, Some("build-server-7"));
        assert_eq!(id, "build-server-7");
        drop(store);

        let mut store = Store::open(&path);
        assert_eq!(load_or_create(&mut store, None), "build-server-7");
    }

    #[test]
    fn test_empty_configured_id_ignored() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path().join("state.json"));
        let id = load_or_create(&mut store, Some(""));
        assert!(!id.is_empty());
    }

    #[test]
    fn test_set_replaces_identity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut store = Store::open(&path);
        load_or_create(&mut store, None);
        set(&mut store, "merged-device");
        drop(store);

        let mut store = Store::open(&path);
        assert_eq!(load_or_create(&mut store, None), "merged-device");
    }
}
