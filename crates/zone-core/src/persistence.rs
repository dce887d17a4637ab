//! JSON file storage shared by the zone registry and the activity engine

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::fs;

/// Load a JSON document; a missing or broken file gives the default
///
/// `what` only names the document in log lines.
pub async fn load_json<T>(path: &Path, what: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {} stored at {:?}, using defaults", what, path);
            return T::default();
        }
        Err(e) => {
            tracing::warn!("Cannot read {} from {:?}: {}", what, path, e);
            return T::default();
        }
    };

    serde_json::from_str(&contents).unwrap_or_else(|e| {
        tracing::warn!("Ignoring unparsable {} in {:?}: {}", what, path, e);
        T::default()
    })
}

/// Write a JSON document through a sibling temp file
///
/// Readers only ever see the old or the new document.
#[allow(clippy::missing_errors_doc)]
pub async fn save_json<T>(path: &Path, value: &T, what: &str) -> Result<(), std::io::Error>
where
    T: Serialize + ?Sized,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let staging = path.with_extension("json.tmp");
    fs::write(&staging, json).await?;
    fs::rename(&staging, path).await?;

    tracing::debug!("Stored {} at {:?}", what, path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_missing_and_corrupt_files_load_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.json");

        let loaded: Vec<String> = load_json(&path, "zones").await;
        assert!(loaded.is_empty());

        fs::write(&path, "{ not json").await.unwrap();
        let loaded: Vec<String> = load_json(&path, "zones").await;
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_save_creates_parent_and_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("flags.json");
        let value = BTreeMap::from([("kitchen".to_string(), true)]);

        save_json(&path, &value, "flags").await.unwrap();

        let loaded: BTreeMap<String, bool> = load_json(&path, "flags").await;
        assert_eq!(loaded, value);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
