use std::path::Path;

use serde::Serialize;
use tokio::fs;

use crate::error::StoreError;

/// Writes `value` to `path` atomically: serialize to `<path>.tmp`, then
/// `rename` over the target. Generalizes
/// `ai_miner::storage::StorageManager::save`'s direct (non-atomic)
/// `fs::write`, since spec.md §4.7 explicitly requires atomic per-file
/// writes.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| StoreError::serde(path.display().to_string(), e))?;
    write_bytes(path, &body).await
}

/// Same durability guarantee as [`write_json`], for plain text (`state.md`).
pub async fn write_text(path: &Path, value: &str) -> Result<(), StoreError> {
    write_bytes(path, value.as_bytes()).await
}

async fn write_bytes(path: &Path, body: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent.display().to_string(), e))?;
    }
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    fs::write(&tmp_path, body)
        .await
        .map_err(|e| StoreError::io(tmp_path.display().to_string(), e))?;
    fs::rename(&tmp_path, path)
        .await
        .map_err(|e| StoreError::io(path.display().to_string(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        value: u32,
    }

    #[tokio::test]
    async fn write_json_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        write_json(&path, &Sample { value: 7 }).await.unwrap();

        let data = fs::read(&path).await.unwrap();
        let decoded: Sample = serde_json::from_slice(&data).unwrap();
        assert_eq!(decoded, Sample { value: 7 });

        let leftover_tmp = path.with_extension("json.tmp");
        assert!(!leftover_tmp.exists());
    }

    #[tokio::test]
    async fn write_json_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        write_json(&path, &Sample { value: 1 }).await.unwrap();
        write_json(&path, &Sample { value: 2 }).await.unwrap();

        let data = fs::read(&path).await.unwrap();
        let decoded: Sample = serde_json::from_slice(&data).unwrap();
        assert_eq!(decoded, Sample { value: 2 });
    }
}
