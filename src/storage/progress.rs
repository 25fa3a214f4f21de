use std::path::PathBuf;

use async_trait::async_trait;

use crate::errors::{CoordinatorError, Result};
use crate::models::{JobId, ProgressRecord};
use crate::storage::ProgressStore;

/// One `<id>.json` file per job under `<data_dir>/progress/`.
pub struct FsProgressStore {
    dir: PathBuf,
}

impl FsProgressStore {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        let dir = data_dir.join("progress");
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

#[async_trait]
impl ProgressStore for FsProgressStore {
    async fn load_all(&self) -> Result<Vec<ProgressRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            let record: ProgressRecord = serde_json::from_str(&content).map_err(|e| {
                CoordinatorError::Fatal(format!(
                    "Progress file {} is corrupted: {}",
                    path.display(),
                    e
                ))
            })?;
            records.push(record);
        }

        records.sort_by_key(|r| r.job_id);
        Ok(records)
    }

    async fn save(&self, record: &ProgressRecord) -> Result<()> {
        let path = self.path_for(record.job_id);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&tmp_path, json.as_bytes()).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn remove(&self, id: JobId) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
