use acqwatch_lifecycle::{RecordSource, RequestRecord, Result, WatchError};
use acqwatch_request_index::RequestId;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct RawRecord {
    name: String,
    id: RequestId,
}

/// Record source reading a JSON array of pending requests
/// (`[{"name": "...", "id": 101}, ...]`), re-read on every fetch so an
/// updated file shows up in the next index generation.
pub struct FileRecordSource {
    path: PathBuf,
}

impl FileRecordSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl RecordSource for FileRecordSource {
    async fn fetch(&self) -> Result<Vec<RequestRecord>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|err| {
                WatchError::RecordSource(format!("{}: {err}", self.path.display()))
            })?;
        let parsed: Vec<RawRecord> = serde_json::from_str(&raw).map_err(|err| {
            WatchError::RecordSource(format!("{}: {err}", self.path.display()))
        })?;
        Ok(parsed
            .into_iter()
            .map(|record| RequestRecord::new(record.name, record.id))
            .collect())
    }
}
