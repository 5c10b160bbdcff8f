use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::StorageHandle;

/// How a data file entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Watch,
    Upload,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Watch => "watch",
            DataSource::Upload => "upload",
        }
    }
}

/// A tabular file known to the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFileRecord {
    pub id: String,
    pub filename: String,
    /// Set once the file has been put into storage; never changes afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_handle: Option<StorageHandle>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl DataFileRecord {
    pub fn new(filename: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            storage_handle: None,
            metadata: serde_json::Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_storage_handle(mut self, handle: StorageHandle) -> Self {
        self.storage_handle = Some(handle);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Adds or overwrites metadata keys. Identity and storage pointer are untouched.
    pub fn merge_metadata(&mut self, extra: &serde_json::Map<String, Value>) {
        for (key, value) in extra {
            self.metadata.insert(key.clone(), value.clone());
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_metadata_overwrites_keys_only() {
        let mut record = DataFileRecord::new("readings.csv")
            .with_storage_handle(StorageHandle::new("raw/abc/readings.csv"));
        record.metadata.insert("source".into(), json!("watch"));

        let mut extra = serde_json::Map::new();
        extra.insert("row_count".into(), json!(12));
        extra.insert("source".into(), json!("upload"));
        record.merge_metadata(&extra);

        assert_eq!(record.metadata["row_count"], 12);
        assert_eq!(record.source(), Some("upload"));
        assert_eq!(
            record.storage_handle.as_ref().map(|h| h.as_str()),
            Some("raw/abc/readings.csv")
        );
    }
}
