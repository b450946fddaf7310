//! Append-only JSON-lines log of batches the sink never accepted.

use std::path::{Path, PathBuf};

use harvest_core::civil_time::{now_civil, DATETIME_FORMAT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::error::SinkError;

/// One failed batch, with the request body exactly as it was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    #[serde(rename = "failed_at")]
    pub timestamp: String,
    #[serde(rename = "target_url")]
    pub target_endpoint: String,
    #[serde(rename = "error")]
    pub error_message: String,
    pub payload: Value,
}

impl DeadLetterEntry {
    #[must_use]
    pub fn now(target_endpoint: &str, error_message: &str, payload: Value) -> Self {
        Self {
            timestamp: now_civil().format(DATETIME_FORMAT).to_string(),
            target_endpoint: target_endpoint.to_owned(),
            error_message: error_message.to_owned(),
            payload,
        }
    }

    /// Number of items in the payload, 0 when it has none.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.payload
            .get("items")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }
}

#[derive(Debug, Clone)]
pub struct DeadLetterLog {
    path: PathBuf,
}

impl DeadLetterLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry as a single line. Existing lines are never touched.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::DeadLetterIo`] if the log cannot be written.
    pub async fn append(&self, entry: &DeadLetterEntry) -> Result<(), SinkError> {
        let io_err = |source| SinkError::DeadLetterIo {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut line = serde_json::to_string(entry)
            .map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;

        tracing::warn!(
            path = %self.path.display(),
            items = entry.item_count(),
            error = %entry.error_message,
            "batch written to dead-letter log"
        );
        Ok(())
    }

    /// Reads every entry. A missing log reads as empty; blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::DeadLetterIo`] on read failure or
    /// [`SinkError::DeadLetterParse`] for a line that is not an entry.
    pub async fn read_all(&self) -> Result<Vec<DeadLetterEntry>, SinkError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SinkError::DeadLetterIo {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|source| SinkError::DeadLetterParse {
                    path: self.path.clone(),
                    line: idx + 1,
                    source,
                })
            })
            .collect()
    }

    /// Number of non-blank lines in the log.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::DeadLetterIo`] on read failure.
    pub async fn line_count(&self) -> Result<usize, SinkError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(text.lines().filter(|l| !l.trim().is_empty()).count()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(source) => Err(SinkError::DeadLetterIo {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn entries_round_trip_through_the_log() {
        let dir = TempDir::new().unwrap();
        let log = DeadLetterLog::new(dir.path().join("nested/push_failed.jsonl"));
        assert_eq!(log.line_count().await.unwrap(), 0);
        assert!(log.read_all().await.unwrap().is_empty());

        let payload = json!({"channel": "m-1", "items": [{"order_no": "A1"}, {"order_no": "A2"}]});
        let entry = DeadLetterEntry::now("http://sink/push", "HTTP 500: boom", payload.clone());
        log.append(&entry).await.unwrap();
        log.append(&DeadLetterEntry::now("http://sink/push", "again", json!({"items": []})))
            .await
            .unwrap();

        assert_eq!(log.line_count().await.unwrap(), 2);
        let entries = log.read_all().await.unwrap();
        assert_eq!(entries[0].payload, payload);
        assert_eq!(entries[0].item_count(), 2);
        assert_eq!(entries[1].item_count(), 0);
    }

    #[tokio::test]
    async fn serialized_field_names_match_log_format() {
        let entry = DeadLetterEntry::now("u", "e", json!({}));
        let value = serde_json::to_value(&entry).unwrap();
        for key in ["failed_at", "target_url", "error", "payload"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn corrupt_line_reports_its_number() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dl.jsonl");
        let good = serde_json::to_string(&DeadLetterEntry::now("u", "e", json!({}))).unwrap();
        std::fs::write(&path, format!("{good}\n\nnot json\n")).unwrap();

        let err = DeadLetterLog::new(&path).read_all().await.unwrap_err();
        assert!(matches!(err, SinkError::DeadLetterParse { line: 3, .. }), "{err:?}");
    }
}
