use chrono::{Local, NaiveDate};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::channel::ChannelKind;
use crate::error::Result;

/// Default number of days to keep log files.
const DEFAULT_MAX_LOG_DAYS: i64 = 7;

/// A single JSONL log entry written to the daily reminder journal.
#[derive(Debug, Serialize)]
pub struct LogEntry {
    pub ts: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Daily `YYYY-MM-DD.jsonl` files under one directory.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
    max_days: i64,
}

impl Journal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_days: DEFAULT_MAX_LOG_DAYS,
        }
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.max_days = if days > 0 { days } else { DEFAULT_MAX_LOG_DAYS };
        self
    }

    /// `<local data dir>/meeting-reminders/logs`, when the platform has one.
    pub fn default_dir() -> Option<PathBuf> {
        let mut dir = dirs::data_local_dir()?;
        dir.push("meeting-reminders");
        dir.push("logs");
        Some(dir)
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Removes day files older than the retention window. Returns how many went.
    pub async fn cleanup_old_logs(&self) -> usize {
        let Ok(mut entries) = fs::read_dir(&self.dir).await else {
            return 0;
        };
        let cutoff = Local::now().date_naive() - chrono::Duration::days(self.max_days);

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(day) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok())
            else {
                continue;
            };
            if day >= cutoff {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("journal: removed {}", path.display());
                    removed += 1;
                }
                Err(err) => warn!("journal: failed to remove {}: {}", path.display(), err),
            }
        }
        if removed > 0 {
            info!("journal: removed {} day file(s) older than {} days", removed, self.max_days);
        }
        removed
    }

    /// Appends a `LogEntry` as one JSONL line to `YYYY-MM-DD.jsonl`.
    pub async fn append(&self, entry: LogEntry) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let date = Local::now().format("%Y-%m-%d").to_string();
        let path = self.dir.join(format!("{date}.jsonl"));

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        file.write_all(line.as_bytes()).await?;

        Ok(())
    }
}

fn entry_internal(
    action: &str,
    reminder: Option<String>,
    channel: Option<ChannelKind>,
    error: Option<String>,
    details: Option<Value>,
) -> LogEntry {
    LogEntry {
        ts: Local::now().to_rfc3339(),
        action: action.to_string(),
        reminder,
        channel,
        error,
        details,
    }
}

/// Convenience: build a LogEntry for scheduler lifecycle events.
pub fn event_entry(action: &str, reminder: Option<&str>, details: Option<Value>) -> LogEntry {
    entry_internal(action, reminder.map(str::to_string), None, None, details)
}

/// Convenience: build a LogEntry for a delivery attempt on one tier.
pub fn delivery_entry(reminder: &str, channel: ChannelKind, error: Option<&str>) -> LogEntry {
    let action = if error.is_some() { "delivery_failed" } else { "delivered" };
    entry_internal(action, Some(reminder.to_string()), Some(channel), error.map(str::to_string), None)
}
