use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::progress_parser::Stage;

pub const STAGE_PENDING: &str = "Pending";
pub const STAGE_DONE: &str = "Done";
pub const STAGE_FAILED: &str = "Failed";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub keep_temp: bool,
}

/// What the runner needs to know about a job to execute it.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub artist: String,
    pub url: String,
    pub dry_run: bool,
    pub keep_temp: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_bps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
}

impl DownloadProgress {
    /// Overwrite only the fields `update` actually carries.
    pub fn merge(&mut self, update: &DownloadProgress) {
        if update.percent.is_some() {
            self.percent = update.percent;
        }
        if update.downloaded_bytes.is_some() {
            self.downloaded_bytes = update.downloaded_bytes;
        }
        if update.total_bytes.is_some() {
            self.total_bytes = update.total_bytes;
        }
        if update.speed_bps.is_some() {
            self.speed_bps = update.speed_bps;
        }
        if update.eta_seconds.is_some() {
            self.eta_seconds = update.eta_seconds;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_entries: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pruned_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moved_count: Option<u64>,
}

impl ImportStats {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn merge(&mut self, update: &ImportStats) {
        if update.downloaded_bytes.is_some() {
            self.downloaded_bytes = update.downloaded_bytes;
        }
        if update.extracted_entries.is_some() {
            self.extracted_entries = update.extracted_entries;
        }
        if update.pruned_count.is_some() {
            self.pruned_count = update.pruned_count;
        }
        if update.moved_count.is_some() {
            self.moved_count = update.moved_count;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub message: String,
    pub stream: LogStream,
    pub timestamp: DateTime<Utc>,
}

/// One update pushed from a runner to the job manager.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Log {
        message: String,
        stream: LogStream,
    },
    Stage {
        stage: Stage,
    },
    Progress {
        stage: Option<Stage>,
        progress: DownloadProgress,
    },
    Stats {
        stats: ImportStats,
    },
}

pub type EventSink = mpsc::UnboundedSender<JobEvent>;

/// Point-in-time copy of a job, safe to hand to any observer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub artist: String,
    pub url: String,
    pub dry_run: bool,
    pub keep_temp: bool,
    pub status: JobStatus,
    pub stage: String,
    pub progress: Option<DownloadProgress>,
    pub stats: ImportStats,
    pub logs: Vec<LogEntry>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct JobRecord {
    pub id: String,
    pub seq: u64,
    pub artist: String,
    pub url: String,
    pub dry_run: bool,
    pub keep_temp: bool,
    pub status: JobStatus,
    pub stage: String,
    pub progress: Option<DownloadProgress>,
    pub stats: ImportStats,
    pub logs: VecDeque<LogEntry>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub subscribers: Vec<mpsc::UnboundedSender<JobSnapshot>>,
}

impl JobRecord {
    pub fn new(
        id: String,
        seq: u64,
        artist: &str,
        url: &str,
        dry_run: bool,
        keep_temp: bool,
    ) -> Self {
        Self {
            id,
            seq,
            artist: artist.trim().to_string(),
            url: url.trim().to_string(),
            dry_run,
            keep_temp,
            status: JobStatus::Pending,
            stage: STAGE_PENDING.to_string(),
            progress: None,
            stats: ImportStats::default(),
            logs: VecDeque::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
            error: None,
            cancel_requested: false,
            subscribers: Vec::new(),
        }
    }

    pub fn matches_artist(&self, artist: &str) -> bool {
        self.artist.to_lowercase() == artist.trim().to_lowercase()
    }

    pub fn import_request(&self) -> ImportRequest {
        ImportRequest {
            artist: self.artist.clone(),
            url: self.url.clone(),
            dry_run: self.dry_run,
            keep_temp: self.keep_temp,
        }
    }

    pub fn push_log(&mut self, message: String, stream: LogStream, log_limit: usize) {
        self.logs.push_back(LogEntry {
            message,
            stream,
            timestamp: Utc::now(),
        });
        while self.logs.len() > log_limit {
            self.logs.pop_front();
        }
    }

    pub fn to_snapshot(&self, log_limit: usize) -> JobSnapshot {
        let skip = self.logs.len().saturating_sub(log_limit);
        JobSnapshot {
            id: self.id.clone(),
            artist: self.artist.clone(),
            url: self.url.clone(),
            dry_run: self.dry_run,
            keep_temp: self.keep_temp,
            status: self.status,
            stage: self.stage.clone(),
            progress: self.progress.clone(),
            stats: self.stats.clone(),
            logs: self.logs.iter().skip(skip).cloned().collect(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            exit_code: self.exit_code,
            error: self.error.clone(),
        }
    }

    /// Push a fresh snapshot to every live subscriber, dropping closed ones.
    pub fn publish(&mut self, log_limit: usize) {
        if self.subscribers.is_empty() {
            return;
        }
        let snapshot = self.to_snapshot(log_limit);
        self.subscribers
            .retain(|subscriber| subscriber.send(snapshot.clone()).is_ok());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorPayload {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::new(
            "job-1".to_string(),
            0,
            "  Muse ",
            " https://example/x ",
            true,
            false,
        )
    }

    #[test]
    fn new_record_trims_inputs_and_starts_pending() {
        let job = record();
        assert_eq!(job.artist, "Muse");
        assert_eq!(job.url, "https://example/x");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.stage, STAGE_PENDING);
        assert!(job.started_at.is_none());
        assert!(job.exit_code.is_none());
    }

    #[test]
    fn artist_matching_ignores_case_and_padding() {
        let job = record();
        assert!(job.matches_artist(" muse "));
        assert!(job.matches_artist("MUSE"));
        assert!(!job.matches_artist("Muse Tribute"));
    }

    #[test]
    fn log_retention_keeps_newest_entries_in_order() {
        let mut job = record();
        for i in 0..8 {
            job.push_log(format!("line {i}"), LogStream::Stdout, 3);
        }
        let snapshot = job.to_snapshot(3);
        let messages: Vec<_> = snapshot.logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["line 5", "line 6", "line 7"]);
    }

    #[test]
    fn progress_merge_keeps_fields_the_update_lacks() {
        let mut progress = DownloadProgress {
            percent: Some(10.0),
            total_bytes: Some(100),
            ..Default::default()
        };
        progress.merge(&DownloadProgress {
            percent: Some(20.0),
            downloaded_bytes: Some(20),
            ..Default::default()
        });
        assert_eq!(progress.percent, Some(20.0));
        assert_eq!(progress.downloaded_bytes, Some(20));
        assert_eq!(progress.total_bytes, Some(100));
    }

    #[test]
    fn snapshot_serializes_camel_case_and_omits_unset_fields() {
        let mut job = record();
        job.stats.moved_count = Some(3);
        let value = serde_json::to_value(job.to_snapshot(10)).expect("serialize snapshot");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["dryRun"], true);
        assert_eq!(value["progress"], serde_json::Value::Null);
        assert_eq!(value["stats"], serde_json::json!({ "movedCount": 3 }));
        assert_eq!(value["exitCode"], serde_json::Value::Null);
    }

    #[test]
    fn publish_drops_closed_subscribers() {
        let mut job = record();
        let (open_tx, mut open_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        drop(closed_rx);
        job.subscribers.push(open_tx);
        job.subscribers.push(closed_tx);

        job.publish(10);

        assert_eq!(job.subscribers.len(), 1);
        assert_eq!(open_rx.try_recv().expect("snapshot").id, "job-1");
    }
}
