//! Synthetic import run used in mock mode.

use std::time::Duration;

use tokio::{sync::oneshot, time};

use crate::{
    import_runner::RunOutcome,
    models::{DownloadProgress, EventSink, ImportStats, JobEvent, LogStream},
    progress_parser::Stage,
};

pub const MOCK_TOTAL_BYTES: u64 = 80 * 1024 * 1024;
const DOWNLOAD_STEPS: u64 = 10;

const SCHEDULE: [(Stage, u64); 6] = [
    (Stage::Downloading, 2200),
    (Stage::Extracting, 900),
    (Stage::Pruning, 650),
    (Stage::CheckingCollisions, 700),
    (Stage::Moving, 800),
    (Stage::CleaningUp, 500),
];

pub fn final_stats() -> ImportStats {
    ImportStats {
        downloaded_bytes: Some(MOCK_TOTAL_BYTES),
        extracted_entries: Some(22),
        pruned_count: Some(4),
        moved_count: Some(18),
    }
}

pub async fn simulate_import(sink: EventSink, mut cancel: oneshot::Receiver<()>) -> RunOutcome {
    let emit = |event: JobEvent| {
        let _ = sink.send(event);
    };

    emit(JobEvent::Log {
        message: "Running in MOCK mode; no files will be fetched.".to_string(),
        stream: LogStream::Stdout,
    });

    for (stage, duration_ms) in SCHEDULE {
        emit(JobEvent::Stage { stage });

        if stage != Stage::Downloading {
            if !pause(duration_ms, &mut cancel).await {
                return RunOutcome::cancelled();
            }
            continue;
        }

        for step in 0..DOWNLOAD_STEPS {
            emit(JobEvent::Progress {
                stage: Some(Stage::Downloading),
                progress: download_step(step, duration_ms),
            });
            if !pause(duration_ms / DOWNLOAD_STEPS, &mut cancel).await {
                return RunOutcome::cancelled();
            }
        }
    }

    emit(JobEvent::Stats {
        stats: final_stats(),
    });
    emit(JobEvent::Log {
        message: "Mock import finished".to_string(),
        stream: LogStream::Stdout,
    });

    RunOutcome::exited(0)
}

/// Returns false when the run was cancelled during the pause.
async fn pause(ms: u64, cancel: &mut oneshot::Receiver<()>) -> bool {
    tokio::select! {
        _ = time::sleep(Duration::from_millis(ms)) => true,
        Ok(()) = cancel => false,
    }
}

fn download_step(step: u64, duration_ms: u64) -> DownloadProgress {
    let done = step + 1;
    let percent = (done * 100 / DOWNLOAD_STEPS) as f64;
    DownloadProgress {
        percent: Some(percent),
        downloaded_bytes: Some(MOCK_TOTAL_BYTES * done / DOWNLOAD_STEPS),
        total_bytes: Some(MOCK_TOTAL_BYTES),
        speed_bps: None,
        eta_seconds: Some((DOWNLOAD_STEPS - done) * duration_ms / 1000),
    }
}
