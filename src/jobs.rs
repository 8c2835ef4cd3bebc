//! Job lifecycle: creation, the FIFO queue, event folding and per-job
//! snapshot fan-out.
//!
//! All job records live in one arena behind a single lock. Every mutation
//! publishes its snapshot while the lock is still held, so subscribers see
//! updates in exactly the order the runner emitted them.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, Notify, RwLock};
use tokio_stream::{wrappers::UnboundedReceiverStream, Stream, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::JobError,
    import_runner::{ImportRunner, RunOutcome},
    models::{
        ImportRequest, JobEvent, JobRecord, JobSnapshot, JobStatus, STAGE_DONE, STAGE_FAILED,
        STAGE_PENDING,
    },
};

pub const CANCELLED_MESSAGE: &str = "Import cancelled";

/// Field checks shared by job creation and the HTTP layer.
pub fn validate_request(artist: &str, url: &str) -> Result<(), JobError> {
    if artist.trim().is_empty() {
        return Err(JobError::Validation("Artist is required".to_string()));
    }
    if url.trim().is_empty() {
        return Err(JobError::Validation(
            "Pixeldrain URL or ID is required".to_string(),
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

struct Inner {
    runner: ImportRunner,
    log_limit: usize,
    state: RwLock<ManagerState>,
    wake: Notify,
}

#[derive(Default)]
struct ManagerState {
    jobs: HashMap<String, JobRecord>,
    queue: VecDeque<String>,
    current: Option<String>,
    cancel_current: Option<oneshot::Sender<()>>,
    next_seq: u64,
}

/// A job the worker has just moved to running.
pub struct NextJob {
    pub id: String,
    request: ImportRequest,
    cancel_rx: oneshot::Receiver<()>,
    cancelled: bool,
}

/// Live view of one job: the snapshot at subscribe time plus every later one.
///
/// Dropping the subscription unsubscribes. The stream ends once the job has
/// published its terminal snapshot.
pub struct JobSubscription {
    pub initial: JobSnapshot,
    receiver: mpsc::UnboundedReceiver<JobSnapshot>,
}

impl JobSubscription {
    pub fn into_stream(self) -> impl Stream<Item = JobSnapshot> + Send + 'static {
        tokio_stream::once(self.initial).chain(UnboundedReceiverStream::new(self.receiver))
    }
}

impl JobManager {
    pub fn new(runner: ImportRunner, log_limit: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                log_limit: log_limit.max(1),
                state: RwLock::new(ManagerState::default()),
                wake: Notify::new(),
            }),
        }
    }

    pub fn is_mock(&self) -> bool {
        self.inner.runner.is_mock()
    }

    pub async fn create(
        &self,
        artist: &str,
        url: &str,
        dry_run: bool,
        keep_temp: bool,
    ) -> Result<JobSnapshot, JobError> {
        validate_request(artist, url)?;
        let artist = artist.trim();
        let url = url.trim();

        let log_limit = self.inner.log_limit;
        let snapshot = {
            let mut guard = self.inner.state.write().await;
            let state = &mut *guard;

            let busy = state
                .jobs
                .values()
                .any(|job| job.status.is_active() && job.matches_artist(artist));
            if busy {
                return Err(JobError::ImportInProgress);
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            let id = Uuid::new_v4().to_string();
            let mut record = JobRecord::new(id.clone(), seq, artist, url, dry_run, keep_temp);
            record.publish(log_limit);
            let snapshot = record.to_snapshot(log_limit);

            state.jobs.insert(id.clone(), record);
            state.queue.push_back(id);
            snapshot
        };

        info!(
            job_id = %snapshot.id,
            artist = %snapshot.artist,
            dry_run,
            keep_temp,
            "Import job queued"
        );
        self.process_queue();
        Ok(snapshot)
    }

    pub async fn get(&self, id: &str) -> Option<JobSnapshot> {
        let state = self.inner.state.read().await;
        state
            .jobs
            .get(id)
            .map(|job| job.to_snapshot(self.inner.log_limit))
    }

    /// Newest first.
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let state = self.inner.state.read().await;
        let mut jobs: Vec<&JobRecord> = state.jobs.values().collect();
        jobs.sort_by(|a, b| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));
        jobs.into_iter()
            .map(|job| job.to_snapshot(self.inner.log_limit))
            .collect()
    }

    pub async fn subscribe(&self, id: &str) -> Option<JobSubscription> {
        let mut state = self.inner.state.write().await;
        let job = state.jobs.get_mut(id)?;
        let (tx, receiver) = mpsc::unbounded_channel();
        if job.status.is_active() {
            job.subscribers.push(tx);
        }
        Some(JobSubscription {
            initial: job.to_snapshot(self.inner.log_limit),
            receiver,
        })
    }

    /// A running job has its runner stopped; a pending one fails as soon as
    /// the worker reaches it. Once the runner has resolved, the job counts as
    /// finished even while its outcome is still being recorded.
    pub async fn cancel(&self, id: &str) -> Result<JobSnapshot, JobError> {
        let mut guard = self.inner.state.write().await;
        let state = &mut *guard;
        let job = state.jobs.get_mut(id).ok_or(JobError::NotFound)?;

        match job.status {
            JobStatus::Success | JobStatus::Failed => {
                return Err(JobError::JobFinished(id.to_string()));
            }
            JobStatus::Pending => {
                job.cancel_requested = true;
            }
            JobStatus::Running if !job.cancel_requested => {
                let delivered = state.current.as_deref() == Some(id)
                    && state
                        .cancel_current
                        .take()
                        .is_some_and(|cancel| cancel.send(()).is_ok());
                if !delivered {
                    return Err(JobError::JobFinished(id.to_string()));
                }
                job.cancel_requested = true;
            }
            JobStatus::Running => {}
        }

        info!(job_id = %id, status = ?job.status, "Import cancellation requested");
        Ok(job.to_snapshot(self.inner.log_limit))
    }

    /// Wake the worker. Safe to call any number of times.
    pub fn process_queue(&self) {
        self.inner.wake.notify_one();
    }

    pub(crate) async fn wait_for_work(&self) {
        self.inner.wake.notified().await;
    }

    /// Dequeue the head of the queue and mark it running, unless a job is
    /// already current or nothing is queued.
    pub(crate) async fn start_next(&self) -> Option<NextJob> {
        let log_limit = self.inner.log_limit;
        let mut guard = self.inner.state.write().await;
        let state = &mut *guard;
        if state.current.is_some() {
            return None;
        }

        while let Some(id) = state.queue.pop_front() {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            if job.status != JobStatus::Pending {
                continue;
            }

            job.status = JobStatus::Running;
            job.stage = STAGE_PENDING.to_string();
            job.started_at = Some(Utc::now());
            job.publish(log_limit);

            info!(
                job_id = %id,
                artist = %job.artist,
                url = %job.url,
                dry_run = job.dry_run,
                keep_temp = job.keep_temp,
                "Starting import"
            );

            let (cancel_tx, cancel_rx) = oneshot::channel();
            let next = NextJob {
                id: id.clone(),
                request: job.import_request(),
                cancel_rx,
                cancelled: job.cancel_requested,
            };
            state.current = Some(id);
            state.cancel_current = Some(cancel_tx);
            return Some(next);
        }

        None
    }

    /// Execute a job the worker dequeued and fold its events until the
    /// runner resolves.
    pub(crate) async fn run_job(&self, next: NextJob) {
        let NextJob {
            id,
            request,
            cancel_rx,
            cancelled,
        } = next;

        let outcome = if cancelled {
            RunOutcome::cancelled()
        } else {
            let (sink, mut events) = mpsc::unbounded_channel();
            let run = self.inner.runner.run(&request, sink, cancel_rx);
            tokio::pin!(run);

            let outcome = loop {
                tokio::select! {
                    biased;
                    Some(event) = events.recv() => self.apply_event(&id, event).await,
                    outcome = &mut run => break outcome,
                }
            };

            events.close();
            while let Some(event) = events.recv().await {
                self.apply_event(&id, event).await;
            }
            outcome
        };

        self.finish(&id, outcome).await;
    }

    pub(crate) async fn apply_event(&self, id: &str, event: JobEvent) {
        let log_limit = self.inner.log_limit;
        let mut state = self.inner.state.write().await;
        let Some(job) = state.jobs.get_mut(id) else {
            return;
        };

        match event {
            JobEvent::Log { message, stream } => job.push_log(message, stream, log_limit),
            JobEvent::Stage { stage } => job.stage = stage.label().to_string(),
            JobEvent::Progress { stage, progress } => {
                if let Some(stage) = stage {
                    job.stage = stage.label().to_string();
                }
                job.progress.get_or_insert_with(Default::default).merge(&progress);
            }
            JobEvent::Stats { stats } => job.stats.merge(&stats),
        }
        job.publish(log_limit);
    }

    pub(crate) async fn finish(&self, id: &str, outcome: RunOutcome) {
        let log_limit = self.inner.log_limit;
        let mut guard = self.inner.state.write().await;
        let state = &mut *guard;

        if let Some(job) = state.jobs.get_mut(id) {
            job.exit_code = outcome.code;
            job.status = if outcome.is_success() {
                JobStatus::Success
            } else {
                JobStatus::Failed
            };
            job.finished_at = Some(Utc::now());

            if let Some(error) = &outcome.error {
                job.error = Some(error.clone());
            }
            if let Some(signal) = &outcome.signal {
                job.error = Some(format!("Process terminated with signal {signal}"));
            }
            if outcome.cancelled {
                job.error = Some(CANCELLED_MESSAGE.to_string());
            }
            if job.status == JobStatus::Failed && job.error.is_none() {
                if let Some(code) = outcome.code {
                    job.error = Some(format!("Import exited with code {code}"));
                }
            }

            if job.stats.downloaded_bytes.unwrap_or(0) == 0 {
                let from_progress = job
                    .progress
                    .as_ref()
                    .and_then(|progress| progress.downloaded_bytes)
                    .filter(|bytes| *bytes > 0);
                if from_progress.is_some() {
                    job.stats.downloaded_bytes = from_progress;
                }
            }

            job.stage = match job.status {
                JobStatus::Success => STAGE_DONE.to_string(),
                _ => STAGE_FAILED.to_string(),
            };

            match job.status {
                JobStatus::Success => info!(job_id = %id, "Import job succeeded"),
                _ => warn!(
                    job_id = %id,
                    exit_code = ?job.exit_code,
                    error = job.error.as_deref().unwrap_or_default(),
                    "Import job failed"
                ),
            }

            job.publish(log_limit);
            job.subscribers.clear();
        }

        if state.current.as_deref() == Some(id) {
            state.current = None;
            state.cancel_current = None;
        }
    }
}
