use tracing::info;

use crate::jobs::JobManager;

/// The single import worker. It sleeps until woken by `process_queue`, then
/// runs queued jobs back to back until the queue is empty.
pub fn spawn_import_worker(manager: JobManager) {
    tokio::spawn(async move {
        loop {
            manager.wait_for_work().await;
            while let Some(next) = manager.start_next().await {
                info!(job_id = %next.id, "Worker picked import job");
                manager.run_job(next).await;
            }
        }
    });
}
