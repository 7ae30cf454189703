//! Prerender worker - runs in separate thread(s)

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use flume::Receiver;
use log::{debug, warn};

use super::error::RenderError;
use super::request::{PrerenderJob, WorkerMessage, WriteOutcome};
use super::scheduler::JobTracker;
use super::store::{SurfaceStore, lock_store};
use super::types::Surface;

/// Main worker function - runs in a dedicated thread
pub(crate) fn render_worker(
    requests: Receiver<WorkerMessage>,
    store: Arc<Mutex<SurfaceStore>>,
    tracker: Arc<JobTracker>,
) {
    debug!("Prerender worker started");

    for message in requests {
        match message {
            WorkerMessage::Render(job) => {
                handle_job(&job, &store, &tracker);
                tracker.release(&job.key);
            }

            WorkerMessage::Shutdown => break,
        }
    }

    debug!("Prerender worker stopped");
}

fn handle_job(job: &PrerenderJob, store: &Mutex<SurfaceStore>, tracker: &JobTracker) {
    let slot = job.key.slot.as_str();

    // The slot may have been reconfigured or disabled while this job sat in the queue
    if !lock_store(store).accepts_prerender(slot, &job.stamp) {
        debug!("Skipping outdated prerender {}", job.key);
        return;
    }

    match render(job) {
        Ok(surface) => {
            let outcome = lock_store(store).put_prerendered(
                slot,
                job.key.page,
                Arc::new(surface),
                &job.stamp,
            );
            match outcome {
                WriteOutcome::Stored => {
                    tracker.prerendered.fetch_add(1, Ordering::Relaxed);
                }
                WriteOutcome::Stale => {
                    debug!("Discarding stale prerender {}", job.key);
                }
            }
        }
        Err(e) => {
            warn!("Prerender {} failed: {e}", job.key);
            tracker.render_failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Run the backend, turning a panic into a per-page failure
fn render(job: &PrerenderJob) -> Result<Surface, RenderError> {
    let PrerenderJob {
        page, stamp, backend, ..
    } = job;

    panic::catch_unwind(AssertUnwindSafe(|| {
        backend.render(*page, stamp.dims, stamp.variant)
    }))
    .unwrap_or(Err(RenderError::Panicked { page: page.index }))
}
