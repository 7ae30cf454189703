//! Background prerender scheduling

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use log::{debug, error};

use super::backend::{PageSource, RenderBackend};
use super::request::{JobKey, PrerenderJob, Stamp, WorkerMessage};
use super::store::{SurfaceStore, lock_store};
use super::viewport::ViewportId;
use super::window::PrerenderWindow;
use super::worker::render_worker;

/// Jobs that are queued or running, plus completion counters.
///
/// A key stays claimed from the moment it is queued until a worker is done
/// with it or it is dropped from the queue, so a page is never rendered twice
/// concurrently for the same slot configuration.
#[derive(Default)]
pub(crate) struct JobTracker {
    in_flight: Mutex<HashSet<JobKey>>,
    idle: Condvar,
    pub(crate) prerendered: AtomicU64,
    pub(crate) render_failures: AtomicU64,
}

impl JobTracker {
    fn jobs(&self) -> MutexGuard<'_, HashSet<JobKey>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a key; false when a job for it is already outstanding
    pub(crate) fn try_claim(&self, key: &JobKey) -> bool {
        self.jobs().insert(key.clone())
    }

    pub(crate) fn release(&self, key: &JobKey) {
        let mut jobs = self.jobs();
        jobs.remove(key);
        if jobs.is_empty() {
            self.idle.notify_all();
        }
    }

    fn release_many(&self, keys: &[JobKey]) {
        let mut jobs = self.jobs();
        for key in keys {
            jobs.remove(key);
        }
        if jobs.is_empty() {
            self.idle.notify_all();
        }
    }

    fn is_claimed(&self, key: &JobKey) -> bool {
        self.jobs().contains(key)
    }

    fn outstanding(&self) -> usize {
        self.jobs().len()
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut jobs = self.jobs();
        while !jobs.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            jobs = self
                .idle
                .wait_timeout(jobs, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// Keeps a window of pages around the current one rendered for every
/// prerender-enabled slot.
///
/// Jobs go through a shared MPMC queue to a pool of worker threads. Each
/// `advance` drops whatever is still queued from the previous call and queues
/// the new window nearest-first; renders already running are left to finish
/// and are checked against the slot's configuration when they complete.
pub struct PrerenderScheduler {
    job_tx: Sender<WorkerMessage>,
    // Kept so unstarted jobs can be drained when the window moves
    job_rx: Receiver<WorkerMessage>,
    tracker: Arc<JobTracker>,
    window: PrerenderWindow,
    num_workers: usize,
}

impl PrerenderScheduler {
    /// Spawn `num_workers` render threads (at least one) writing into `store`
    #[must_use]
    pub fn new(
        store: Arc<Mutex<SurfaceStore>>,
        num_workers: usize,
        window: PrerenderWindow,
    ) -> Self {
        // flume channels are MPMC: every worker pulls from the same queue
        let (job_tx, job_rx) = flume::unbounded();
        let tracker = Arc::new(JobTracker::default());
        let num_workers = num_workers.max(1);

        for index in 0..num_workers {
            let rx = job_rx.clone();
            let store = Arc::clone(&store);
            let tracker = Arc::clone(&tracker);

            let spawned = std::thread::Builder::new()
                .name(format!("prerender-{index}"))
                .spawn(move || render_worker(rx, store, tracker));
            if let Err(e) = spawned {
                error!("Failed to spawn prerender worker {index}: {e}");
            }
        }

        Self {
            job_tx,
            job_rx,
            tracker,
            window,
            num_workers,
        }
    }

    /// Queue background renders for the window around `current`.
    ///
    /// Returns the keys queued by this call, in queue order. Pages already
    /// stored or already in flight for a target are skipped.
    pub fn advance(
        &self,
        current: usize,
        targets: &[(ViewportId, Stamp)],
        document: &dyn PageSource,
        backend: &Arc<dyn RenderBackend>,
        store: &Mutex<SurfaceStore>,
    ) -> Vec<JobKey> {
        self.drop_queued();

        let pages = self.window.pages(current, document.page_count());
        if pages.is_empty() || targets.is_empty() {
            return vec![];
        }

        // Nearest pages first across all targets
        let misses: Vec<(usize, &ViewportId, Stamp)> = {
            let store = lock_store(store);
            pages
                .iter()
                .flat_map(|&page| targets.iter().map(move |(slot, stamp)| (page, slot, *stamp)))
                .filter(|(page, slot, _)| !store.contains(slot.as_str(), *page))
                .collect()
        };

        let mut queued = Vec::with_capacity(misses.len());
        for (page, slot, stamp) in misses {
            let Some(page_ref) = document.page_ref(page) else {
                continue;
            };
            let key = JobKey {
                slot: slot.clone(),
                page,
                generation: stamp.generation,
            };
            if !self.tracker.try_claim(&key) {
                continue;
            }

            let job = PrerenderJob {
                key: key.clone(),
                page: page_ref,
                stamp,
                backend: Arc::clone(backend),
            };
            if self.job_tx.send(WorkerMessage::Render(job)).is_err() {
                error!("Prerender queue is closed, dropping {key}");
                self.tracker.release(&key);
                continue;
            }
            queued.push(key);
        }

        if !queued.is_empty() {
            debug!(
                "Queued {} prerender jobs around page {current}: {:?}",
                queued.len(),
                queued.iter().map(|k| k.page).collect::<Vec<_>>()
            );
        }
        queued
    }

    /// Drop jobs no worker has picked up yet
    pub fn drop_queued(&self) -> usize {
        let mut dropped = vec![];
        let mut shutdowns = 0;
        for message in self.job_rx.drain() {
            match message {
                WorkerMessage::Render(job) => dropped.push(job.key),
                WorkerMessage::Shutdown => shutdowns += 1,
            }
        }
        for _ in 0..shutdowns {
            let _ = self.job_tx.send(WorkerMessage::Shutdown);
        }

        if !dropped.is_empty() {
            debug!("Dropped {} queued prerender jobs", dropped.len());
            self.tracker.release_many(&dropped);
        }
        dropped.len()
    }

    /// Whether a job for `key` is queued or running
    #[must_use]
    pub fn is_in_flight(&self, key: &JobKey) -> bool {
        self.tracker.is_claimed(key)
    }

    /// Jobs queued or running
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.tracker.outstanding()
    }

    /// Block until no job is queued or running, or the timeout passes
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.tracker.wait_idle(timeout)
    }

    /// Surfaces stored by background workers
    #[must_use]
    pub fn prerendered(&self) -> u64 {
        self.tracker.prerendered.load(Ordering::Relaxed)
    }

    /// Background renders that failed
    #[must_use]
    pub fn render_failures(&self) -> u64 {
        self.tracker.render_failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn window(&self) -> PrerenderWindow {
        self.window
    }

    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Stop all workers once they finish their current render
    pub fn shutdown(&self) {
        self.drop_queued();
        for _ in 0..self.num_workers {
            let _ = self.job_tx.send(WorkerMessage::Shutdown);
        }
    }
}

impl Drop for PrerenderScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
