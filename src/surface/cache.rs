//! Surface cache facade - the entry point the UI layer talks to

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};

use super::backend::{PageSource, RenderBackend};
use super::error::{CacheError, RenderError};
use super::request::{JobKey, Stamp, WriteOutcome};
use super::scheduler::PrerenderScheduler;
use super::state::{CacheState, Command, Effect};
use super::store::{CapacityPolicy, SurfaceStore, lock_store};
use super::types::{Dimensions, PageRef, PageVariant, SharedSurface, Surface};
use super::viewport::{Viewport, ViewportId};
use super::window::PrerenderWindow;
use super::default_workers;

/// Tuning for one cache instance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub capacity: CapacityPolicy,
    /// Background render threads (at least one is always started)
    pub workers: usize,
    pub window: PrerenderWindow,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: CapacityPolicy::default(),
            workers: default_workers(),
            window: PrerenderWindow::default(),
        }
    }
}

/// Diagnostic counters across store, scheduler and miss-fills
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub stale_writes: u64,
    pub render_failures: u64,
    pub prerendered: u64,
    pub miss_fills: u64,
    /// Pixel memory held by stored surfaces
    pub memory_bytes: usize,
    /// Background renders queued or running
    pub in_flight: usize,
}

impl CacheStats {
    /// Cache hit rate (0.0 to 1.0)
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Render-surface cache for every viewport of one loaded document.
///
/// Owned by the interactive thread: configuration changes take `&mut self`,
/// lookups and miss-fills take `&self`. Background workers only ever touch
/// the shared store.
pub struct SurfaceCache {
    state: CacheState,
    store: Arc<Mutex<SurfaceStore>>,
    scheduler: PrerenderScheduler,
    document: Arc<dyn PageSource>,
    backend: Arc<dyn RenderBackend>,
    miss_fills: AtomicU64,
    miss_fill_failures: AtomicU64,
}

impl SurfaceCache {
    /// Create a cache with default configuration
    #[must_use]
    pub fn new(document: Arc<dyn PageSource>, backend: Arc<dyn RenderBackend>) -> Self {
        Self::with_config(document, backend, CacheConfig::default())
    }

    /// Create a cache with custom configuration
    #[must_use]
    pub fn with_config(
        document: Arc<dyn PageSource>,
        backend: Arc<dyn RenderBackend>,
        config: CacheConfig,
    ) -> Self {
        let store = Arc::new(Mutex::new(SurfaceStore::new(config.capacity)));
        let scheduler = PrerenderScheduler::new(Arc::clone(&store), config.workers, config.window);
        let state = CacheState::new(document.page_count());

        debug!(
            "Surface cache for {} pages: {:?}, {} workers, window +{}/-{}",
            state.page_count,
            config.capacity,
            scheduler.num_workers(),
            config.window.ahead,
            config.window.behind
        );

        Self {
            state,
            store,
            scheduler,
            document,
            backend,
            miss_fills: AtomicU64::new(0),
            miss_fill_failures: AtomicU64::new(0),
        }
    }

    /// Register a viewport that takes part in prerendering
    pub fn configure_viewport(
        &mut self,
        id: &str,
        variant: PageVariant,
        shared_with: Option<&str>,
    ) -> Result<(), CacheError> {
        self.add_viewport(id, variant, shared_with, true)
    }

    /// Register a viewport, or update an existing one's variant and prerender flag
    pub fn add_viewport(
        &mut self,
        id: &str,
        variant: PageVariant,
        shared_with: Option<&str>,
        enabled: bool,
    ) -> Result<(), CacheError> {
        self.apply([Command::Configure {
            id: ViewportId::new(id),
            variant,
            shared_with: shared_with.map(ViewportId::new),
            enabled,
        }])
        .map(|_| ())
    }

    pub fn deregister_viewport(&mut self, id: &str) -> Result<(), CacheError> {
        self.apply([Command::Deregister(ViewportId::new(id))])
            .map(|_| ())
    }

    /// Apply a batch of commands under one store lock, then re-evaluate
    /// the prerender window at most once.
    ///
    /// Stops at the first failing command; commands before it stay applied
    /// and their effects still run.
    pub fn apply(
        &mut self,
        commands: impl IntoIterator<Item = Command>,
    ) -> Result<Vec<JobKey>, CacheError> {
        let mut effects = vec![];
        let mut failure = None;
        {
            let mut store = lock_store(&self.store);
            for cmd in commands {
                match self.state.apply(cmd, &mut store) {
                    Ok(produced) => effects.extend(produced),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        let queued = self.execute_effects(effects);
        match failure {
            Some(e) => Err(e),
            None => Ok(queued),
        }
    }

    fn execute_effects(&mut self, effects: Vec<Effect>) -> Vec<JobKey> {
        let mut prerender = false;
        for effect in effects {
            match effect {
                Effect::Invalidated(slot) => debug!("Invalidated surfaces of {slot}"),
                Effect::Prerender => prerender = true,
            }
        }

        if prerender {
            self.advance()
        } else {
            vec![]
        }
    }

    fn advance(&self) -> Vec<JobKey> {
        let targets = self.state.prerender_targets(&lock_store(&self.store));
        self.scheduler.advance(
            self.state.current_page,
            &targets,
            self.document.as_ref(),
            &self.backend,
            &self.store,
        )
    }

    /// Cached surface for a viewport's page, if present; never renders
    #[must_use]
    pub fn get(&self, viewport: &str, page: usize) -> Option<SharedSurface> {
        let slot = self.state.viewports.slot_of(viewport)?;
        lock_store(&self.store).get(slot.as_str(), page)
    }

    /// Store a surface the caller rendered at `dims` for the viewport's current variant.
    ///
    /// Rejected as stale when `dims` no longer match the viewport.
    pub fn put(
        &self,
        viewport: &str,
        page: usize,
        surface: SharedSurface,
        dims: Dimensions,
    ) -> Result<WriteOutcome, CacheError> {
        let slot = self.slot(viewport)?;
        let mut store = lock_store(&self.store);
        let current = store
            .stamp(slot.as_str())
            .ok_or_else(|| CacheError::UnknownViewport(ViewportId::new(viewport)))?;
        let stamp = Stamp { dims, ..current };
        Ok(store.put(slot.as_str(), page, surface, &stamp))
    }

    /// Cached surface, or render it now on the caller's thread.
    ///
    /// On a miss `render_fn` is called with the page, the viewport's current
    /// dimensions and variant; its result is stored and returned. A render
    /// failure leaves the slot empty so the next call retries.
    pub fn get_or_render<F>(
        &self,
        viewport: &str,
        page: usize,
        render_fn: F,
    ) -> Result<SharedSurface, CacheError>
    where
        F: FnOnce(PageRef, Dimensions, PageVariant) -> Result<Surface, RenderError>,
    {
        let slot = self.slot(viewport)?;
        let page_ref = self
            .document
            .page_ref(page)
            .ok_or(RenderError::PageOutOfRange {
                page,
                page_count: self.document.page_count(),
            })?;

        let stamp = {
            let mut store = lock_store(&self.store);
            if let Some(surface) = store.get(slot.as_str(), page) {
                return Ok(surface);
            }
            store
                .stamp(slot.as_str())
                .ok_or_else(|| CacheError::UnknownViewport(slot.clone()))?
        };
        if stamp.dims.is_empty() {
            return Err(CacheError::UnsizedViewport(ViewportId::new(viewport)));
        }

        self.miss_fills.fetch_add(1, Ordering::Relaxed);
        let surface = render_fn(page_ref, stamp.dims, stamp.variant).map_err(|e| {
            warn!("Rendering page {page} for {viewport} failed: {e}");
            self.miss_fill_failures.fetch_add(1, Ordering::Relaxed);
            e
        })?;

        let surface = Arc::new(surface);
        let outcome = lock_store(&self.store).put(slot.as_str(), page, Arc::clone(&surface), &stamp);
        if outcome == WriteOutcome::Stale {
            debug!("Miss-fill of page {page} for {viewport} outdated before it was stored");
        }
        Ok(surface)
    }

    /// `get_or_render` using the cache's own backend
    pub fn render_with_backend(
        &self,
        viewport: &str,
        page: usize,
    ) -> Result<SharedSurface, CacheError> {
        let backend = Arc::clone(&self.backend);
        self.get_or_render(viewport, page, |page, dims, variant| {
            backend.render(page, dims, variant)
        })
    }

    /// Surface of the current page for a viewport, rendered if needed
    pub fn current_surface(&self, viewport: &str) -> Result<SharedSurface, CacheError> {
        self.render_with_backend(viewport, self.state.current_page)
    }

    /// Record a confirmed page change and queue the window around it
    pub fn on_navigate(&mut self, page: usize) -> Vec<JobKey> {
        match self.apply([Command::Navigate(page)]) {
            Ok(queued) => queued,
            Err(e) => {
                warn!("Navigation to page {page} failed: {e}");
                vec![]
            }
        }
    }

    /// New pixel size for a viewport; drops its surfaces if the size changed
    pub fn on_resize(&mut self, viewport: &str, width: u32, height: u32) -> Result<(), CacheError> {
        self.apply([Command::Resize {
            id: ViewportId::new(viewport),
            dims: Dimensions::new(width, height),
        }])
        .map(|_| ())
    }

    /// New page region for a viewport; drops its surfaces if the variant changed
    pub fn on_variant_change(
        &mut self,
        viewport: &str,
        variant: PageVariant,
    ) -> Result<(), CacheError> {
        self.apply([Command::SetVariant {
            id: ViewportId::new(viewport),
            variant,
        }])
        .map(|_| ())
    }

    /// Toggle background prerendering; existing surfaces stay readable
    pub fn set_enabled(&mut self, viewport: &str, enabled: bool) -> Result<(), CacheError> {
        self.apply([Command::SetEnabled {
            id: ViewportId::new(viewport),
            enabled,
        }])
        .map(|_| ())
    }

    /// Drop every surface of a viewport and refill in the background
    pub fn invalidate_viewport(&mut self, viewport: &str) -> Result<(), CacheError> {
        self.apply([Command::Invalidate(ViewportId::new(viewport))])
            .map(|_| ())
    }

    /// Replace the loaded document; every stored surface is dropped
    pub fn swap_document(
        &mut self,
        document: Arc<dyn PageSource>,
        backend: Arc<dyn RenderBackend>,
    ) -> Vec<JobKey> {
        self.scheduler.drop_queued();
        let page_count = document.page_count();
        self.document = document;
        self.backend = backend;
        debug!("Swapped document, now {page_count} pages");

        match self.apply([Command::SetPageCount(page_count)]) {
            Ok(queued) => queued,
            Err(e) => {
                warn!("Swapping document failed: {e}");
                vec![]
            }
        }
    }

    fn slot(&self, viewport: &str) -> Result<ViewportId, CacheError> {
        self.state
            .viewports
            .slot_of(viewport)
            .cloned()
            .ok_or_else(|| CacheError::UnknownViewport(ViewportId::new(viewport)))
    }

    fn stamp(&self, viewport: &str) -> Option<Stamp> {
        let slot = self.state.viewports.slot_of(viewport)?;
        lock_store(&self.store).stamp(slot.as_str())
    }

    /// Page region a viewport shows
    #[must_use]
    pub fn variant(&self, viewport: &str) -> Option<PageVariant> {
        self.stamp(viewport).map(|s| s.variant)
    }

    /// Pixel size a viewport renders at
    #[must_use]
    pub fn dimensions(&self, viewport: &str) -> Option<Dimensions> {
        self.stamp(viewport).map(|s| s.dims)
    }

    #[must_use]
    pub fn is_enabled(&self, viewport: &str) -> Option<bool> {
        self.state.viewports.get(viewport).map(|v| v.enabled)
    }

    #[must_use]
    pub fn viewport(&self, viewport: &str) -> Option<&Viewport> {
        self.state.viewports.get(viewport)
    }

    /// Whether two viewports read and write the same surfaces
    #[must_use]
    pub fn shares_surfaces(&self, a: &str, b: &str) -> bool {
        match (self.state.viewports.slot_of(a), self.state.viewports.slot_of(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Pages stored for a viewport, most recently accessed first
    #[must_use]
    pub fn cached_pages(&self, viewport: &str) -> Vec<usize> {
        self.state
            .viewports
            .slot_of(viewport)
            .map(|slot| lock_store(&self.store).pages(slot.as_str()))
            .unwrap_or_default()
    }

    /// Page capacity of a viewport
    #[must_use]
    pub fn capacity(&self, viewport: &str) -> Option<usize> {
        let slot = self.state.viewports.slot_of(viewport)?;
        lock_store(&self.store).capacity(slot.as_str())
    }

    /// Physical entries across all viewports
    #[must_use]
    pub fn entry_count(&self) -> usize {
        lock_store(&self.store).total_entries()
    }

    #[must_use]
    pub fn current_page(&self) -> usize {
        self.state.current_page
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.state.page_count
    }

    #[must_use]
    pub fn state(&self) -> &CacheState {
        &self.state
    }

    /// Whether a background render for `key` is queued or running
    #[must_use]
    pub fn is_in_flight(&self, key: &JobKey) -> bool {
        self.scheduler.is_in_flight(key)
    }

    /// Block until background rendering has drained, or the timeout passes.
    ///
    /// Never call this from the paint path.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.scheduler.wait_idle(timeout)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let store = lock_store(&self.store).stats();
        CacheStats {
            entries: store.entries,
            hits: store.hits,
            misses: store.misses,
            evictions: store.evictions,
            stale_writes: store.stale_writes,
            render_failures: self.scheduler.render_failures()
                + self.miss_fill_failures.load(Ordering::Relaxed),
            prerendered: self.scheduler.prerendered(),
            miss_fills: self.miss_fills.load(Ordering::Relaxed),
            memory_bytes: store.bytes,
            in_flight: self.scheduler.outstanding(),
        }
    }
}
