pub mod test_helpers {
    use std::num::NonZeroUsize;
    use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
    use std::time::{Duration, Instant};

    use crate::surface::{
        CacheConfig, CapacityPolicy, Dimensions, PageRef, PageSource, PageVariant, PrerenderWindow,
        RenderBackend, RenderError, Surface, SurfaceCache,
    };
    use crate::synthetic::{SyntheticDocument, SyntheticRenderer};

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One call into a backend
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RenderCall {
        pub page: usize,
        pub dims: Dimensions,
        pub variant: PageVariant,
    }

    /// Renders synthetic pages and remembers every call in order
    #[derive(Default)]
    pub struct RecordingBackend {
        renderer: SyntheticRenderer,
        calls: Mutex<Vec<RenderCall>>,
    }

    impl RecordingBackend {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail every render of these pages (the call is still recorded)
        pub fn failing(pages: impl IntoIterator<Item = usize>) -> Self {
            Self {
                renderer: SyntheticRenderer::new().with_failing_pages(pages),
                calls: Mutex::default(),
            }
        }

        pub fn with_delay(delay: Duration) -> Self {
            Self {
                renderer: SyntheticRenderer::new().with_delay(delay),
                calls: Mutex::default(),
            }
        }

        pub fn calls(&self) -> Vec<RenderCall> {
            lock(&self.calls).clone()
        }

        /// Rendered page indices in call order
        pub fn pages(&self) -> Vec<usize> {
            lock(&self.calls).iter().map(|c| c.page).collect()
        }

        pub fn count(&self) -> usize {
            lock(&self.calls).len()
        }
    }

    impl RenderBackend for RecordingBackend {
        fn render(
            &self,
            page: PageRef,
            dims: Dimensions,
            variant: PageVariant,
        ) -> Result<Surface, RenderError> {
            lock(&self.calls).push(RenderCall {
                page: page.index,
                dims,
                variant,
            });
            self.renderer.render(page, dims, variant)
        }
    }

    #[derive(Default)]
    struct Gate {
        open: bool,
        entered: usize,
    }

    /// Blocks every render until `open` is called, so tests can act while
    /// jobs are in flight
    #[derive(Default)]
    pub struct GatedBackend {
        inner: RecordingBackend,
        gate: Mutex<Gate>,
        changed: Condvar,
    }

    impl GatedBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn open(&self) {
            lock(&self.gate).open = true;
            self.changed.notify_all();
        }

        /// Wait until at least `count` renders have reached the gate
        pub fn wait_entered(&self, count: usize, timeout: Duration) -> bool {
            let deadline = Instant::now() + timeout;
            let mut gate = lock(&self.gate);
            while gate.entered < count {
                let Some(left) = deadline.checked_duration_since(Instant::now()) else {
                    return false;
                };
                gate = self
                    .changed
                    .wait_timeout(gate, left)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            true
        }

        pub fn calls(&self) -> Vec<RenderCall> {
            self.inner.calls()
        }
    }

    impl RenderBackend for GatedBackend {
        fn render(
            &self,
            page: PageRef,
            dims: Dimensions,
            variant: PageVariant,
        ) -> Result<Surface, RenderError> {
            {
                let mut gate = lock(&self.gate);
                gate.entered += 1;
                self.changed.notify_all();
                while !gate.open {
                    gate = self
                        .changed
                        .wait(gate)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
            self.inner.render(page, dims, variant)
        }
    }

    /// Panics on the given pages, renders the rest
    pub struct PanickingBackend {
        pages: Vec<usize>,
        inner: SyntheticRenderer,
    }

    impl PanickingBackend {
        pub fn new(pages: impl IntoIterator<Item = usize>) -> Self {
            Self {
                pages: pages.into_iter().collect(),
                inner: SyntheticRenderer::new(),
            }
        }
    }

    impl RenderBackend for PanickingBackend {
        fn render(
            &self,
            page: PageRef,
            dims: Dimensions,
            variant: PageVariant,
        ) -> Result<Surface, RenderError> {
            if self.pages.contains(&page.index) {
                panic!("backend exploded on page {}", page.index);
            }
            self.inner.render(page, dims, variant)
        }
    }

    /// Builder for a cache over a synthetic document
    pub struct CacheBuilder {
        pages: usize,
        notes: bool,
        config: CacheConfig,
    }

    impl CacheBuilder {
        pub fn new(pages: usize) -> Self {
            Self {
                pages,
                notes: false,
                config: CacheConfig {
                    capacity: CapacityPolicy::default(),
                    workers: 1,
                    window: PrerenderWindow::default(),
                },
            }
        }

        /// Pages carry notes on their right half
        pub fn with_notes(mut self) -> Self {
            self.notes = true;
            self
        }

        pub fn workers(mut self, workers: usize) -> Self {
            self.config.workers = workers;
            self
        }

        /// Fixed per-viewport page capacity
        pub fn max_pages(mut self, pages: usize) -> Self {
            if let Some(pages) = NonZeroUsize::new(pages) {
                self.config.capacity = CapacityPolicy::Pages(pages);
            }
            self
        }

        pub fn window(mut self, ahead: usize, behind: usize) -> Self {
            self.config.window = PrerenderWindow::new(ahead, behind);
            self
        }

        pub fn document(&self) -> Arc<dyn PageSource> {
            if self.notes {
                Arc::new(SyntheticDocument::with_notes(self.pages))
            } else {
                Arc::new(SyntheticDocument::new(self.pages))
            }
        }

        pub fn build(self, backend: Arc<dyn RenderBackend>) -> SurfaceCache {
            SurfaceCache::with_config(self.document(), backend, self.config)
        }
    }
}
