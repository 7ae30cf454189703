use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use simplelog::{Config, LevelFilter, WriteLogger};

use slidecache::panic_handler::initialize_panic_handler;
use slidecache::settings::load_settings;
use slidecache::surface::{
    Command, Dimensions, PageRef, PageSource, PageVariant, RenderBackend, SurfaceCache,
    ViewportId,
};
use slidecache::synthetic::{SyntheticDocument, SyntheticRenderer};

const CONSOLE: &str = "c_da";
const PRESENTER_CURRENT: &str = "p_da_cur";
const PRESENTER_NEXT: &str = "p_da_next";
const PRESENTER_NOTES: &str = "p_da_notes";

/// Drive the surface cache through a simulated presentation
#[derive(Parser, Debug)]
#[command(name = "slidecache", version, about, long_about = None)]
struct Cli {
    /// Number of pages in the synthetic document
    #[arg(long, default_value_t = 30)]
    pages: usize,

    /// Console viewport width in pixels
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Console viewport height in pixels
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Pages carry speaker notes on their right half
    #[arg(long)]
    notes: bool,

    /// Number of slide advances to simulate
    #[arg(long, default_value_t = 12)]
    steps: usize,

    /// Artificial cost of every page render
    #[arg(long, default_value_t = 5)]
    render_delay_ms: u64,

    /// Time spent on each slide before advancing
    #[arg(long, default_value_t = 40)]
    dwell_ms: u64,

    /// Page that always fails to render (repeatable)
    #[arg(long = "fail-page")]
    fail_pages: Vec<usize>,

    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "slidecache.log")]
    log_file: PathBuf,

    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,

    /// Background render threads, overrides the settings file
    #[arg(long)]
    workers: Option<usize>,
}

/// Console plus presenter screen, the way a two-monitor talk is laid out
struct Presentation {
    cache: SurfaceCache,
    notes_mode: bool,
    /// First page, used to fit viewports to the slide shape
    page: Option<PageRef>,
    window: Dimensions,
}

impl Presentation {
    fn new(cache: SurfaceCache, page: Option<PageRef>, cli: &Cli) -> Result<Self> {
        let mut presentation = Self {
            cache,
            notes_mode: cli.notes,
            page,
            window: Dimensions::new(cli.width, cli.height),
        };
        let slide = presentation.slide_variant();
        let cache = &mut presentation.cache;

        cache.configure_viewport(CONSOLE, slide, None)?;
        // Presenter's current slide is the same picture as the console
        cache.configure_viewport(PRESENTER_CURRENT, slide, Some(CONSOLE))?;
        cache.configure_viewport(PRESENTER_NEXT, slide, None)?;
        cache.add_viewport(PRESENTER_NOTES, PageVariant::NotesHalf, None, cli.notes)?;

        let layout = presentation.layout();
        presentation.cache.apply(layout)?;
        Ok(presentation)
    }

    /// Largest size inside `width` x `height` with the shape of the region `variant` shows
    fn fitted(&self, variant: PageVariant, width: u32, height: u32) -> Dimensions {
        let Some(page) = self.page else {
            return Dimensions::new(width, height);
        };
        let aspect = page.aspect_ratio(variant);
        let fit_height = (width as f32 / aspect).round() as u32;
        if fit_height <= height {
            Dimensions::new(width, fit_height)
        } else {
            Dimensions::new((height as f32 * aspect).round() as u32, height)
        }
    }

    fn layout(&self) -> Vec<Command> {
        let slide = self.slide_variant();
        let Dimensions { width, height } = self.window;
        [
            (CONSOLE, self.fitted(slide, width, height)),
            (PRESENTER_NEXT, self.fitted(slide, width / 2, height / 2)),
            (
                PRESENTER_NOTES,
                self.fitted(PageVariant::NotesHalf, width / 2, height),
            ),
        ]
        .into_iter()
        .map(|(id, dims)| Command::Resize {
            id: ViewportId::new(id),
            dims,
        })
        .collect()
    }

    fn resize_window(&mut self, width: u32, height: u32) -> Result<()> {
        info!("Window resized to {width}x{height}");
        self.window = Dimensions::new(width, height);
        let layout = self.layout();
        self.cache.apply(layout)?;
        Ok(())
    }

    fn slide_variant(&self) -> PageVariant {
        if self.notes_mode {
            PageVariant::ContentHalf
        } else {
            PageVariant::Full
        }
    }

    /// Switch notes mode on or off as one batch
    fn toggle_notes(&mut self) -> Result<()> {
        self.notes_mode = !self.notes_mode;
        let slide = self.slide_variant();
        info!("Notes mode {}", if self.notes_mode { "on" } else { "off" });

        let mut batch = vec![
            Command::SetVariant {
                id: ViewportId::new(CONSOLE),
                variant: slide,
            },
            Command::SetVariant {
                id: ViewportId::new(PRESENTER_NEXT),
                variant: slide,
            },
            Command::SetEnabled {
                id: ViewportId::new(PRESENTER_NOTES),
                enabled: self.notes_mode,
            },
        ];
        batch.extend(self.layout());
        let queued = self.cache.apply(batch)?;
        debug!("Mode switch queued {} prerenders", queued.len());
        Ok(())
    }

    fn go_to(&mut self, page: usize) {
        let queued = self.cache.on_navigate(page);
        debug!("Page {page}: queued {} prerenders", queued.len());
    }

    /// Paint every visible viewport, returning how many were cache hits
    fn paint(&self) -> usize {
        let page = self.cache.current_page();
        let mut visible = vec![(CONSOLE, page), (PRESENTER_CURRENT, page)];
        if page + 1 < self.cache.page_count() {
            visible.push((PRESENTER_NEXT, page + 1));
        }
        if self.notes_mode {
            visible.push((PRESENTER_NOTES, page));
        }

        let mut hits = 0;
        for (viewport, page) in visible {
            if self.cache.get(viewport, page).is_some() {
                hits += 1;
                continue;
            }
            if let Err(e) = self.cache.render_with_backend(viewport, page) {
                warn!("Painting page {page} on {viewport} failed: {e}");
            }
        }
        hits
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    WriteLogger::init(
        cli.log_level,
        Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("creating log file {}", cli.log_file.display()))?,
    )?;
    initialize_panic_handler();

    info!("Starting slidecache");

    let mut settings = load_settings(cli.config.as_deref());
    if let Some(workers) = cli.workers {
        settings.workers = workers;
    }
    let config = settings.cache_config();

    let document: Arc<dyn PageSource> = if cli.notes {
        Arc::new(SyntheticDocument::with_notes(cli.pages))
    } else {
        Arc::new(SyntheticDocument::new(cli.pages))
    };
    let backend: Arc<dyn RenderBackend> = Arc::new(
        SyntheticRenderer::new()
            .with_delay(Duration::from_millis(cli.render_delay_ms))
            .with_failing_pages(cli.fail_pages.iter().copied()),
    );

    let first_page = document.page_ref(0);
    let cache = SurfaceCache::with_config(document, backend, config);
    let mut presentation = Presentation::new(cache, first_page, &cli)?;

    let started = Instant::now();
    let mut painted_hits = 0;
    presentation.go_to(0);
    presentation.paint();

    for step in 1..=cli.steps {
        if step == cli.steps / 2 {
            presentation.resize_window(cli.width * 3 / 4, cli.height * 3 / 4)?;
        }
        if cli.notes && step == cli.steps * 2 / 3 {
            presentation.toggle_notes()?;
        }

        thread::sleep(Duration::from_millis(cli.dwell_ms));
        let page = (presentation.cache.current_page() + 1).min(cli.pages.saturating_sub(1));
        presentation.go_to(page);
        painted_hits += presentation.paint();
    }

    if !presentation.cache.wait_idle(Duration::from_secs(5)) {
        warn!(
            "Prerendering still busy after 5s, {} jobs left",
            presentation.cache.stats().in_flight
        );
    }

    let stats = presentation.cache.stats();
    info!("Finished in {:?}: {stats:?}", started.elapsed());

    println!("pages painted from cache: {painted_hits}");
    println!("entries:         {}", stats.entries);
    println!("surface memory:  {} KiB", stats.memory_bytes / 1024);
    println!("hits / misses:   {} / {}", stats.hits, stats.misses);
    println!("hit rate:        {:.1}%", stats.hit_rate() * 100.0);
    println!("prerendered:     {}", stats.prerendered);
    println!("miss fills:      {}", stats.miss_fills);
    println!("evictions:       {}", stats.evictions);
    println!("stale writes:    {}", stats.stale_writes);
    println!("render failures: {}", stats.render_failures);

    info!("Shutting down slidecache");
    Ok(())
}
