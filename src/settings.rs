use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::surface::{CacheConfig, CapacityPolicy, PrerenderWindow, default_workers};
use crate::surface::{DEFAULT_PRERENDER_AHEAD, DEFAULT_PRERENDER_BEHIND};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "slidecache";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Fixed per-viewport page capacity; overrides the memory budget when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<usize>,

    #[serde(default = "default_memory_budget_mb")]
    pub memory_budget_mb: usize,

    #[serde(default = "default_prerender_ahead")]
    pub prerender_ahead: usize,

    #[serde(default = "default_prerender_behind")]
    pub prerender_behind: usize,

    /// Background render threads, 0 picks one per spare core
    #[serde(default)]
    pub workers: usize,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_memory_budget_mb() -> usize {
    512
}

fn default_prerender_ahead() -> usize {
    DEFAULT_PRERENDER_AHEAD
}

fn default_prerender_behind() -> usize {
    DEFAULT_PRERENDER_BEHIND
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            max_pages: None,
            memory_budget_mb: default_memory_budget_mb(),
            prerender_ahead: default_prerender_ahead(),
            prerender_behind: default_prerender_behind(),
            workers: 0,
        }
    }
}

impl Settings {
    /// Cache configuration these settings describe
    #[must_use]
    pub fn cache_config(&self) -> CacheConfig {
        let capacity = match self.max_pages.and_then(NonZeroUsize::new) {
            Some(pages) => CapacityPolicy::Pages(pages),
            None => CapacityPolicy::MemoryBudget(self.memory_budget_mb.saturating_mul(1024 * 1024)),
        };
        let workers = if self.workers == 0 {
            default_workers()
        } else {
            self.workers
        };

        CacheConfig {
            capacity,
            workers,
            window: PrerenderWindow::new(self.prerender_ahead, self.prerender_behind),
        }
    }
}

#[must_use]
pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load settings from `path`, or from the default location.
///
/// A missing file is created with defaults. Unreadable or invalid files are
/// logged and defaults are used.
#[must_use]
pub fn load_settings(path: Option<&Path>) -> Settings {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match preferred_config_path() {
            Some(path) => path,
            None => {
                warn!("Could not determine config directory, using default settings");
                return Settings::default();
            }
        },
    };

    if !path.exists() {
        info!("Settings file not found, creating with defaults at {path:?}");
        let settings = Settings::default();
        save_settings_to_file(&settings, &path);
        return settings;
    }

    load_settings_from_path(&path).unwrap_or_default()
}

fn load_settings_from_path(path: &Path) -> Option<Settings> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }
                Some(settings)
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
                None
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
            None
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );
    settings.version = CURRENT_VERSION;
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    let content = generate_settings_yaml(settings);

    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(&format!("version: {}\n", settings.version));
    content.push_str("\n# Pages kept per viewport. Leave unset to derive it from memory_budget_mb.\n");
    match settings.max_pages {
        Some(pages) => content.push_str(&format!("max_pages: {pages}\n")),
        None => content.push_str("# max_pages: 200\n"),
    }
    content.push_str(&format!(
        "memory_budget_mb: {}\n",
        settings.memory_budget_mb
    ));
    content.push_str("\n# Pages rendered in the background around the current one\n");
    content.push_str(&format!("prerender_ahead: {}\n", settings.prerender_ahead));
    content.push_str(&format!("prerender_behind: {}\n", settings.prerender_behind));
    content.push_str("\n# Background render threads (0 = one per spare core)\n");
    content.push_str(&format!("workers: {}\n", settings.workers));

    content
}
