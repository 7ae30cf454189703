pub mod panic_handler;
pub mod settings;
pub mod surface;
pub mod synthetic;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use surface::{
    CacheConfig, CacheError, CacheStats, PageVariant, RenderError, SurfaceCache,
};
