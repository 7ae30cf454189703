use log::error;
use std::panic;

/// Install verbose backtraces and make sure panics reach the log file.
///
/// Backend panics inside prerender workers are caught per job, so the hook
/// must not terminate the process.
pub fn initialize_panic_handler() {
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let thread = std::thread::current();
        error!(
            "Panic on thread {}: {panic_info}",
            thread.name().unwrap_or("<unnamed>")
        );
        default_hook(panic_info);
    }));
}
