/// Logging bootstrap.
///
/// The crate logs through the `log` facade only. On Android the `android`
/// feature routes it to logcat; other hosts install their own backend and
/// this just sets the max level.
use once_cell::sync::OnceCell;

static INIT: OnceCell<log::LevelFilter> = OnceCell::new();

pub const LOG_TAG: &str = "ClubChat";

/// Level used when the host doesn't pick one.
pub fn default_level() -> log::LevelFilter {
    if cfg!(feature = "debug-logs") {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    }
}

/// Initialise logging once. Later calls are ignored and return the level
/// chosen by the first one.
pub fn init_logging(level: log::LevelFilter) -> log::LevelFilter {
    *INIT.get_or_init(|| {
        install_backend(level);
        log::set_max_level(level);
        log::info!("ClubChat core v{} logging at {}", crate::VERSION, level);
        level
    })
}

#[cfg(feature = "android")]
fn install_backend(level: log::LevelFilter) {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(level)
            .with_tag(LOG_TAG),
    );
}

#[cfg(not(feature = "android"))]
fn install_backend(_level: log::LevelFilter) {}
