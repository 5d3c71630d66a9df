use chrono::Utc;
use log::LevelFilter;

pub mod config;
pub mod digest;
pub mod error;
pub mod job;
pub mod notifier;
pub mod package;
pub mod provision;
pub mod search;

pub use config::NotifyConfig;
pub use error::{Error, Result};

pub const APP_NAME: &str = "clubhouse_duedates";

/// Logs this crate and `calling_module` at `Info` (`Debug` if `verbose`),
/// everything else at `Warn`.
///
/// Warm Lambda invocations call this again; a logger that is already
/// installed is kept.
pub fn set_up_logger(calling_module: &'static str, verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let result = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] [{}] {}",
                Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(LevelFilter::Warn)
        .level_for(APP_NAME, level)
        .level_for(calling_module, level)
        .chain(std::io::stdout())
        .apply();

    if result.is_err() {
        log::debug!("Logger already initialized");
    }

    Ok(())
}
