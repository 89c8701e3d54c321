//! Minimal stderr logger.
//!
//! Lines look like `[  0.012s DEBUG ibvs_core::calibration] message`.
//! Install once at startup with [`init_with_level`]; the crate itself only
//! emits through the `log` facade and works with any other logger too.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Writes each record as one line to stderr.
///
/// The level lives in the `log` facade (`log::max_level`), so it can be
/// changed after installation.
struct StderrLogger {
    started: Instant,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{:7.3}s {:>5} {}] {}",
            elapsed,
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger, or change its level if already installed.
///
/// Programs can call this with a default level before reading their config
/// and again with the configured level. Fails only if a different logger was
/// installed first.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| StderrLogger {
            started: Instant::now(),
        });
        log::set_logger(logger)?;
    }
    log::set_max_level(level);
    Ok(())
}

/// Install a `tracing` subscriber on stderr.
///
/// `RUST_LOG` takes precedence; otherwise `ibvs_core` logs at `level` and
/// everything else at `warn`. Records from the `log` macros are forwarded.
/// Spans are reported when they close, with their duration. With `json` each
/// event is one flattened JSON object. Only the first call has an effect.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, level: LevelFilter) {
    let directives = format!("warn,ibvs_core={}", level.as_str().to_ascii_lowercase());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .compact()
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_init_changes_the_level() {
        init_with_level(LevelFilter::Warn).unwrap();
        assert!(log::log_enabled!(log::Level::Warn));
        assert!(!log::log_enabled!(log::Level::Debug));

        init_with_level(LevelFilter::Debug).unwrap();
        assert!(log::log_enabled!(log::Level::Debug));
        assert!(!log::log_enabled!(log::Level::Trace));
        assert!(std::ptr::eq(
            log::logger() as *const dyn Log as *const (),
            LOGGER.get().unwrap() as *const StderrLogger as *const ()
        ));
    }
}
