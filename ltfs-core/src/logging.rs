//! Logging (C10): a keyed-message layer over the `log` crate.
//!
//! Every emission carries a 5-digit numeric id and one of the
//! `LTFS_*` severities (`ltfslogging.h`'s `ltfs_log_levels`), is formatted
//! with positional substitution, and prefixed `LTFS#####` before being
//! handed to `log::log!` at the mapped level. `init`/`finish` pick the
//! backend: `env_logger` for terminal use, `syslog` when a facility is
//! configured, matching the bin-by-bin choice the CLI binaries already
//! make.

use std::sync::Mutex;

use lazy_static::lazy_static;

/// Mirrors `ltfs_log_levels` from `ltfslogging.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Err,
    Warn,
    Info,
    Debug,
    Debug1,
    Debug2,
    Debug3,
    Trace,
}

impl Severity {
    fn to_log_level(self) -> log::Level {
        match self {
            Severity::Err => log::Level::Error,
            Severity::Warn => log::Level::Warn,
            Severity::Info => log::Level::Info,
            Severity::Debug | Severity::Debug1 | Severity::Debug2 | Severity::Debug3 => {
                log::Level::Debug
            }
            Severity::Trace => log::Level::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Plain stderr logging via `env_logger`, default for interactive use.
    Env,
    /// Syslog fan-out, for the daemon-style binaries.
    Syslog(syslog::Facility),
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub backend: Backend,
    pub level: log::LevelFilter,
    pub ident: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Env,
            level: log::LevelFilter::Info,
            ident: None,
        }
    }
}

lazy_static! {
    /// Serializes init/finish against concurrent callers; the `log` crate's
    /// global logger can only be installed once per process.
    static ref STATE: Mutex<bool> = Mutex::new(false);
}

/// Install the process-wide logger. Safe to call more than once; later
/// calls are no-ops once a logger is already installed.
pub fn init(config: &LoggingConfig) {
    let mut installed = STATE.lock().unwrap();
    if *installed {
        return;
    }

    let result = match config.backend {
        Backend::Env => {
            env_logger::Builder::from_default_env()
                .filter_level(config.level)
                .try_init()
                .map_err(|err| err.to_string())
        }
        Backend::Syslog(facility) => {
            syslog::init(facility, config.level, config.ident.as_deref())
                .map_err(|err| err.to_string())
        }
    };

    if let Err(err) = result {
        eprintln!("unable to initialize logging: {err}");
    }
    *installed = true;
}

/// Flush any buffered log output. `log`/`env_logger`/`syslog` all write
/// synchronously, so this only resets the init latch for tests that want
/// to reinitialize within the same process.
pub fn finish() {
    *STATE.lock().unwrap() = false;
}

/// Emit a keyed message: `LTFS#####I message text`, substituting `args`
/// positionally (`{}`-style, via `format!`) into `template` before logging
/// it at `severity`'s mapped level.
#[macro_export]
macro_rules! ltfs_log {
    ($severity:expr, $id:expr, $template:expr $(, $arg:expr)*) => {{
        let severity: $crate::logging::Severity = $severity;
        let level = severity.log_level();
        if log::log_enabled!(level) {
            log::log!(level, "LTFS{:05}: {}", $id, format!($template $(, $arg)*));
        }
    }};
}

impl Severity {
    pub fn log_level(self) -> log::Level {
        self.to_log_level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_maps_to_expected_log_level() {
        assert_eq!(Severity::Err.log_level(), log::Level::Error);
        assert_eq!(Severity::Debug3.log_level(), log::Level::Debug);
        assert_eq!(Severity::Trace.log_level(), log::Level::Trace);
    }

    #[test]
    fn init_is_idempotent() {
        let config = LoggingConfig::default();
        init(&config);
        init(&config);
        finish();
    }
}
