//! Logging for the driver.
//!
//! The crates log through `tracing` macros. Where those events go is decided
//! by a [`Logger`], which the [`Manager`](crate::Manager) receives at
//! construction and enters around every operation. A logger either inherits
//! whatever subscriber the application installed, or carries its own
//! dispatcher built from environment variables.
//!
//! # Environment Variables
//!
//! - `TERN_DEBUG=true` or `TERN_DEBUG=1` - Enable debug logging
//! - `TERN_LOG_LEVEL=debug|info|warn|error|trace` - Set specific log level
//! - `TERN_LOG_FORMAT=json|pretty|compact` - Set output format (default: json)
//!
//! # Usage
//!
//! ```rust,no_run
//! use tern_driver::logging::{self, Logger};
//!
//! // Process-wide subscriber (call once at startup)
//! logging::init();
//!
//! // Or a logger scoped to one manager
//! let logger = Logger::stderr("debug");
//! ```

use std::env;
use std::fmt;
use std::sync::Once;

use tracing::Dispatch;

static INIT: Once = Once::new();

const DEBUG_VAR: &str = "TERN_DEBUG";
const LEVEL_VAR: &str = "TERN_LOG_LEVEL";
const FORMAT_VAR: &str = "TERN_LOG_FORMAT";

/// Check if debug logging is enabled via `TERN_DEBUG`.
///
/// Returns `true` if `TERN_DEBUG` is set to "true", "1", or "yes" (case-insensitive).
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var(DEBUG_VAR)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

fn level_from(value: Option<&str>, debug: bool) -> &'static str {
    let fallback = if debug { "debug" } else { "warn" };
    match value.map(str::to_lowercase).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("info") => "info",
        Some("warn") => "warn",
        Some("error") => "error",
        _ => fallback,
    }
}

fn format_from(value: Option<&str>) -> &'static str {
    match value.map(str::to_lowercase).as_deref() {
        Some("pretty") => "pretty",
        Some("compact") => "compact",
        _ => "json",
    }
}

/// The log level from `TERN_LOG_LEVEL`.
///
/// Defaults to "debug" if `TERN_DEBUG` is enabled, otherwise "warn".
pub fn get_log_level() -> &'static str {
    level_from(env::var(LEVEL_VAR).ok().as_deref(), is_debug_enabled())
}

/// The log format from `TERN_LOG_FORMAT`; defaults to "json".
pub fn get_log_format() -> &'static str {
    format_from(env::var(FORMAT_VAR).ok().as_deref())
}

fn logging_requested() -> bool {
    is_debug_enabled() || env::var(LEVEL_VAR).is_ok()
}

#[cfg(feature = "tracing-subscriber")]
fn build_dispatch(level: &str, format: &str) -> Dispatch {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_new(format!(
        "tern={},tern_driver={},tern_bson={}",
        level, level, level
    ))
    .unwrap_or_else(|_| EnvFilter::new("warn"));

    match format {
        "json" => Dispatch::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr)),
        ),
        "compact" => Dispatch::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(std::io::stderr)),
        ),
        _ => Dispatch::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr)),
        ),
    }
}

#[cfg(not(feature = "tracing-subscriber"))]
fn build_dispatch(_level: &str, _format: &str) -> Dispatch {
    // Without a subscriber implementation events go to the global default.
    tracing::dispatcher::get_default(Dispatch::clone)
}

/// Where a manager's log events go.
#[derive(Clone, Default)]
pub struct Logger {
    dispatch: Option<Dispatch>,
}

impl Logger {
    /// Use whatever subscriber is current on the calling thread.
    pub fn inherit() -> Self {
        Self::default()
    }

    /// Discard all events.
    pub fn disabled() -> Self {
        Self {
            dispatch: Some(Dispatch::none()),
        }
    }

    /// Use an explicit dispatcher.
    pub fn from_dispatch(dispatch: Dispatch) -> Self {
        Self {
            dispatch: Some(dispatch),
        }
    }

    /// Log to stderr at `level` in the format named by `TERN_LOG_FORMAT`.
    pub fn stderr(level: &str) -> Self {
        let level = level_from(Some(level), false);
        Self::from_dispatch(build_dispatch(level, get_log_format()))
    }

    /// Build from `TERN_DEBUG`, `TERN_LOG_LEVEL` and `TERN_LOG_FORMAT`.
    ///
    /// Inherits the current subscriber when none of them ask for logging.
    pub fn from_env() -> Self {
        if !logging_requested() {
            return Self::inherit();
        }
        Self::from_dispatch(build_dispatch(get_log_level(), get_log_format()))
    }

    /// Whether this logger installs its own dispatcher.
    pub fn is_scoped(&self) -> bool {
        self.dispatch.is_some()
    }

    /// Run `f` with this logger's dispatcher as the thread default.
    ///
    /// The previous default is restored when `f` returns.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("scoped", &self.is_scoped())
            .finish()
    }
}

/// Install a process-wide subscriber from the environment.
///
/// Subsequent calls are no-ops; nothing is installed when neither
/// `TERN_DEBUG` nor `TERN_LOG_LEVEL` is set.
pub fn init() {
    INIT.call_once(|| {
        if !logging_requested() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            let level = get_log_level();
            let dispatch = build_dispatch(level, get_log_format());
            if tracing::dispatcher::set_global_default(dispatch).is_ok() {
                tracing::info!(
                    level = level,
                    format = get_log_format(),
                    "tern logging initialized"
                );
            }
        }
    });
}
