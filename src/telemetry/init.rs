// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subscriber installation.
//!
//! Logs always go to stderr so command output on stdout stays machine-readable.

use std::io;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Configuration for telemetry initialization.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level used when neither RUST_LOG nor a directive is set.
    pub default_level: Level,

    /// Emit span close events (with busy/idle timings).
    pub include_span_events: bool,

    /// Include file/line information.
    pub include_file_line: bool,

    /// Use ANSI colors.
    pub ansi_colors: bool,

    /// Use the compact formatter.
    pub compact: bool,

    /// Filter directive that overrides RUST_LOG.
    pub filter_directive: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: Level::WARN,
            include_span_events: false,
            include_file_line: false,
            ansi_colors: true,
            compact: true,
            filter_directive: None,
        }
    }
}

impl TelemetryConfig {
    /// Verbose output for local debugging.
    pub fn development() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_span_events: true,
            include_file_line: true,
            ansi_colors: true,
            compact: false,
            filter_directive: None,
        }
    }

    /// Minimal uncolored output for services.
    pub fn production() -> Self {
        Self {
            default_level: Level::WARN,
            ansi_colors: false,
            ..Self::default()
        }
    }

    /// Trace everything from this crate.
    pub fn testing() -> Self {
        Self {
            default_level: Level::TRACE,
            include_span_events: true,
            include_file_line: true,
            ansi_colors: false,
            compact: false,
            filter_directive: Some("troupe=trace".to_string()),
        }
    }

    /// Map a `-v` count to a config: 0 warn, 1 info, 2 debug, 3+ trace.
    pub fn from_verbosity(verbosity: u8) -> Self {
        let level = match verbosity {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self::default().with_level(level)
    }

    /// Set the default log level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Set a custom filter directive.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_directive = Some(filter.into());
        self
    }

    /// Enable or disable ANSI colors.
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi_colors = ansi;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.default_level.to_string());
        match &self.filter_directive {
            Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Handle returned by [`init_telemetry`].
pub struct TelemetryGuard {
    _private: (),
}

/// Install the global subscriber. Call once at startup.
///
/// ```rust,ignore
/// use troupe::telemetry::{init_telemetry, TelemetryConfig};
///
/// let _guard = init_telemetry(&TelemetryConfig::from_verbosity(1))?;
/// ```
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let span_events = if config.include_span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi_colors)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_span_events(span_events);

    let registry = tracing_subscriber::registry().with(config.env_filter());
    let installed = if config.compact {
        registry.with(fmt_layer.compact()).try_init()
    } else {
        registry.with(fmt_layer).try_init()
    };
    installed.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    Ok(TelemetryGuard { _private: () })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(TelemetryConfig::from_verbosity(0).default_level, Level::WARN);
        assert_eq!(TelemetryConfig::from_verbosity(1).default_level, Level::INFO);
        assert_eq!(TelemetryConfig::from_verbosity(2).default_level, Level::DEBUG);
        assert_eq!(TelemetryConfig::from_verbosity(9).default_level, Level::TRACE);
    }

    #[test]
    fn test_presets() {
        assert!(TelemetryConfig::development().include_span_events);
        assert!(!TelemetryConfig::production().ansi_colors);
        assert_eq!(
            TelemetryConfig::testing().filter_directive.as_deref(),
            Some("troupe=trace")
        );
    }

    #[test]
    fn test_builder() {
        let config = TelemetryConfig::default()
            .with_level(Level::DEBUG)
            .with_filter("troupe::bridge=trace")
            .with_ansi(false);

        assert_eq!(config.default_level, Level::DEBUG);
        assert_eq!(config.filter_directive.as_deref(), Some("troupe::bridge=trace"));
        assert!(!config.ansi_colors);
    }
}
