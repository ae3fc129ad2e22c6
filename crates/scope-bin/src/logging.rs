//! Subscriber setup for the `scope` binary.
//!
//! `RUST_LOG` selects what is logged (default `info`); the output format is
//! chosen on the command line.

use anyhow::{anyhow, Result};
use clap::ValueEnum;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const DEFAULT_FILTER: &str = "info";

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Multi-line, coloured (interactive use)
    #[default]
    Pretty,
    /// One line per event, no colour
    Compact,
    /// Newline-delimited JSON (log collection)
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct LoggingOptions {
    pub format: OutputFormat,
    /// Log span open/close, e.g. around each autofocus or transition.
    pub span_events: bool,
    pub ansi: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Pretty,
            span_events: false,
            ansi: true,
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Calling it twice is not an error.
pub fn init(options: LoggingOptions) -> Result<()> {
    let span_events = if options.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match options.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_thread_names(true)
            .with_ansi(options.ansi)
            .with_filter(env_filter())
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_target(true)
            .with_ansi(false)
            .with_filter(env_filter())
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_current_span(true)
            .with_filter(env_filter())
            .boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(anyhow!("failed to initialize logging: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_parse_from_the_command_line() {
        assert_eq!(
            OutputFormat::from_str("json", true).unwrap(),
            OutputFormat::Json
        );
        assert_eq!(
            OutputFormat::from_str("Compact", true).unwrap(),
            OutputFormat::Compact
        );
        assert!(OutputFormat::from_str("xml", true).is_err());
    }

    #[test]
    fn init_is_idempotent() {
        let options = LoggingOptions {
            format: OutputFormat::Compact,
            ..LoggingOptions::default()
        };
        init(options).unwrap();
        init(options).unwrap();
    }
}
