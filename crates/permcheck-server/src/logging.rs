//! Process observability: structured logging and metric descriptions.
//!
//! [`init_observability`] is the bootstrap entry point. It turns the
//! `logging` section of a [`ServerConfig`] into a [`LoggingConfig`],
//! installs the global `tracing` subscriber and describes the check cache
//! counters. `RUST_LOG` wins over the configured default level.
//!
//! ```ignore
//! use permcheck_server::{init_observability, ServerConfig};
//!
//! let config = ServerConfig::load(Some("permcheck.yaml"))?;
//! init_observability(&config)?;
//! ```

use permcheck_domain::cache::register_check_cache_metrics;
use tracing::{debug, Level, Subscriber};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    prelude::*,
    layer::Layered,
    registry::LookupSpan,
    EnvFilter, Layer, Registry,
};

use crate::config::{ConfigLoadError, ServerConfig};

/// Configuration for structured logging.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// JSON lines (true) or human readable text (false)
    pub json_format: bool,
    /// The default log level if RUST_LOG is not set
    pub default_level: Level,
    /// Emit span enter/exit events, e.g. for every `check` span
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_format: false,
            default_level: Level::INFO,
            include_spans: false,
        }
    }
}

impl LoggingConfig {
    pub fn json() -> Self {
        Self {
            json_format: true,
            ..Default::default()
        }
    }

    pub fn text() -> Self {
        Self {
            json_format: false,
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.include_spans = true;
        self
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::ENTER | FmtSpan::EXIT
        } else {
            FmtSpan::NONE
        }
    }

    /// The `fmt` layer for this config, writing to `writer`.
    fn layer<S, W>(&self, writer: W) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        if self.json_format {
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_span_events(self.span_events())
                .with_current_span(true)
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .boxed()
        } else {
            fmt::layer()
                .pretty()
                .with_writer(writer)
                .with_span_events(self.span_events())
                .with_target(true)
                .boxed()
        }
    }

    /// Registry with `filter` and this config's `fmt` layer.
    fn subscriber<W>(&self, filter: EnvFilter, writer: W) -> impl Subscriber + Send + Sync
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        let registry = tracing_subscriber::registry().with(filter);
        let layer: Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync> = self.layer(writer);
        registry.with(layer)
    }
}

/// Installs the global subscriber, writing to stdout.
///
/// Returns false when a global subscriber was already set; the first one
/// stays in place.
pub fn init_logging(config: LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.to_string()));
    tracing::subscriber::set_global_default(config.subscriber(filter, std::io::stdout)).is_ok()
}

/// Bootstraps logging and metric descriptions from a loaded config.
///
/// An invalid `logging.level` is rejected before anything is installed.
pub fn init_observability(config: &ServerConfig) -> Result<bool, ConfigLoadError> {
    let logging = config.logging_config()?;
    let installed = init_logging(logging);
    register_check_cache_metrics();
    debug!(installed, "observability initialized");
    Ok(installed)
}
