//! # Skein Logging
//!
//! Structured logging for mesh nodes, built on `tracing-subscriber`.
//!
//! - JSONL or pretty console output
//! - Optional rotating JSONL files through `tracing-appender`
//! - Node context on spans via [`NodeContextGuard`] and [`NodeContextLayer`]
//!
//! ```no_run
//! use skein_logging::{LogConfig, SkeinSubscriberBuilder};
//!
//! # fn main() -> Result<(), skein_logging::LoggingError> {
//! let _guard = SkeinSubscriberBuilder::with_config(LogConfig::development()).init()?;
//! tracing::info!(node = 42, "Node started");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod layers;

use std::path::PathBuf;

use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{NodeContextData, NodeContextGuard};
pub use layers::{NodeContextExtension, NodeContextLayer};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Errors raised while installing the subscriber
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("cannot create log directory {path}: {source}")]
    LogDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open log file: {0}")]
    Appender(#[from] InitError),

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Builder for the node's tracing subscriber
#[derive(Debug, Clone, Default)]
pub struct SkeinSubscriberBuilder {
    config: LogConfig,
}

impl SkeinSubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LogConfig) -> Self {
        Self { config }
    }

    /// Set the default filter directive
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool, pretty: bool) -> Self {
        self.config.console.enabled = enabled;
        self.config.console.pretty = pretty;
        self
    }

    /// Also write JSONL files into `directory`
    pub fn with_file_output(mut self, directory: PathBuf) -> Self {
        let file = self.config.file.get_or_insert_with(FileConfig::default);
        file.directory = directory;
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Build the subscriber without installing it
    ///
    /// The returned guard must be held for as long as file output should
    /// keep flushing.
    pub fn build(
        self,
    ) -> Result<
        (
            impl Subscriber + for<'a> LookupSpan<'a> + Send + Sync + 'static,
            Option<WorkerGuard>,
        ),
        LoggingError,
    > {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&self.config.default_level)?,
        };

        let mut outputs: Vec<BoxedLayer> = Vec::new();
        let console = &self.config.console;
        if console.enabled {
            if console.pretty {
                outputs.push(
                    fmt::layer()
                        .pretty()
                        .with_ansi(console.ansi)
                        .with_writer(std::io::stdout)
                        .boxed(),
                );
            } else {
                outputs.push(jsonl_layer(std::io::stdout, &self.config.jsonl));
            }
        }

        let mut guard = None;
        if let Some(file) = &self.config.file {
            let (writer, worker) = file_writer(file)?;
            outputs.push(jsonl_layer(writer, &self.config.jsonl));
            guard = Some(worker);
        }

        let subscriber = Registry::default()
            .with(outputs)
            .with(NodeContextLayer::new())
            .with(filter);
        Ok((subscriber, guard))
    }

    /// Build and install as the global subscriber
    pub fn init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let (subscriber, guard) = self.build()?;
        subscriber.try_init()?;
        Ok(guard)
    }
}

/// Install the testing preset, ignoring an already installed subscriber
pub fn init_testing() {
    let _ = SkeinSubscriberBuilder::with_config(LogConfig::testing()).init();
}

fn jsonl_layer<W>(writer: W, jsonl: &JsonlConfig) -> BoxedLayer
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .with_current_span(jsonl.include_current_span)
        .with_span_list(jsonl.include_spans)
        .flatten_event(jsonl.flatten_events)
        .with_file(jsonl.include_location)
        .with_line_number(jsonl.include_location)
        .with_thread_ids(jsonl.include_thread_info)
        .with_thread_names(jsonl.include_thread_info)
        .with_writer(writer)
        .boxed()
}

fn file_writer(file: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    std::fs::create_dir_all(&file.directory).map_err(|source| LoggingError::LogDirectory {
        path: file.directory.clone(),
        source,
    })?;

    let rotation = match file.rotation {
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
        RotationStrategy::Never => Rotation::NEVER,
    };
    let appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&file.prefix)
        .filename_suffix("jsonl")
        .build(&file.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_adjusts_config() {
        let builder = SkeinSubscriberBuilder::new()
            .with_level("trace")
            .with_console(true, true)
            .with_file_output(PathBuf::from("/tmp/skein-logs"));

        let config = builder.config();
        assert_eq!(config.default_level, "trace");
        assert!(config.console.pretty);
        assert_eq!(
            config.file.as_ref().map(|f| f.directory.clone()),
            Some(PathBuf::from("/tmp/skein-logs"))
        );
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        // RUST_LOG takes precedence when set, so only assert when it is not
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let result = SkeinSubscriberBuilder::new().with_level("skein_mesh=loud").build();
        assert!(matches!(result, Err(LoggingError::Filter(_))));
    }

    #[test]
    fn test_file_output_writes_jsonl_with_node_span() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let mut config = LogConfig::default();
        config.console.enabled = false;
        config.file = Some(FileConfig {
            directory: dir.path().to_path_buf(),
            prefix: "node".to_string(),
            rotation: RotationStrategy::Never,
        });

        let (subscriber, guard) = SkeinSubscriberBuilder::with_config(config).build().unwrap();
        tracing::subscriber::with_default(subscriber, || {
            let _node = NodeContextGuard::new(12);
            let span = tracing::info_span!("mesh", node = 12);
            span.in_scope(|| tracing::info!(peer = 34, "Link admitted"));
            tracing::debug!("filtered out");
        });
        drop(guard);

        let contents = std::fs::read_to_string(dir.path().join("node.jsonl")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Link admitted"));
        assert!(lines[0].contains("\"peer\":34"));
        assert!(lines[0].contains("\"mesh\""));
    }
}
