//! Crate-level error type.

use std::path::PathBuf;

/// Errors surfaced by the probe status library.
///
/// Ingestion-path failures (full queues, invalid events, dropped targets) are
/// never returned to producers; they are logged and counted instead. This
/// enum covers the failures a caller can act on: configuration, rendering,
/// serving and talking to a stopped actor.
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    /// The configuration file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`crate::config::SurfacerConfig`].
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A configuration value is out of range.
    #[error("invalid config field '{field}': {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// The dashboard renderer failed to produce a page.
    #[error("failed to render dashboard: {0}")]
    Render(String),

    /// The actor loop has exited; queries can no longer be answered.
    #[error("probe status actor has stopped")]
    Stopped,

    /// A handler is already registered for this path.
    #[error("a handler is already registered for '{0}'")]
    DuplicateRoute(String),

    /// Socket-level failure in the HTTP server or the ingest feed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<std::fmt::Error> for StatusError {
    fn from(e: std::fmt::Error) -> Self {
        StatusError::Render(e.to_string())
    }
}
