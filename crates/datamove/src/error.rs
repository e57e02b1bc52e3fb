//! Error types for the transfer engine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Stage of a pooled transfer that waited too long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    /// Producer blocked reading the next row from the source.
    SourceRead,
    /// Producer blocked putting a row into a full channel.
    ProducerWait,
    /// Consumer blocked taking a row from an empty channel.
    ConsumerDrain,
    /// Consumer pool did not finish after the producer completed.
    PoolShutdown,
}

impl fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeoutStage::SourceRead => "source read",
            TimeoutStage::ProducerWait => "producer wait",
            TimeoutStage::ConsumerDrain => "consumer drain",
            TimeoutStage::PoolShutdown => "pool shutdown",
        };
        f.write_str(s)
    }
}

/// Main error type for transfer operations.
///
/// The type is `Clone` so one failure can be recorded on a listener and
/// still be propagated to the caller.
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    /// Configuration error (invalid properties, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source data path does not exist
    #[error("Source {0} does not exist")]
    MissingSource(String),

    /// Source column has no counterpart in the target
    #[error("Column {column} of source {source_path} is missing in target {target}")]
    ColumnMismatch {
        source_path: String,
        target: String,
        column: String,
    },

    /// Source column type is excluded from transfers
    #[error("Column {column} of {path} has unsupported type {data_type}")]
    UnsupportedType {
        path: String,
        column: String,
        data_type: String,
    },

    /// Requested more concurrent writers than the target allows
    #[error("Target {target} accepts at most {max} concurrent writers, {requested} requested")]
    WorkerLimit {
        target: String,
        requested: usize,
        max: usize,
    },

    /// Foreign-key graph contains a cycle
    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// Read or write cursor failure
    #[error("Cursor error on {path}: {message}")]
    Cursor { path: String, message: String },

    /// Transfer failed for a specific unit
    #[error("Transfer failed for {path}: {message}")]
    Transfer { path: String, message: String },

    /// A bounded wait expired
    #[error("Timed out after {timeout:?} during {stage}")]
    Timeout {
        stage: TimeoutStage,
        timeout: Duration,
    },

    /// IO error (metrics sink, config files)
    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[source] Arc<serde_yaml::Error>),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[source] Arc<serde_json::Error>),

    /// Work stopped because a sibling worker failed
    #[error("Transfer cancelled")]
    Cancelled,
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        TransferError::Io(Arc::new(e))
    }
}

impl From<serde_yaml::Error> for TransferError {
    fn from(e: serde_yaml::Error) -> Self {
        TransferError::Yaml(Arc::new(e))
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(e: serde_json::Error) -> Self {
        TransferError::Json(Arc::new(e))
    }
}

impl TransferError {
    /// Create a Cursor error
    pub fn cursor(path: impl Into<String>, message: impl Into<String>) -> Self {
        TransferError::Cursor {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(path: impl Into<String>, message: impl Into<String>) -> Self {
        TransferError::Transfer {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a Timeout error
    pub fn timeout(stage: TimeoutStage, timeout: Duration) -> Self {
        TransferError::Timeout { stage, timeout }
    }

    /// Whether this error is raised before any row moves.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TransferError::Config(_)
                | TransferError::MissingSource(_)
                | TransferError::ColumnMismatch { .. }
                | TransferError::UnsupportedType { .. }
                | TransferError::WorkerLimit { .. }
                | TransferError::DependencyCycle(_)
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        if self.is_configuration() {
            2
        } else {
            match self {
                TransferError::Timeout { .. } => 3,
                TransferError::Cancelled => 130,
                _ => 1,
            }
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;
