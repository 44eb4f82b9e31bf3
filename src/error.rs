//! Error types for the aggregate pipeline.

use std::fmt;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing table, missing join/group column, bad settings. Fatal before any output.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The table source has no table registered under this logical name
    #[error("Table not found: {0}")]
    NotFound(String),

    /// A table is missing a required column or carries an unsupported type
    #[error("Schema error: {0}")]
    Schema(String),

    /// A numeric aggregation was requested over a non-numeric column
    #[error("Cannot {function} column '{column}' of type {data_type}")]
    AggregationType {
        function: &'static str,
        column: String,
        data_type: String,
    },

    /// A value could not be interpreted (e.g. an unparseable timestamp key)
    #[error("Invalid value in column '{column}': {detail}")]
    InvalidValue { column: String, detail: String },

    #[error("Loading table '{table}' failed: {source}")]
    Load {
        table: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("Join '{join}' failed: {source}")]
    Join {
        join: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("Aggregate '{aggregate}' failed: {source}")]
    Aggregate {
        aggregate: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("Writing aggregate '{aggregate}' failed: {source}")]
    Storage {
        aggregate: String,
        #[source]
        source: StorageError,
    },

    #[error("Result set is incomplete, missing: {}", .0.join(", "))]
    Incomplete(Vec<String>),

    #[error("Aggregate '{0}' was produced twice")]
    DuplicateResult(String),

    #[error("{} stage(s) failed: {}", .0.len(), FailureList(.0))]
    Failed(Vec<PipelineError>),

    #[error("Job lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Run cancelled")]
    Cancelled,
}

struct FailureList<'a>(&'a [PipelineError]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl PipelineError {
    /// Create a configuration error
    pub fn configuration<E: fmt::Display>(err: E) -> Self {
        Self::Configuration(err.to_string())
    }

    /// Create a schema error
    pub fn schema<E: fmt::Display>(err: E) -> Self {
        Self::Schema(err.to_string())
    }

    pub fn in_load(self, table: &str) -> Self {
        Self::Load {
            table: table.to_string(),
            source: Box::new(self),
        }
    }

    pub fn in_join(self, join: &str) -> Self {
        Self::Join {
            join: join.to_string(),
            source: Box::new(self),
        }
    }

    pub fn in_aggregate(self, aggregate: &str) -> Self {
        Self::Aggregate {
            aggregate: aggregate.to_string(),
            source: Box::new(self),
        }
    }

    /// Name of the aggregate this error is attributed to, if any
    pub fn aggregate(&self) -> Option<&str> {
        match self {
            Self::Aggregate { aggregate, .. } | Self::Storage { aggregate, .. } => {
                Some(aggregate)
            }
            _ => None,
        }
    }

    /// Whether this error, or any error it wraps, is a configuration error
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Configuration(_) => true,
            Self::Load { source, .. }
            | Self::Join { source, .. }
            | Self::Aggregate { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}

impl From<arrow2::error::Error> for PipelineError {
    fn from(err: arrow2::error::Error) -> Self {
        Self::Schema(err.to_string())
    }
}

/// Storage error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parquet encoding or decoding failed
    #[error("Parquet error: {0}")]
    Parquet(String),

    /// Location cannot be handled by this sink
    #[error("Invalid location: {0}")]
    InvalidLocation(String),
}

impl StorageError {
    pub fn parquet<E: fmt::Display>(err: E) -> Self {
        Self::Parquet(err.to_string())
    }
}

impl From<arrow2::error::Error> for StorageError {
    fn from(err: arrow2::error::Error) -> Self {
        Self::Parquet(err.to_string())
    }
}
