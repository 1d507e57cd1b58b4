use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to turn a playlist or EPG source into data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The source could not be retrieved: unreachable host, exhausted
    /// retries, error status, or a local file that cannot be read.
    #[error("cannot retrieve {location}: {reason}")]
    Network { location: String, reason: String },

    /// The source was retrieved but holds no usable entries.
    #[error("invalid content in {location}: {reason}")]
    Format { location: String, reason: String },
}

impl LoadError {
    pub fn network(location: impl Into<String>, reason: impl ToString) -> Self {
        LoadError::Network {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn format(location: impl Into<String>, reason: impl ToString) -> Self {
        LoadError::Format {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn location(&self) -> &str {
        match self {
            LoadError::Network { location, .. } | LoadError::Format { location, .. } => location,
        }
    }
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WriteError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WriteError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Outcome of a failed stream probe. Recorded on the channel, never
/// returned from a batch check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("unreachable: {0}")]
    Unreachable(String),
}
