//! Error types for the stream aggregator service

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors establishing or reading the feed connection.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("feed source unreachable at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Errors writing snapshot artifacts.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV encoding error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl PublishError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PublishError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        PublishError::Csv {
            path: path.into(),
            source,
        }
    }
}

/// Invalid service configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}

/// Failures that stop the trigger loop.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("trigger task did not complete: {0}")]
    TriggerTask(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_names_address() {
        let err = FeedError::Connect {
            addr: "localhost:9999".to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        let msg = err.to_string();
        assert!(msg.contains("localhost:9999"));
        assert!(msg.contains("refused"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Zero { field: "workers" };
        assert_eq!(err.to_string(), "workers must be greater than zero");
    }
}
