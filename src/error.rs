//! Unified error handling for the siteward crate
//!
//! This module consolidates domain-specific errors into a single `Error`
//! enum while keeping the domain errors usable on their own.
//!
//! # Architecture
//!
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! Recoverability follows the failure taxonomy of the system: conversion
//! and store-contention errors are task-local and retried on the next
//! filesystem event; launch and configuration errors are not.

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::convert::ConvertError;
pub use crate::process::ProcessError;
pub use crate::render::RenderError;
pub use crate::watcher::WatchError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Process launch, supervision, and signalling errors
    Process,
    /// Filesystem watching errors
    Watch,
    /// Content conversion errors (front matter, markdown, media)
    Convert,
    /// Template resolution and rendering errors
    Render,
    /// Storage and I/O errors
    Store,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

/// Unified error type for the siteward crate
#[derive(Error, Debug)]
pub enum Error {
    /// Process lifecycle errors (launch, signal, probe)
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// Filesystem watcher errors
    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    /// Conversion errors
    #[error("Convert error: {0}")]
    Convert(#[from] ConvertError),

    /// Template rendering errors
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML front matter errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Check if this error is recoverable (eligible for retry)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Process(e) => e.is_recoverable(),
            Self::Watch(_) => true,
            Self::Convert(e) => e.is_recoverable(),
            Self::Render(_) => false,
            Self::Database(e) => is_busy(e),
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) | Self::Yaml(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Process(_) => ErrorCategory::Process,
            Self::Watch(_) => ErrorCategory::Watch,
            Self::Convert(_) => ErrorCategory::Convert,
            Self::Render(_) => ErrorCategory::Render,
            Self::Database(_) | Self::Io(_) => ErrorCategory::Store,
            Self::Json(_) | Self::Yaml(_) => ErrorCategory::Convert,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Whether a rusqlite error is lock contention worth retrying.
pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

// Conversion from rusqlite::Error
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
