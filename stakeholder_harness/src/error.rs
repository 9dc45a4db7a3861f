//! Error types for the harness.
//!
//! Setup and task failures abort a scenario through `?`. A statistic outside
//! tolerance is not an error; it only becomes `Verification` once the final
//! report is asserted.

use std::path::PathBuf;
use thiserror::Error;
use tolerance::{ComparisonError, FitError};

/// Errors raised by an external toolkit backend.
#[derive(Error, Debug)]
pub enum ToolkitError {
    #[error("failed to launch toolkit helper {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("toolkit helper exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
    #[error("malformed toolkit response: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("{op} failed: {message}")]
    Operation { op: String, message: String },
    #[error("no statistics available for {0}")]
    NoStatistics(String),
}

/// Harness-level error taxonomy.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("setup failed: {0}")]
    Setup(String),
    #[error("staging {path} failed: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("imaging task failed for {imagename}: {source}")]
    Task {
        imagename: String,
        #[source]
        source: ToolkitError,
    },
    #[error("toolkit query failed: {0}")]
    Toolkit(#[from] ToolkitError),
    #[error("comparison failed: {0}")]
    Comparison(#[from] ComparisonError),
    #[error("spectral fit failed: {0}")]
    Fit(#[from] FitError),
    #[error("reference values: {0}")]
    Reference(String),
    #[error("measured metrics: {0}")]
    Metrics(String),
    #[error("persisting {path} failed: {message}")]
    Persist { path: PathBuf, message: String },
    #[error("configuration: {0}")]
    Config(String),
    #[error("verification failed for {test}:\n{report}")]
    Verification { test: String, report: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
