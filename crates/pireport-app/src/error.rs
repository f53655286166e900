//! Application-level error type shared across the CLI entry points.

use thiserror::Error;

use crate::config::AppConfigError;
use pireport_server::{ReportError, ServerError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    ConfigLoad(#[from] AppConfigError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
