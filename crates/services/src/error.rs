//! Shared error types for the services crate.

use thiserror::Error;

use storage::gateway::GatewayError;
use storage::sqlite::SqliteInitError;

use crate::photo_service::PickerError;

/// Errors emitted by `ChallengeStore`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChallengeStoreError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Errors emitted by `PhotoCaptureService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PhotoCaptureError {
    #[error("photo library permission was denied")]
    PermissionDenied,
    #[error("invalid image: {0}")]
    InvalidImage(&'static str),
    #[error(transparent)]
    Picker(#[from] PickerError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Errors emitted while reading backend configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BackendConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Config(#[from] BackendConfigError),
    #[error(transparent)]
    Store(#[from] ChallengeStoreError),
}
