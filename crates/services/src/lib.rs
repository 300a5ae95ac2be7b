#![forbid(unsafe_code)]

pub mod app_services;
pub mod backend;
pub mod challenge_store;
pub mod error;
pub mod photo_service;
pub mod tracker;

pub use habit_core::Clock;

pub use app_services::AppServices;
pub use backend::{BackendConfig, RestGateway};
pub use challenge_store::ChallengeStore;
pub use error::{AppServicesError, BackendConfigError, ChallengeStoreError, PhotoCaptureError};
pub use photo_service::{CaptureOutcome, MediaPicker, PermissionStatus, PhotoCaptureService, PickerError};
pub use tracker::{CompletedChallengeTracker, TrackerPhase, TrackerState};
