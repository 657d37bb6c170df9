//! `PelotonClient` trait shared by every API adapter, plus the adapters themselves.

use async_trait::async_trait;
use thiserror::Error;

pub mod config;
pub mod http_client;
pub mod oauth;
pub mod registry;
pub mod session;

pub use config::Credentials;

/// Profile payload returned by `/api/me`.
pub type ProfileRecord = serde_json::Map<String, serde_json::Value>;
/// One entry of the paginated workouts listing.
pub type WorkoutSummary = serde_json::Map<String, serde_json::Value>;
/// Full workout payload returned by `/api/workout/{id}`.
pub type WorkoutRecord = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum PelotonError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl PelotonError {
    /// Build an error for a non-success status, keeping the body snippet as the message.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => Self::NotFound(message),
            401 | 403 => Self::Auth(message),
            _ => Self::Api { status, message },
        }
    }
}

/// Capability contract every Peloton adapter implements.
///
/// Calls are awaited one at a time by the CLI; implementations may log in
/// lazily on the first call and reuse the session afterwards.
#[async_trait]
pub trait PelotonClient: Send + Sync {
    /// Registry name of this adapter, used in error messages.
    fn name(&self) -> &'static str;

    async fn fetch_profile(&self) -> Result<ProfileRecord, PelotonError>;

    /// List workouts for the authenticated user, newest first.
    ///
    /// A `limit` of zero yields an empty list without contacting the API.
    async fn fetch_workouts(
        &self,
        limit: u32,
        page: u32,
    ) -> Result<Vec<WorkoutSummary>, PelotonError>;

    async fn fetch_workout(&self, workout_id: &str) -> Result<WorkoutRecord, PelotonError>;
}
