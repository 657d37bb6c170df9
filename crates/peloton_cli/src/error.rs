//! Error taxonomy of the CLI and the exit code of each kind.

use peloton_client::PelotonError;
use peloton_client::config::CredentialsError;
use peloton_client::registry::UnknownClient;
use std::path::PathBuf;
use thiserror::Error;

pub const EXIT_OUTPUT: u8 = 1;
/// Also what clap exits with on usage errors.
pub const EXIT_USAGE: u8 = 2;
pub const EXIT_MISSING_CREDENTIALS: u8 = 3;
pub const EXIT_CREDENTIAL_FILE_NOT_FOUND: u8 = 4;
pub const EXIT_UNKNOWN_CLIENT: u8 = 5;
pub const EXIT_WORKOUT_NOT_FOUND: u8 = 6;
pub const EXIT_UPSTREAM: u8 = 7;
pub const EXIT_INVALID_CREDENTIAL_FILE: u8 = 8;

/// Shown at the bottom of `--help`.
pub const EXIT_CODES_HELP: &str = "\
Exit codes:
  0  success
  1  failed to write output
  2  usage error or invalid input
  3  MissingCredentials
  4  CredentialFileNotFound
  5  UnknownClient
  6  WorkoutNotFound
  7  UpstreamError
  8  InvalidCredentialFile";

#[derive(Debug, Error)]
pub enum CliError {
    #[error(
        "MissingCredentials: missing required credential(s): {}. Set them in the environment or an env file.",
        .0.join(", ")
    )]
    MissingCredentials(Vec<&'static str>),

    #[error("CredentialFileNotFound: env file {} does not exist", .0.display())]
    CredentialFileNotFound(PathBuf),

    #[error("InvalidCredentialFile: {}: {reason}", .path.display())]
    InvalidCredentialFile { path: PathBuf, reason: String },

    #[error("UnknownClient: {0}")]
    UnknownClient(#[from] UnknownClient),

    #[error("WorkoutNotFound: workout '{workout_id}' was not found ({message})")]
    WorkoutNotFound { workout_id: String, message: String },

    #[error("UpstreamError: {client} client failed: {source}")]
    Upstream {
        client: &'static str,
        source: PelotonError,
    },

    #[error("InvalidInput: {0}")]
    InvalidInput(String),

    #[error("OutputError: {0}")]
    Output(#[from] std::io::Error),

    #[error("OutputError: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CredentialsError> for CliError {
    fn from(err: CredentialsError) -> Self {
        match err {
            CredentialsError::MissingCredentials(vars) => Self::MissingCredentials(vars),
            CredentialsError::CredentialFileNotFound(path) => Self::CredentialFileNotFound(path),
            CredentialsError::InvalidCredentialFile { path, reason } => {
                Self::InvalidCredentialFile { path, reason }
            }
        }
    }
}

impl CliError {
    /// Wrap a failure raised by the adapter named `client`.
    pub fn from_client(client: &'static str, err: PelotonError) -> Self {
        match err {
            PelotonError::InvalidInput(msg) => Self::InvalidInput(msg),
            source => Self::Upstream { client, source },
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MissingCredentials(_) => EXIT_MISSING_CREDENTIALS,
            Self::CredentialFileNotFound(_) => EXIT_CREDENTIAL_FILE_NOT_FOUND,
            Self::InvalidCredentialFile { .. } => EXIT_INVALID_CREDENTIAL_FILE,
            Self::UnknownClient(_) => EXIT_UNKNOWN_CLIENT,
            Self::WorkoutNotFound { .. } => EXIT_WORKOUT_NOT_FOUND,
            Self::Upstream { .. } => EXIT_UPSTREAM,
            Self::InvalidInput(_) => EXIT_USAGE,
            Self::Output(_) | Self::Serialization(_) => EXIT_OUTPUT,
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;
