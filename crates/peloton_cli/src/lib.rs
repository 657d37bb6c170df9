//! Command-line front-end over the Peloton client adapters.
//!
//! One invocation runs one command: resolve credentials, build the selected
//! adapter, make one call, and render the result as canonical JSON. The
//! document is rendered in full before anything is written, so a failure
//! never leaves partial output behind.

use clap::{Parser, Subcommand};
use peloton_client::config::CredentialResolver;
use peloton_client::registry::{ClientRegistry, DEFAULT_CLIENT};
use peloton_client::{PelotonClient, PelotonError};
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

pub mod error;
pub mod output;

pub use error::{CliError, CliResult};

pub const LOG_LEVEL_VAR: &str = "PELOTON_LOG_LEVEL";
pub const DEFAULT_WORKOUT_LIMIT: u32 = 10;

/// Minimal Peloton CLI with pluggable API backends.
#[derive(Parser, Debug)]
#[command(name = "peloton-cli", version, about, after_help = error::EXIT_CODES_HELP)]
pub struct Cli {
    /// Peloton API client implementation to use
    #[arg(long, global = true, default_value = DEFAULT_CLIENT)]
    pub client: String,

    /// Env file to read PELOTON_USERNAME / PELOTON_PASSWORD from
    #[arg(long, global = true, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch the profile for the authenticated user
    Profile,

    /// List workouts for the authenticated user, newest first
    Workouts {
        /// Maximum number of workouts to request
        #[arg(long, default_value_t = DEFAULT_WORKOUT_LIMIT)]
        limit: u32,
        /// Page index to request from the API
        #[arg(long, default_value_t = 0)]
        page: u32,
    },

    /// Fetch a single workout by id
    Workout {
        /// Peloton workout identifier
        workout_id: String,
    },

    /// List the available client implementations
    Clients,
}

/// A call against an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Profile,
    Workouts { limit: u32, page: u32 },
    Workout { workout_id: String },
}

impl Command {
    /// The adapter call this command needs, if any.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Self::Profile => Some(Operation::Profile),
            Self::Workouts { limit, page } => Some(Operation::Workouts {
                limit: *limit,
                page: *page,
            }),
            Self::Workout { workout_id } => Some(Operation::Workout {
                workout_id: workout_id.clone(),
            }),
            Self::Clients => None,
        }
    }
}

/// Run one invocation and return the rendered document.
pub async fn run(
    cli: &Cli,
    registry: &ClientRegistry,
    resolver: &CredentialResolver,
) -> CliResult<String> {
    run_with(cli, registry, resolver, |k| std::env::var(k).ok()).await
}

/// [`run`] with the process environment read through `get`.
pub async fn run_with<F>(
    cli: &Cli,
    registry: &ClientRegistry,
    resolver: &CredentialResolver,
    get: F,
) -> CliResult<String>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(operation) = cli.command.operation() else {
        return Ok(output::render(serde_json::json!(registry.names()))?);
    };

    let credentials = resolver.resolve_with(get)?;
    let client = registry.create(&cli.client, credentials)?;
    debug!(client = client.name(), ?operation, "dispatching");

    let payload = execute(&operation, client.as_ref()).await?;
    Ok(output::render(payload)?)
}

/// Invoke `operation` on `client` and shape the result for output.
pub async fn execute(operation: &Operation, client: &dyn PelotonClient) -> CliResult<Value> {
    let name = client.name();
    let upstream = move |e: PelotonError| CliError::from_client(name, e);

    match operation {
        Operation::Profile => client
            .fetch_profile()
            .await
            .map(Value::Object)
            .map_err(upstream),
        Operation::Workouts { limit, page } => {
            let workouts = client.fetch_workouts(*limit, *page).await.map_err(upstream)?;
            Ok(Value::Array(
                output::order_workouts(workouts)
                    .into_iter()
                    .map(Value::Object)
                    .collect(),
            ))
        }
        Operation::Workout { workout_id } => match client.fetch_workout(workout_id).await {
            Ok(record) => Ok(Value::Object(record)),
            Err(PelotonError::NotFound(message)) => Err(CliError::WorkoutNotFound {
                workout_id: workout_id.clone(),
                message,
            }),
            Err(e) => Err(upstream(e)),
        },
    }
}

/// Write a rendered document to `out` and flush it.
pub fn emit<W: Write>(document: &str, out: &mut W) -> CliResult<()> {
    out.write_all(document.as_bytes())?;
    out.flush()?;
    Ok(())
}

/// Tracing filter directives: `PELOTON_LOG_LEVEL`, then `RUST_LOG`, then a
/// default of `warn` (`debug` with `--verbose`). HTTP internals stay quiet.
pub fn log_filter<F>(verbose: bool, mut get: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let default = if verbose { "debug" } else { "warn" };
    let level = get(LOG_LEVEL_VAR)
        .filter(|v| !v.is_empty())
        .or_else(|| get("RUST_LOG").filter(|v| !v.is_empty()))
        .unwrap_or_else(|| default.to_string());
    format!("{level},reqwest=warn,hyper_util=warn")
}
