use std::process::ExitCode;

use clap::Parser;
use peloton_cli::{Cli, emit, log_filter};
use peloton_client::config::CredentialResolver;
use peloton_client::registry;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only the JSON document.
    let filter = log_filter(cli.verbose, |k| std::env::var(k).ok());
    let env_filter = tracing_subscriber::EnvFilter::try_new(&filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(env_filter)
        .init();
    tracing::debug!("peloton-cli: log filter: {}", filter);

    let working_dir = std::env::current_dir().unwrap_or_else(|_| ".".into());
    let resolver = CredentialResolver::new(working_dir).with_env_file(cli.env_file.clone());

    let result = peloton_cli::run(&cli, registry::global(), &resolver)
        .await
        .and_then(|document| emit(&document, &mut std::io::stdout().lock()));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}
