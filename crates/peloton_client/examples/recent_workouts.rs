use peloton_client::config::CredentialResolver;
use peloton_client::registry::{self, DEFAULT_CLIENT};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Reads PELOTON_USERNAME / PELOTON_PASSWORD from ./.env or the environment
    let credentials = match CredentialResolver::new(std::env::current_dir()?).resolve() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("credentials error: {}", e);
            return Ok(());
        }
    };
    let client = registry::global().create(DEFAULT_CLIENT, credentials)?;
    for workout in client.fetch_workouts(5, 0).await? {
        println!(
            "{} {}",
            workout.get("id").and_then(|v| v.as_str()).unwrap_or("?"),
            workout
                .get("fitness_discipline")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
        );
    }
    Ok(())
}
