use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::broadcast;

use session_gateway::auth::{CredentialPair, SessionEvent};
use session_gateway::config::{CliArgs, Command, Config, LogFormat};
use session_gateway::ApiClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before parsing so env fallbacks see it
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = Config::load(&args)?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    match config.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    tracing::debug!("API base URL: {}", config.api_base_url);
    tracing::debug!(
        "Credential store: {}",
        config.credentials_db_file.display()
    );

    let client = ApiClient::from_config(&config)?;
    let mut events = client.subscribe();

    let result = run(&client, args.command).await;

    report_session_events(&mut events);

    result
}

async fn run(client: &ApiClient, command: Command) -> Result<()> {
    match command {
        Command::Login {
            access_token,
            refresh_token,
        } => {
            client.sign_in(&CredentialPair::new(access_token, refresh_token))?;
            println!("Credentials stored");
        }

        Command::Logout => {
            client.logout().await?;
            println!("Logged out");
        }

        Command::Status => {
            if client.is_authenticated() {
                println!("Authenticated");
            } else {
                println!("Not authenticated");
            }
        }

        Command::Get { paths } => {
            // Concurrent on purpose: an expired token is refreshed once for all of them
            let results = join_all(paths.iter().map(|path| client.get::<Value>(path))).await;

            let mut failures = 0;
            for (path, result) in paths.iter().zip(results) {
                match result {
                    Ok(payload) => {
                        println!("{}", serde_json::to_string_pretty(&payload)?);
                    }
                    Err(e) => {
                        failures += 1;
                        match e.status() {
                            Some(status) => {
                                tracing::error!(status, "GET {} failed: {}", path, e)
                            }
                            None => tracing::error!("GET {} failed: {}", path, e),
                        }
                    }
                }
            }

            if failures > 0 {
                anyhow::bail!("{} of {} requests failed", failures, paths.len());
            }
        }

        Command::Send { method, path, body } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method: {}", method))?;
            let body: Option<Value> = body
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("--body must be valid JSON")?;

            let payload: Value = client.request(method, &path, body.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
    }

    Ok(())
}

/// Stand-in for the UI layer: tell the user where to sign in again
fn report_session_events(events: &mut broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Expired { login_route } => {
                eprintln!(
                    "Session expired. Sign in again ({}), e.g. `session-gateway login`.",
                    login_route
                );
            }
            SessionEvent::LoggedOut => {
                tracing::debug!("Session closed by logout");
            }
        }
    }
}
