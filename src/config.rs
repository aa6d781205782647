use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::Url;
use std::path::PathBuf;

const DEFAULT_DB_FILE: &str = "~/.local/share/session-gateway/credentials.sqlite3";

/// Session Gateway - authenticated API client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the backend API
    #[arg(short = 'u', long, env = "API_BASE_URL")]
    pub base_url: Option<String>,

    /// Path to the SQLite credential store
    #[arg(short = 'd', long, env = "CREDENTIALS_DB_FILE")]
    pub db_file: Option<String>,

    /// Route the UI is sent to when the session cannot be recovered
    #[arg(long, env = "LOGIN_ROUTE", default_value = "/login")]
    pub login_route: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

/// How log lines are rendered on stderr
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Store a credential pair obtained from the login flow
    Login {
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: String,
    },

    /// Revoke the session and clear stored credentials
    Logout,

    /// Show whether credentials are stored
    Status,

    /// GET one or more paths concurrently and print the payloads
    Get {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Send a request with an arbitrary method and optional JSON body
    Send {
        method: String,
        path: String,
        #[arg(long)]
        body: Option<String>,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // Backend
    pub api_base_url: String,

    // Credentials
    pub credentials_db_file: PathBuf,
    pub login_route: String,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Build configuration with priority: CLI > ENV > defaults.
    /// `.env` must already be loaded when `args` were parsed.
    pub fn load(args: &CliArgs) -> Result<Self> {
        let config = Config {
            api_base_url: args
                .base_url
                .clone()
                .or_else(|| std::env::var("API_BASE_URL").ok())
                .context("API_BASE_URL is required (use -u or set API_BASE_URL env var)")?,

            credentials_db_file: expand_tilde(args.db_file.as_deref().unwrap_or(DEFAULT_DB_FILE)),

            login_route: args.login_route.clone(),

            http_max_connections: std::env::var("HTTP_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: args.http_timeout,

            log_level: args.log_level.clone(),
            log_format: args.log_format,
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.api_base_url)
            .with_context(|| format!("API_BASE_URL is not a valid URL: {}", self.api_base_url))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!("API_BASE_URL must use http or https: {}", self.api_base_url);
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        Ok(())
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
