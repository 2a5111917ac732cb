use anyhow::{Context, Result};
use clap::Args;
use dialoguer::{Confirm, Input, Select};
use std::io::Write;
use std::path::PathBuf;

use crate::auth::AuthMode;

/// Connection settings shared by every command
#[derive(Args, Debug, Clone)]
pub struct CliArgs {
    /// Base URL of the roster API (identity, players, storage presign)
    #[arg(short = 'u', long, env = "API_BASE_URL", global = true)]
    pub api_base_url: Option<String>,

    /// WebSocket URL of the player analysis channel
    #[arg(long, env = "WS_BASE_URL", global = true)]
    pub ws_base_url: Option<String>,

    /// How the deployment authenticates requests (cookie, bearer)
    #[arg(short = 'm', long, env = "AUTH_MODE", global = true)]
    pub auth_mode: Option<String>,

    /// Where the session is persisted between runs
    #[arg(
        long,
        env = "SESSION_DB_FILE",
        default_value = "~/.roster/session.sqlite3",
        global = true
    )]
    pub session_db: String,

    /// Maximum profile image size in bytes
    #[arg(long, env = "MAX_PROFILE_IMAGE_BYTES", default_value = "5242880", global = true)]
    pub max_image_bytes: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30", global = true)]
    pub http_timeout: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Service endpoints
    pub api_base_url: String,
    pub ws_base_url: Option<String>,

    // Authentication
    pub auth_mode: AuthMode,
    pub session_db_file: PathBuf,
    pub token_refresh_threshold: u64,

    // Uploads
    pub max_image_bytes: u64,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    pub log_level: String,
}

impl Config {
    /// Build configuration from parsed arguments (CLI > ENV > defaults)
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let api_base_url = args
            .api_base_url
            .context("API_BASE_URL is required (use -u or set API_BASE_URL env var)")?;

        let auth_mode = args
            .auth_mode
            .context("AUTH_MODE is required (use -m or set AUTH_MODE to cookie or bearer)")?;

        let config = Config {
            api_base_url: normalize_base_url(&api_base_url),
            ws_base_url: args
                .ws_base_url
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().to_string()),

            auth_mode: parse_auth_mode(&auth_mode)?,
            session_db_file: expand_tilde(&args.session_db),

            token_refresh_threshold: std::env::var("TOKEN_REFRESH_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),

            max_image_bytes: args.max_image_bytes,

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: args.http_timeout,

            log_level: args.log_level,
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            anyhow::bail!(
                "API_BASE_URL must be an http(s) URL: {}",
                self.api_base_url
            );
        }

        if let Some(ref ws) = self.ws_base_url {
            if !(ws.starts_with("ws://") || ws.starts_with("wss://")) {
                anyhow::bail!("WS_BASE_URL must be a ws(s) URL: {}", ws);
            }
        }

        if self.max_image_bytes == 0 {
            anyhow::bail!("MAX_PROFILE_IMAGE_BYTES must be greater than zero");
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

/// Parse auth mode; there is no fallback, a wrong guess breaks every request
fn parse_auth_mode(s: &str) -> Result<AuthMode> {
    match s.trim().to_lowercase().as_str() {
        "cookie" => Ok(AuthMode::Cookie),
        "bearer" => Ok(AuthMode::Bearer),
        other => anyhow::bail!("Invalid AUTH_MODE '{}': expected cookie or bearer", other),
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}


// === Interactive Setup ===

/// Check if interactive setup is needed (no .env file and missing required values)
pub fn needs_interactive_setup() -> bool {
    let env_file_exists = std::path::Path::new(".env").exists();

    let has_base_url = std::env::var("API_BASE_URL").is_ok();
    let has_auth_mode = std::env::var("AUTH_MODE").is_ok();

    !env_file_exists && (!has_base_url || !has_auth_mode)
}

/// Run interactive setup to collect required configuration
pub fn run_interactive_setup() -> Result<InteractiveConfig> {
    println!();
    println!("No configuration found. Let's connect to your roster service.");
    println!();

    let api_base_url: String = Input::new()
        .with_prompt("API base URL (API_BASE_URL)")
        .interact_text()
        .context("Failed to read API_BASE_URL")?;

    if api_base_url.trim().is_empty() {
        anyhow::bail!("API_BASE_URL cannot be empty");
    }

    println!();
    let modes = vec!["cookie", "bearer"];
    let mode_idx = Select::new()
        .with_prompt("How does the service authenticate requests? (AUTH_MODE)")
        .items(&modes)
        .interact()
        .context("Failed to read auth mode selection")?;
    let auth_mode = modes[mode_idx].to_string();

    println!();
    let ws_base_url: String = Input::new()
        .with_prompt("Chat WebSocket URL (WS_BASE_URL, empty to skip)")
        .allow_empty(true)
        .interact_text()
        .context("Failed to read WS_BASE_URL")?;

    let config = InteractiveConfig {
        api_base_url: normalize_base_url(&api_base_url),
        auth_mode,
        ws_base_url: ws_base_url.trim().to_string(),
    };

    println!();
    let save_to_env = Confirm::new()
        .with_prompt("Save configuration to .env file?")
        .default(true)
        .interact()
        .context("Failed to read save confirmation")?;

    if save_to_env {
        save_env_file(&config)?;
        println!();
        println!("Configuration saved to .env file");
    }

    println!();
    Ok(config)
}

/// Configuration collected from interactive setup
#[derive(Debug, Clone)]
pub struct InteractiveConfig {
    pub api_base_url: String,
    pub auth_mode: String,
    pub ws_base_url: String,
}

/// Save configuration to .env file
fn save_env_file(config: &InteractiveConfig) -> Result<()> {
    let env_content = format!(
        r#"# Roster client configuration
# Generated by interactive setup

# Roster API base URL (required)
API_BASE_URL={}

# cookie or bearer (required)
AUTH_MODE={}

# Player analysis chat channel
WS_BASE_URL={}

# Logging (trace, debug, info, warn, error)
LOG_LEVEL=warn
"#,
        config.api_base_url, config.auth_mode, config.ws_base_url,
    );

    let mut file = std::fs::File::create(".env").context("Failed to create .env file")?;
    file.write_all(env_content.as_bytes())
        .context("Failed to write .env file")?;

    Ok(())
}
