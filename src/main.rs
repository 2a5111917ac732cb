use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Password;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use roster_client::api::{AuthApi, PlayersApi};
use roster_client::auth::types::RegisterRequest;
use roster_client::auth::{CredentialStore, SqliteStore};
use roster_client::chat::{ChatChannel, ChatError};
use roster_client::config::{self, CliArgs, Config};
use roster_client::error::ClientError;
use roster_client::http_client::AuthenticatedClient;
use roster_client::models::{
    BattingStyle, BowlingStyle, CreatePlayer, MatchFormat, Player, PlayerRole, StatsUpdate,
};
use roster_client::upload::{ImageFile, ImageUploader, ProgressCallback};

/// Roster service client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    args: CliArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and persist the session
    Login {
        #[arg(short, long)]
        email: String,
        /// Prompted for when omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Sign out and clear the stored session
    Logout,

    /// Create an account (a confirmation code is sent by email)
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        birthdate: Option<String>,
        #[arg(long)]
        gender: Option<String>,
    },

    /// Confirm a registration code
    Confirm {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        code: String,
    },

    /// Request a password reset code
    Forgot {
        #[arg(short, long)]
        email: String,
    },

    /// Set a new password with a reset code
    Reset {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        code: String,
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Show the signed-in user
    Whoami {
        /// Ask the service instead of reading the stored profile
        #[arg(long)]
        remote: bool,
    },

    /// Manage players
    #[command(subcommand)]
    Players(PlayersCommand),

    /// Ask the player analyst questions, one per line
    Chat {
        /// Request AI insights with each answer
        #[arg(long)]
        insights: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PlayersCommand {
    /// List players
    List {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Add a player, optionally with a profile image
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        village: String,
        #[arg(long)]
        role: PlayerRole,
        #[arg(long)]
        age: Option<u32>,
        #[arg(long)]
        batting: Option<BattingStyle>,
        #[arg(long)]
        bowling: Option<BowlingStyle>,
        /// Comma-separated team names
        #[arg(long, value_delimiter = ',')]
        teams: Vec<String>,
        #[arg(long)]
        inactive: bool,
        /// Profile image to upload after the player is created
        #[arg(long)]
        image: Option<PathBuf>,
    },

    /// Delete a player
    Delete { id: String },

    /// Update a player's statistics for one match format
    Stats {
        id: String,
        #[arg(short, long)]
        format: MatchFormat,
        #[arg(long)]
        runs: Option<u32>,
        #[arg(long)]
        average: Option<f64>,
        #[arg(long)]
        wickets: Option<u32>,
        #[arg(long)]
        economy: Option<f64>,
    },

    /// Print a download URL for a stored image
    ImageUrl { key: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // First run: no .env and missing required values
    if config::needs_interactive_setup() && std::io::stdin().is_terminal() {
        match config::run_interactive_setup() {
            Ok(setup) => {
                std::env::set_var("API_BASE_URL", &setup.api_base_url);
                std::env::set_var("AUTH_MODE", &setup.auth_mode);
                if !setup.ws_base_url.is_empty() {
                    std::env::set_var("WS_BASE_URL", &setup.ws_base_url);
                }
            }
            Err(e) => {
                eprintln!("Setup failed: {:#}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<ClientError>() {
                Some(err) if err.is_session_ended() => {
                    eprintln!("Session expired. Run `roster login` to sign in again.");
                }
                Some(err) => eprintln!("Error: {}", err.user_message()),
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_args(cli.args)?;
    config.validate()?;

    init_tracing(&config.log_level);
    tracing::debug!(
        api = %config.api_base_url,
        mode = ?config.auth_mode,
        session_db = %config.session_db_file.display(),
        "Configuration loaded"
    );

    let store: Arc<dyn CredentialStore> = Arc::new(SqliteStore::open(&config.session_db_file)?);
    let client = Arc::new(AuthenticatedClient::from_config(&config, store)?);
    let auth = AuthApi::new(client.clone());

    match cli.command {
        Command::Login { email, password } => {
            let password = password_or_prompt(password, "Password", false)?;
            let session = auth.login(&email, &password).await?;
            let profile = session.profile.unwrap_or_default();
            println!(
                "Signed in as {} <{}>",
                profile.name.as_deref().unwrap_or("unknown"),
                profile.email.as_deref().unwrap_or(&email)
            );
        }

        Command::Logout => {
            auth.logout().await?;
            println!("Signed out");
        }

        Command::Register {
            name,
            email,
            password,
            phone,
            birthdate,
            gender,
        } => {
            let password = password_or_prompt(password, "Password", true)?;
            let response = auth
                .register(&RegisterRequest {
                    name,
                    email: email.clone(),
                    password,
                    phone_number: phone,
                    birthdate,
                    gender,
                    picture: None,
                })
                .await?;
            print_message(&response.message, "Registered");
            println!("Check {} for a code, then run `roster confirm`.", email);
        }

        Command::Confirm { email, code } => match auth.confirm_registration(&email, &code).await? {
            Some(_) => println!("Account confirmed and signed in"),
            None => println!("Account confirmed. Run `roster login` to sign in."),
        },

        Command::Forgot { email } => {
            let response = auth.forgot_password(&email).await?;
            print_message(&response.message, "Reset code sent");
        }

        Command::Reset {
            email,
            code,
            password,
        } => {
            let password = password_or_prompt(password, "New password", true)?;
            let response = auth
                .confirm_forgot_password(&email, &code, &password)
                .await?;
            print_message(&response.message, "Password updated");
        }

        Command::Whoami { remote } => {
            let profile = if remote {
                auth.me().await?
            } else {
                auth.current_session()?.profile
            };
            match profile {
                Some(profile) => println!("{}", serde_json::to_string_pretty(&profile)?),
                None => println!("Not signed in"),
            }
        }

        Command::Players(command) => {
            let uploader = ImageUploader::new(config.max_image_bytes, config.http_request_timeout)?;
            let players = PlayersApi::new(client.clone(), uploader);
            run_players(&players, command).await?;
        }

        Command::Chat { insights } => {
            let url = config
                .ws_base_url
                .as_deref()
                .context("WS_BASE_URL is required for chat")?;
            run_chat(url, insights).await?;
        }
    }

    Ok(())
}

async fn run_players(players: &PlayersApi, command: PlayersCommand) -> Result<()> {
    match command {
        PlayersCommand::List { json } => {
            let list = players.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else {
                print_players(&list);
            }
        }

        PlayersCommand::Add {
            name,
            village,
            role,
            age,
            batting,
            bowling,
            teams,
            inactive,
            image,
        } => {
            let mut payload = CreatePlayer::new(name, village, role);
            payload.age = age;
            payload.batting_style = batting.unwrap_or_default();
            payload.bowling_style = bowling.unwrap_or_default();
            payload.teams = (!teams.is_empty()).then_some(teams);
            payload.is_active = !inactive;

            let image = match image {
                Some(path) => Some(ImageFile::from_path(&path).await?),
                None => None,
            };

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_ctrl_c.cancel();
                }
            });

            let progress: ProgressCallback = Arc::new(|percent| {
                eprint!("\rUploading image... {:>3}%", percent);
                let _ = std::io::stderr().flush();
            });

            let created = players
                .create_with_image(&payload, image.as_ref(), Some(progress), &cancel)
                .await?;
            if image.is_some() {
                eprintln!();
            }

            println!("Created player {} ({})", created.player.name, created.player.id);
            match created.image_error {
                Some(ClientError::Upload(ref e)) if e.is_cancelled() => {
                    println!("Image upload cancelled; player saved without an image");
                }
                Some(ref e) => println!("Image upload failed: {}", e.user_message()),
                None => {
                    if let Some(key) = created.player.image_key {
                        println!("Image stored at {}", key);
                    }
                }
            }
        }

        PlayersCommand::Delete { id } => {
            players.delete(&id).await?;
            println!("Deleted player {}", id);
        }

        PlayersCommand::Stats {
            id,
            format,
            runs,
            average,
            wickets,
            economy,
        } => {
            let update = StatsUpdate::new(format, runs, average, wickets, economy);
            players.update_stats(&id, &update).await?;
            println!("Updated {} stats for player {}", format, id);
        }

        PlayersCommand::ImageUrl { key } => {
            let download = players.image_download_url(&key).await?;
            println!("{}", download.url);
        }
    }

    Ok(())
}

async fn run_chat(url: &str, insights: bool) -> Result<()> {
    let channel = ChatChannel::connect(url).await?;
    println!("Connected. Ask about player performance, strengths or role (Ctrl+D to quit).");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        println!("Analyzing...");
        match channel.ask(&line, insights.then_some(true)).await {
            Ok(answer) => println!("{}", answer),
            Err(ChatError::Remote(message)) => println!("Analyst error: {}", message),
            Err(e @ (ChatError::Closed | ChatError::Transport(_))) => {
                println!("{}", e);
                break;
            }
            Err(e) => println!("{}", e),
        }
    }

    channel.close().await;
    Ok(())
}

fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level.to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn password_or_prompt(given: Option<String>, prompt: &str, confirm: bool) -> Result<String> {
    if let Some(password) = given {
        return Ok(password);
    }

    let mut input = Password::new().with_prompt(prompt);
    if confirm {
        input = input.with_confirmation("Repeat password", "Passwords do not match");
    }
    input.interact().context("Failed to read password")
}

fn print_message(message: &str, fallback: &str) {
    if message.is_empty() {
        println!("{}", fallback);
    } else {
        println!("{}", message);
    }
}

fn print_players(players: &[Player]) {
    if players.is_empty() {
        println!("No players yet");
        return;
    }

    println!(
        "{:<38} {:<24} {:<14} {:<16} {:>7} {:>6} {:>7}",
        "ID", "NAME", "ROLE", "VILLAGE", "MATCHES", "RUNS", "WICKETS"
    );
    for p in players {
        println!(
            "{:<38} {:<24} {:<14} {:<16} {:>7} {:>6} {:>7}",
            p.id,
            p.name,
            p.role.as_str(),
            p.village,
            p.matches.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            p.runs.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            p.wickets.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
        );
    }
}
