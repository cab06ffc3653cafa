use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tomclient_auth::{CliAuthProvider, OAuthFlow};
use tomclient_config::{AuthMode, Config};
use tomclient_store::FileTokenStore;
use tomclient_types::{TokenState, TokenStore, token::unix_now};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tomclient", version, about = "tomclient - command-line client for the Tom broker")]
struct Cli {
    /// Configuration directory (default: $TOM_CONFIG_DIR or ~/.tom).
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage authentication.
    #[command(subcommand)]
    Auth(AuthCommand),
    /// Manage configuration profiles.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Log in through the browser (OAuth2 authorization code + PKCE).
    Login,
    /// Show authentication configuration and token status.
    Status,
    /// Delete the stored token.
    Logout,
    /// Exchange the stored refresh token for a new token now.
    Refresh,
    /// Print a usable bearer token, refreshing it if needed.
    Token,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// List available profiles.
    List,
    /// Switch to a different profile.
    Use {
        /// Profile name (`prod` for `config-prod.json`).
        profile: String,
    },
    /// Show the active configuration with environment overrides applied.
    Show,
    /// Create a new profile.
    Create {
        /// Profile name.
        profile: String,
        /// Copy settings from an existing profile.
        #[arg(long, value_name = "PROFILE")]
        from: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let dir = cli.config_dir.as_deref();

    match cli.command {
        Commands::Auth(cmd) => {
            let config = Config::load(dir).context("failed to load config")?;
            tracing::debug!(
                dir = %config.config_dir.display(),
                mode = %config.auth_mode,
                "config loaded"
            );
            match cmd {
                AuthCommand::Login => cmd_login(&config).await,
                AuthCommand::Status => cmd_status(&config).await,
                AuthCommand::Logout => cmd_logout(&config).await,
                AuthCommand::Refresh => cmd_refresh(&config).await,
                AuthCommand::Token => cmd_token(config).await,
            }
        }
        Commands::Config(cmd) => {
            let dir = dir.map_or_else(tomclient_config::config_dir, PathBuf::from);
            match cmd {
                ConfigCommand::List => cmd_config_list(&dir),
                ConfigCommand::Use { profile } => cmd_config_use(&dir, &profile),
                ConfigCommand::Show => cmd_config_show(&dir),
                ConfigCommand::Create { profile, from } => {
                    cmd_config_create(&dir, &profile, from.as_deref())
                }
            }
        }
    }
}

fn require_jwt(config: &Config, command: &str) -> Result<()> {
    config.validate()?;
    if config.auth_mode != AuthMode::Jwt {
        bail!(
            "auth mode is '{}' but 'auth {command}' requires auth_mode='jwt'\n\
             Set TOM_AUTH_MODE=jwt or update your config file",
            config.auth_mode
        );
    }
    Ok(())
}

async fn cmd_login(config: &Config) -> Result<()> {
    require_jwt(config, "login")?;
    let store = FileTokenStore::new(&config.config_dir);
    let flow = OAuthFlow::from_config(config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let token = flow
        .login(&store, &cancel)
        .await
        .map_err(|e| anyhow::anyhow!("login failed: {e}"))?;
    eprintln!(
        "Authenticated successfully (token expires in {}s)",
        token.expires_at.saturating_sub(unix_now())
    );
    eprintln!("Token saved to {}", store.path().display());
    Ok(())
}

async fn cmd_status(config: &Config) -> Result<()> {
    println!("Auth Mode: {}", config.auth_mode);
    println!("Config Dir: {}", config.config_dir.display());

    match config.auth_mode {
        AuthMode::None => println!("Status: no authentication configured"),
        AuthMode::ApiKey => match config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => {
                println!("API Key: {}", mask(key));
                println!("Header: {}", config.api_key_header());
                println!("Status: API key configured");
            }
            None => println!("Status: API key not set (TOM_API_KEY required)"),
        },
        AuthMode::Jwt => {
            let (Some(client_id), Some(discovery)) = (
                config.oauth_client_id.as_deref(),
                config.oauth_discovery_url.as_deref(),
            ) else {
                println!("Status: OAuth configuration incomplete");
                println!("Required: TOM_OAUTH_CLIENT_ID and TOM_OAUTH_DISCOVERY_URL");
                return Ok(());
            };
            println!("OAuth Provider: {}", config.oauth_provider);
            println!("OAuth Client ID: {client_id}");
            println!("OAuth Discovery URL: {discovery}");

            let store = FileTokenStore::new(&config.config_dir);
            let Some(token) = store.load().await? else {
                println!("Status: not authenticated - run 'tomclient auth login'");
                return Ok(());
            };
            let now = unix_now();
            match token.state_at(now) {
                TokenState::Valid => {
                    let remaining = token
                        .effective_expires_at()
                        .map_or(0, |exp| exp.saturating_sub(now));
                    println!("Status: authenticated (expires in {remaining}s)");
                    println!("Token Type: {}", token.token_type);
                }
                TokenState::Expired => {
                    println!("Status: token expired, refresh token available - run 'tomclient auth refresh'");
                }
                TokenState::Invalid => {
                    println!("Status: token expired - run 'tomclient auth login'");
                }
            }
        }
    }
    Ok(())
}

async fn cmd_logout(config: &Config) -> Result<()> {
    FileTokenStore::new(&config.config_dir)
        .remove()
        .await
        .map_err(|e| anyhow::anyhow!("logout failed: {e}"))?;
    eprintln!("Logged out");
    Ok(())
}

async fn cmd_refresh(config: &Config) -> Result<()> {
    require_jwt(config, "refresh")?;
    let store = FileTokenStore::new(&config.config_dir);
    let token = tomclient_auth::refresh(config, &store, &reqwest::Client::new())
        .await
        .map_err(|e| anyhow::anyhow!("refresh failed: {e}"))?;
    eprintln!(
        "Token refreshed (expires in {}s)",
        token.expires_at.saturating_sub(unix_now())
    );
    Ok(())
}

async fn cmd_token(config: Config) -> Result<()> {
    require_jwt(&config, "token")?;
    let store = Arc::new(FileTokenStore::new(&config.config_dir));
    let provider = CliAuthProvider::new(config, store);
    println!("{}", provider.bearer().await?);
    Ok(())
}

fn cmd_config_list(dir: &std::path::Path) -> Result<()> {
    let profiles = tomclient_config::list_profiles(dir)?;
    if profiles.is_empty() {
        println!("No profiles found in {}", dir.display());
        println!("Create one with: tomclient config create <name>");
        return Ok(());
    }
    let current = tomclient_config::current_profile(dir)?;
    for profile in profiles {
        let marker = if current.as_deref() == Some(profile.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{marker} {profile}");
    }
    Ok(())
}

fn cmd_config_use(dir: &std::path::Path, profile: &str) -> Result<()> {
    tomclient_config::set_current_profile(dir, profile)?;
    println!("Switched to profile '{profile}'");
    Ok(())
}

fn cmd_config_show(dir: &std::path::Path) -> Result<()> {
    let config = Config::load(Some(dir)).context("failed to load config")?;
    match tomclient_config::current_profile(dir)? {
        Some(profile) => println!("Active profile: {profile}\n"),
        None => println!("No profile active (using config.json directly)\n"),
    }

    let mut value = serde_json::to_value(&config)?;
    if let Some(map) = value.as_object_mut() {
        for secret in ["api_key", "oauth_client_secret"] {
            if let Some(v) = map.get_mut(secret)
                && let Some(s) = v.as_str()
            {
                *v = serde_json::Value::String(mask(s));
            }
        }
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn cmd_config_create(dir: &std::path::Path, profile: &str, from: Option<&str>) -> Result<()> {
    let config = match from {
        Some(source) => {
            println!("Creating profile '{profile}' from '{source}'");
            tomclient_config::load_profile(dir, source)
                .with_context(|| format!("failed to load source profile '{source}'"))?
        }
        None => {
            println!("Creating profile '{profile}' with default settings");
            Config {
                api_url: Some("http://localhost:8020".into()),
                ..Config::default()
            }
        }
    };
    tomclient_config::save_profile(&config, dir, profile).context("failed to save profile")?;

    println!("Profile '{profile}' created successfully");
    println!("\nActivate it with: tomclient config use {profile}");
    println!(
        "Edit at: {}",
        dir.join(tomclient_config::profile_file_name(profile)).display()
    );
    Ok(())
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{visible}***")
}
