use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabled::{Table, Tabled};
use tokio::sync::broadcast;

use homeconnect::config::{self, Config};
use homeconnect::{enums, ApplianceEvent, ApplianceRegistry, Session, SessionEvent};

#[derive(Parser)]
#[command(name = "homeconnect")]
#[command(about = "A CLI for talking to Home Connect appliances")]
#[command(version)]
struct Cli {
    /// OAuth client id of your Home Connect developer application
    #[arg(long, env = "HC_CLIENT_ID")]
    client_id: Option<String>,

    /// API base URL, e.g. https://simulator.home-connect.com
    #[arg(long, env = "HC_BASE_URL")]
    base_url: Option<String>,

    /// Redirect URL registered for the application
    #[arg(long, env = "HC_REDIRECT_URL")]
    redirect_url: Option<String>,

    /// Space separated scopes to request at login
    #[arg(long, env = "HC_SCOPE")]
    scope: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the URL to open in a browser to grant access
    AuthUrl,
    /// Authorize and store the resulting tokens
    Login {
        /// Pre-authorized URL to use instead of a freshly generated one
        #[arg(long)]
        url: Option<String>,
    },
    /// Forget the stored tokens
    Logout,
    /// List all appliances paired with the account
    Appliances,
    /// Show the current status of an appliance
    Status {
        /// haId of the appliance
        haid: String,
    },
    /// List the programs an appliance currently offers
    Programs {
        /// haId of the appliance
        haid: String,
    },
    /// Print live events of an appliance until interrupted
    Watch {
        /// haId of the appliance
        haid: String,
    },
}

#[derive(Tabled)]
struct ApplianceRow {
    #[tabled(rename = "haId")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Brand")]
    brand: String,
    #[tabled(rename = "Type")]
    appliance_type: String,
    #[tabled(rename = "Connected")]
    connected: String,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Description")]
    description: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    if let Commands::Logout = cli.command {
        config::clear_tokens()?;
        println!("Logged out.");
        return Ok(());
    }

    let config = merge_config(&cli, config::load_config()?)?;
    let session = Arc::new(Session::new(config.session_config())?);
    let stored = config.tokens.clone();
    let mut tokens = TokenStore::new(session.subscribe(), config, config::get_config_path()?);

    match &cli.command {
        Commands::AuthUrl => {
            println!("{}", session.authorization_url().await?);
            return Ok(());
        }
        Commands::Login { url } => {
            login(&session, url.as_deref()).await?;
            tokens.flush()?;
            println!("Logged in.");
            return Ok(());
        }
        _ => {}
    }

    let Some(stored) = stored else {
        return Err(anyhow::anyhow!(
            "Not logged in. Please run 'homeconnect login' first."
        ));
    };
    session
        .set_tokens(&stored.access_token, &stored.refresh_token)
        .await;

    let registry = ApplianceRegistry::new(session.clone());
    let outcome = run(cli.command, &registry, &mut tokens).await;

    // Tokens may have been refreshed along the way, even on failure
    tokens.flush()?;
    outcome
}

async fn run(command: Commands, registry: &ApplianceRegistry, tokens: &mut TokenStore) -> Result<()> {
    match command {
        Commands::Appliances => {
            info!("Fetching appliance list...");
            let appliances = registry.list(true).await?;

            if appliances.is_empty() {
                println!("No appliances found for this account.");
                return Ok(());
            }

            let mut rows: Vec<ApplianceRow> = Vec::new();
            for appliance in appliances.values() {
                let details = appliance.details().await.unwrap_or_default();
                rows.push(ApplianceRow {
                    id: appliance.id().to_string(),
                    name: details.name.unwrap_or_else(|| "Unnamed".to_string()),
                    brand: details.brand.unwrap_or_else(|| "Unknown".to_string()),
                    appliance_type: details
                        .appliance_type
                        .unwrap_or_else(|| "Unknown".to_string()),
                    connected: if details.connected { "Yes" } else { "No" }.to_string(),
                });
            }
            rows.sort_by(|a, b| a.id.cmp(&b.id));

            println!("{}", Table::new(&rows));
        }
        Commands::Status { haid } => {
            let appliance = registry.get(&haid).await?;
            let status = appliance.get_status(true).await?;
            let rows: Vec<StatusRow> = status
                .into_iter()
                .map(|(key, value)| StatusRow {
                    key,
                    description: value
                        .as_str()
                        .and_then(enums::describe_value)
                        .unwrap_or_default()
                        .to_string(),
                    value: display_value(&value),
                })
                .collect();
            println!("{}", Table::new(&rows));
        }
        Commands::Programs { haid } => {
            let appliance = registry.get(&haid).await?;
            let programs = appliance.available_programs().await?;
            let keys: Vec<&str> = programs
                .as_array()
                .map(|programs| {
                    programs
                        .iter()
                        .filter_map(|program| program.get("key").and_then(Value::as_str))
                        .collect()
                })
                .unwrap_or_default();

            if keys.is_empty() {
                println!("No programs available for {}.", haid);
            }
            for key in keys {
                println!("{}", key);
            }
        }
        Commands::Watch { haid } => {
            let appliance = registry.get(&haid).await?;
            let mut events = appliance.subscribe();
            appliance.register_events().await?;
            println!("Watching {} (Ctrl-C to stop)", haid);

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    // A long watch outlives the access token
                    Some(event) = tokens.next() => tokens.record(event)?,
                    received = events.recv() => match received {
                        Ok(event) => print_event(&event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Skipped {} events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }

            appliance.unregister_events().await;
        }
        Commands::AuthUrl | Commands::Login { .. } | Commands::Logout => {}
    }

    Ok(())
}

/// Command line values win over the stored configuration.
fn merge_config(cli: &Cli, stored: Option<Config>) -> Result<Config> {
    let mut config = stored.unwrap_or_default();
    if let Some(client_id) = &cli.client_id {
        config.client_id = client_id.clone();
    }
    if config.client_id.is_empty() {
        return Err(anyhow::anyhow!(
            "Client id is required. Provide via --client-id or HC_CLIENT_ID environment variable."
        ));
    }
    if cli.base_url.is_some() {
        config.base_url = cli.base_url.clone();
    }
    if cli.redirect_url.is_some() {
        config.redirect_url = cli.redirect_url.clone();
    }
    if cli.scope.is_some() {
        config.scope = cli.scope.clone();
    }
    Ok(config)
}

async fn login(session: &Session, url: Option<&str>) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.green} {msg}")
            .context("Invalid spinner template")?,
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Authorizing with Home Connect...");

    match session.login(url).await {
        Ok(tokens) => {
            spinner.finish_with_message(format!("Authorized, token valid until {}", tokens.expires));
            Ok(())
        }
        Err(err) => {
            spinner.finish_and_clear();
            Err(err.into())
        }
    }
}

/// Writes every token set the session announces back to the config file.
struct TokenStore {
    events: broadcast::Receiver<SessionEvent>,
    config: Config,
    path: PathBuf,
}

impl TokenStore {
    fn new(events: broadcast::Receiver<SessionEvent>, config: Config, path: PathBuf) -> Self {
        Self {
            events,
            config,
            path,
        }
    }

    fn record(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::TokensAvailable(tokens) => {
                self.config.tokens = Some(tokens);
                config::save_config_to(&self.path, &self.config)?;
                debug!("Tokens saved to {}", self.path.display());
            }
            SessionEvent::TokensInvalid => {
                warn!("Stored tokens are no longer valid, please log in again");
            }
        }
        Ok(())
    }

    /// Record whatever arrived since the last call.
    fn flush(&mut self) -> Result<()> {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.record(event)?,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    debug!("Skipped {} session events", skipped);
                }
                Err(_) => return Ok(()),
            }
        }
    }

    async fn next(&mut self) -> Option<SessionEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Skipped {} session events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

fn print_event(event: &ApplianceEvent) {
    match event {
        ApplianceEvent::Connected(true) => println!("connected"),
        ApplianceEvent::Connected(false) => println!("disconnected"),
        ApplianceEvent::Event(record) => {
            let date = record
                .date
                .map(|date| date.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            println!("{} {:<6} {}", date, record.kind.as_str(), record.summary);
        }
        ApplianceEvent::Error(err) => eprintln!("error: {}", err),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.rsplit('.').next().unwrap_or(s).to_string(),
        other => other.to_string(),
    }
}
