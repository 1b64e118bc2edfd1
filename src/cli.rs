use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{theme::ColorfulTheme, Input, Select};

use crate::client::websocket_client::{connect_and_play, SessionConfig};
use crate::core::registry::{GameSettings, Hub, Role};
use crate::core::websocket::ClientOptions;
use crate::core::websocket_host::{serve, HostConfig};

#[derive(Parser)]
#[command(name = "cowbull")]
#[command(about = "🐮 Cows and bulls duels over WebSockets")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Host the player hub
    Host {
        /// Address to bind the server to (e.g., "0.0.0.0:8080")
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        addr: String,

        /// Seconds a connection may stay silent before a read fails
        #[arg(long, default_value_t = 120)]
        read_timeout: u64,

        /// Failed reads tolerated in a row before a connection is dropped
        #[arg(long, default_value_t = 3)]
        retry_count: u32,

        /// Seconds between a failed read and the next attempt
        #[arg(long, default_value_t = 1)]
        retry_interval: u64,

        /// Seconds a player gets to answer think, guess and try
        #[arg(long, default_value_t = 60)]
        reply_timeout: u64,
    },
    /// Join a hub
    Join {
        /// Hub address (e.g., "127.0.0.1:8080")
        addr: String,

        /// Player name
        #[arg(short, long, default_value = "Player")]
        name: String,

        /// Start a game in this role: thinker or guesser
        #[arg(short, long)]
        role: Option<String>,

        /// Digits of the number when playing against the AI
        #[arg(short, long, default_value_t = 4)]
        digits: usize,

        /// Play against the hub's AI
        #[arg(long)]
        vs_ai: bool,

        /// Opponent player id, repeat for several guessers
        #[arg(short, long = "opponent")]
        opponents: Vec<String>,

        /// Let the local AI answer instead of prompting
        #[arg(long)]
        ai: bool,
    },
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Host {
            addr,
            read_timeout,
            retry_count,
            retry_interval,
            reply_timeout,
        }) => {
            let config = HostConfig {
                addr,
                client: ClientOptions {
                    read_timeout: Duration::from_secs(read_timeout),
                    retry_count,
                    retry_interval: Duration::from_secs(retry_interval),
                },
                reply_timeout: Duration::from_secs(reply_timeout),
            };
            host(config).await?;
        }

        Some(Commands::Join {
            addr,
            name,
            role,
            digits,
            vs_ai,
            opponents,
            ai,
        }) => {
            let settings = match role {
                Some(role) => Some(game_settings(role, digits, vs_ai, opponents)?),
                None => None,
            };
            join(&addr, SessionConfig { name, settings, ai }).await?;
        }

        None => {
            // No subcommand provided - show interactive menu
            show_main_menu().await?;
        }
    }

    Ok(())
}

fn game_settings(role: String, digits: usize, ai: bool, opponents: Vec<String>) -> Result<GameSettings> {
    if role.parse::<Role>()? == Role::Thinker && ai {
        bail!("the hub has no AI guesser, think against --opponent players instead");
    }
    if !ai && opponents.is_empty() {
        bail!("pick at least one --opponent, or play with --vs-ai");
    }
    Ok(GameSettings {
        role,
        digits,
        ai,
        opponents,
    })
}

async fn host(config: HostConfig) -> Result<()> {
    println!("🚀 Starting cowbull hub on ws://{}", config.addr);
    let hub = Arc::new(Hub::new());
    tokio::select! {
        result = serve(config, hub) => result.context("hub stopped")?,
        _ = tokio::signal::ctrl_c() => println!("👋 Goodbye!"),
    }
    Ok(())
}

async fn join(addr: &str, config: SessionConfig) -> Result<()> {
    let url = if addr.starts_with("ws://") || addr.starts_with("wss://") {
        addr.to_string()
    } else {
        format!("ws://{addr}/")
    };
    println!("🔗 Connecting to {} as '{}'...", url, config.name);
    connect_and_play(&url, config, ClientOptions::default())
        .await
        .with_context(|| format!("session with {url} failed"))
}

async fn show_main_menu() -> Result<()> {
    println!("🐮 Welcome to cowbull!");
    println!();

    let options = vec!["🏠 Host a hub", "🔗 Join a hub", "🚪 Exit"];

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("What would you like to do?")
        .items(&options)
        .interact()?;

    match selection {
        0 => {
            let addr = Input::with_theme(&ColorfulTheme::default())
                .with_prompt("Server address")
                .default("127.0.0.1:8080".to_string())
                .interact_text()?;

            host(HostConfig {
                addr,
                ..HostConfig::default()
            })
            .await?;
        }
        1 => {
            let addr: String = Input::with_theme(&ColorfulTheme::default())
                .with_prompt("Server address")
                .default("127.0.0.1:8080".to_string())
                .interact_text()?;

            let name = Input::with_theme(&ColorfulTheme::default())
                .with_prompt("Your name")
                .default("Player".to_string())
                .interact_text()?;

            let roles = ["👀 Wait to be challenged", "🎯 Guess against the AI"];
            let settings = match Select::with_theme(&ColorfulTheme::default())
                .with_prompt("How do you want to play?")
                .items(&roles)
                .interact()?
            {
                0 => None,
                _ => {
                    let digits = Input::with_theme(&ColorfulTheme::default())
                        .with_prompt("Digits")
                        .default(4usize)
                        .interact_text()?;
                    Some(game_settings("guesser".to_string(), digits, true, Vec::new())?)
                }
            };

            join(&addr, SessionConfig { name, settings, ai: false }).await?;
        }
        2 => {
            println!("👋 Goodbye!");
        }
        _ => unreachable!(),
    }

    Ok(())
}
