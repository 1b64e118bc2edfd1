//! WebSocket front door of the hub: one connection actor and one remote
//! player per accepted socket.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};

use crate::core::network::{Conn, MessageKind, WebSocketConn};
use crate::core::registry::{GameSettings, Hub, Player};
use crate::core::websocket::{Client, ClientOptions};
use crate::error::Result;
use crate::players::{RemotePlayer, DEFAULT_REPLY_TIMEOUT};

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Address the listener binds to.
    pub addr: String,
    pub client: ClientOptions,
    /// How long a remote player gets to answer think, guess and try.
    pub reply_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            client: ClientOptions::default(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

/// Binds `config.addr` and serves connections until the listener fails.
pub async fn serve(config: HostConfig, hub: Arc<Hub>) -> Result<()> {
    let listener = TcpListener::bind(&config.addr).await?;
    info!(addr = %listener.local_addr()?, "cowbull host listening");
    run(listener, config, hub).await
}

/// Accept loop over an already bound listener.
pub async fn run(listener: TcpListener, config: HostConfig, hub: Arc<Hub>) -> Result<()> {
    let config = Arc::new(config);
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "new connection");
                tokio::spawn(handle_connection(stream, addr, config.clone(), hub.clone()));
            }
            Err(e) => warn!(error = %e, "failed to accept connection"),
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    config: Arc<HostConfig>,
    hub: Arc<Hub>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%addr, error = %e, "failed to accept websocket");
            return;
        }
    };

    let conn: Arc<dyn Conn> = Arc::new(WebSocketConn::new(ws, addr.to_string()));
    let client = Client::new(conn, config.client.clone());
    let player = Arc::new(RemotePlayer::new(client.clone(), config.reply_timeout));
    attach(&client, player, hub);

    // websockets have no connect frame of their own
    client.dispatch(MessageKind::Connect, String::new());
    client.start();
}

/// Wires the hub-facing actions of `client` to `player`.
fn attach(client: &Client, player: Arc<RemotePlayer>, hub: Arc<Hub>) {
    {
        let hub = hub.clone();
        let player = player.clone();
        client.on_message(MessageKind::Connect, move |_| {
            if let Err(e) = hub.add(player.clone()) {
                warn!(player = %player.id(), error = %e, "cannot add player");
            }
        });
    }
    {
        let hub = hub.clone();
        let id = player.id().to_string();
        client.on_message(MessageKind::Disconnect, move |_| {
            if let Err(e) = hub.remove(&id) {
                warn!(player = %id, error = %e, "cannot remove player");
            }
        });
    }
    client.on_message(MessageKind::Play, move |data| {
        let settings = match serde_json::from_str::<GameSettings>(&data) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(player = %player.id(), %data, error = %e, "bad input for play");
                return;
            }
        };
        tokio::spawn(play(hub.clone(), player.clone(), settings));
    });
}

async fn play(hub: Arc<Hub>, player: Arc<RemotePlayer>, settings: GameSettings) {
    let id = player.id().to_string();
    info!(player = %id, role = %settings.role, ai = settings.ai, "starting game");
    let game = match hub.new_game(player, settings).await {
        Ok(game) => game,
        Err(e) => {
            info!(player = %id, error = %e, "game not started");
            return;
        }
    };
    match game.play().await {
        Ok(rounds) => info!(player = %id, rounds, "game over"),
        Err(e) => info!(player = %id, error = %e, "game aborted"),
    }
}
