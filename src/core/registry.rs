use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::core::game::{CowsBulls, Engine, GameFactory, Guesser, Thinker};
use crate::error::{Error, Result};
use crate::players::{AiThinker, MultiGuesser};

/// Roster line announced to every player.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub id: String,
    pub name: String,
}

/// A hub member. It can take either side of a game.
#[async_trait]
pub trait Player: Send + Sync + 'static {
    /// Unique within the hub.
    fn id(&self) -> &str;

    /// Display name, possibly empty.
    fn name(&self) -> String;

    async fn announce_players(&self, players: &[PlayerEntry]) -> Result<()>;

    async fn think(&self) -> Result<usize>;

    async fn try_number(&self, number: &str) -> Result<CowsBulls>;

    async fn guess(&self, digits: usize) -> Result<String>;

    async fn tell(&self, number: &str, result: CowsBulls) -> Result<()>;
}

#[async_trait]
impl<P: Player + ?Sized> Thinker for Arc<P> {
    async fn think(&mut self) -> Result<usize> {
        (**self).think().await
    }

    async fn try_number(&mut self, number: &str) -> Result<CowsBulls> {
        (**self).try_number(number).await
    }
}

#[async_trait]
impl<P: Player + ?Sized> Guesser for Arc<P> {
    async fn guess(&mut self, digits: usize) -> Result<String> {
        (**self).guess(digits).await
    }

    async fn tell(&mut self, number: &str, result: CowsBulls) -> Result<()> {
        (**self).tell(number, result).await
    }
}

/// What a player asks for when starting a game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSettings {
    /// Role of the requesting player, `thinker` or `guesser`.
    pub role: String,
    /// Digit count of the number, used when playing against the AI.
    #[serde(default)]
    pub digits: usize,
    /// Whether the opponent is the AI.
    #[serde(default)]
    pub ai: bool,
    /// Ids of the requested opponents.
    #[serde(default)]
    pub opponents: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Thinker,
    Guesser,
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(role: &str) -> Result<Self> {
        match role {
            "thinker" => Ok(Role::Thinker),
            "guesser" => Ok(Role::Guesser),
            other => Err(Error::InvalidRole(other.to_string())),
        }
    }
}

enum HubOp {
    Add(Arc<dyn Player>),
    Remove(String),
    Players(oneshot::Sender<Vec<PlayerEntry>>),
    Lookup(Vec<String>, oneshot::Sender<Vec<Arc<dyn Player>>>),
}

/// Registry of connected players.
///
/// The player map is owned by a single task; every method only queues an
/// operation for it, so operations apply in submission order without locks.
pub struct Hub<F = Engine> {
    ops: mpsc::UnboundedSender<HubOp>,
    factory: F,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_factory(Engine)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: GameFactory> Hub<F> {
    /// Starts the hub task. Must be called within a tokio runtime.
    pub fn with_factory(factory: F) -> Self {
        let (ops, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self { ops, factory }
    }

    /// Adds a player; everyone, the newcomer included, then gets the roster.
    pub fn add(&self, player: Arc<dyn Player>) -> Result<()> {
        self.submit(HubOp::Add(player))
    }

    /// Removes a player; everyone left then gets the roster.
    pub fn remove(&self, id: &str) -> Result<()> {
        self.submit(HubOp::Remove(id.to_string()))
    }

    /// Snapshot of the roster, in no particular order.
    pub async fn players(&self) -> Result<Vec<PlayerEntry>> {
        let (tx, rx) = oneshot::channel();
        self.submit(HubOp::Players(tx))?;
        rx.await.map_err(|_| Error::HubClosed)
    }

    /// Builds a game for `from` according to `settings`.
    pub async fn new_game(&self, from: Arc<dyn Player>, settings: GameSettings) -> Result<F::Game> {
        match settings.role.parse::<Role>()? {
            Role::Thinker => {
                if settings.ai {
                    return Err(Error::AiGuesserUnsupported);
                }
                let mut opponents = self.players_with_ids(settings.opponents).await?;
                let guesser: Box<dyn Guesser> = match opponents.len() {
                    0 => return Err(Error::NoGuesser),
                    1 => Box::new(opponents.remove(0)),
                    _ => Box::new(MultiGuesser::new(
                        opponents
                            .into_iter()
                            .map(|p| Box::new(p) as Box<dyn Guesser>)
                            .collect(),
                    )),
                };
                self.factory.game(Box::new(from), guesser)
            }
            Role::Guesser => {
                let thinker: Box<dyn Thinker> = if settings.ai {
                    Box::new(AiThinker::new(settings.digits))
                } else {
                    let mut opponents = self.players_with_ids(settings.opponents).await?;
                    if opponents.len() != 1 {
                        return Err(Error::OpponentCount(opponents.len()));
                    }
                    Box::new(opponents.remove(0))
                };
                self.factory.game(thinker, Box::new(from))
            }
        }
    }

    /// Players with the given ids, in the order asked; unknown ids are skipped.
    async fn players_with_ids(&self, ids: Vec<String>) -> Result<Vec<Arc<dyn Player>>> {
        let (tx, rx) = oneshot::channel();
        self.submit(HubOp::Lookup(ids, tx))?;
        rx.await.map_err(|_| Error::HubClosed)
    }

    fn submit(&self, op: HubOp) -> Result<()> {
        self.ops.send(op).map_err(|_| Error::HubClosed)
    }
}

async fn run(mut ops: mpsc::UnboundedReceiver<HubOp>) {
    let mut players: HashMap<String, Arc<dyn Player>> = HashMap::new();
    while let Some(op) = ops.recv().await {
        match op {
            HubOp::Add(player) => {
                info!(player = %player.id(), "player joined");
                players.insert(player.id().to_string(), player);
                broadcast_players(&players).await;
            }
            HubOp::Remove(id) => {
                if players.remove(&id).is_some() {
                    info!(player = %id, "player left");
                }
                broadcast_players(&players).await;
            }
            HubOp::Players(reply) => {
                let _ = reply.send(roster(&players));
            }
            HubOp::Lookup(ids, reply) => {
                let found = ids
                    .iter()
                    .filter_map(|id| players.get(id).cloned())
                    .collect();
                let _ = reply.send(found);
            }
        }
    }
}

fn roster(players: &HashMap<String, Arc<dyn Player>>) -> Vec<PlayerEntry> {
    players
        .values()
        .map(|p| PlayerEntry {
            id: p.id().to_string(),
            name: p.name(),
        })
        .collect()
}

async fn broadcast_players(players: &HashMap<String, Arc<dyn Player>>) {
    let entries = roster(players);
    for player in players.values() {
        if let Err(e) = player.announce_players(&entries).await {
            warn!(player = %player.id(), error = %e, "error announcing players");
        }
    }
}
