//! The joining side: announces itself to a host and answers its requests.
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use crate::client::human::{HumanGuesser, HumanThinker};
use crate::core::game::{CowsBulls, Guesser, Thinker};
use crate::core::network::{
    Conn, DigitsPayload, MessageKind, NamePayload, NumberPayload, TellPayload, WebSocketConn,
};
use crate::core::registry::{GameSettings, PlayerEntry};
use crate::core::websocket::{Client, ClientOptions};
use crate::error::{Error, Result};
use crate::players::{AiGuesser, AiThinker};

/// Digit count the local AI thinks of when no game settings say otherwise.
pub const DEFAULT_DIGITS: usize = 4;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Display name sent right after connecting.
    pub name: String,
    /// Game to request once connected. Without one the session only waits
    /// to be challenged.
    pub settings: Option<GameSettings>,
    /// Answer with the local AI instead of prompting.
    pub ai: bool,
}

/// Server request or notice, in arrival order.
#[derive(Debug)]
enum Inbound {
    Think,
    Guess(usize),
    Try(String),
    Tell(TellPayload),
    Players(Vec<PlayerEntry>),
    Disconnect,
}

/// Connects to `url` and plays until the host goes away or, when this
/// session asked for a game, until that game is won.
pub async fn connect_and_play(url: &str, config: SessionConfig, options: ClientOptions) -> Result<()> {
    let (ws, _) = connect_async(url).await?;
    info!(%url, "connected");
    let conn: Arc<dyn Conn> = Arc::new(WebSocketConn::new(ws, url));
    Session::new(conn, config, options).run().await
}

pub struct Session {
    client: Arc<Client>,
    config: SessionConfig,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl Session {
    pub fn new(conn: Arc<dyn Conn>, config: SessionConfig, options: ClientOptions) -> Self {
        let client = Client::new(conn, options);
        let (tx, inbound) = mpsc::unbounded_channel();
        forward(&client, tx);
        Self {
            client,
            config,
            inbound,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        self.client.start();
        let name = serde_json::to_string(&NamePayload {
            name: self.config.name.clone(),
        })?;
        self.client.send_message(MessageKind::Name, name).await?;
        if let Some(settings) = &self.config.settings {
            let play = serde_json::to_string(settings)?;
            self.client.send_message(MessageKind::Play, play).await?;
        }

        let digits = match &self.config.settings {
            Some(settings) if settings.digits > 0 => settings.digits,
            _ => DEFAULT_DIGITS,
        };
        let mut answers = Answers::new(self.config.ai, digits);
        let until_won = self.config.settings.is_some();

        tokio::select! {
            _ = answer(&self.client, &mut self.inbound, &mut answers, until_won) => {}
            _ = tokio::signal::ctrl_c() => info!("interrupted"),
        }
        self.client.close().await
    }
}

/// Turns inbound messages into queue entries, keeping their order.
fn forward(client: &Client, tx: mpsc::UnboundedSender<Inbound>) {
    fn decode<T: serde::de::DeserializeOwned>(kind: MessageKind, data: &str) -> Option<T> {
        serde_json::from_str(data)
            .map_err(|e| warn!(%kind, %data, error = %e, "bad input from host"))
            .ok()
    }

    let queue = tx.clone();
    client.on_message(MessageKind::Think, move |_| {
        let _ = queue.send(Inbound::Think);
    });
    let queue = tx.clone();
    client.on_message(MessageKind::Guess, move |data| {
        if let Some(p) = decode::<DigitsPayload>(MessageKind::Guess, &data) {
            let _ = queue.send(Inbound::Guess(p.digits));
        }
    });
    let queue = tx.clone();
    client.on_message(MessageKind::Try, move |data| {
        if let Some(p) = decode::<NumberPayload>(MessageKind::Try, &data) {
            let _ = queue.send(Inbound::Try(p.number));
        }
    });
    let queue = tx.clone();
    client.on_message(MessageKind::Tell, move |data| {
        if let Some(p) = decode::<TellPayload>(MessageKind::Tell, &data) {
            let _ = queue.send(Inbound::Tell(p));
        }
    });
    let queue = tx.clone();
    client.on_message(MessageKind::Players, move |data| {
        if let Some(p) = decode::<Vec<PlayerEntry>>(MessageKind::Players, &data) {
            let _ = queue.send(Inbound::Players(p));
        }
    });
    client.on_message(MessageKind::Disconnect, move |_| {
        let _ = tx.send(Inbound::Disconnect);
    });
}

/// Works through the queue until the host leaves or a game of ours is won.
async fn answer(
    client: &Client,
    inbound: &mut mpsc::UnboundedReceiver<Inbound>,
    answers: &mut Answers,
    until_won: bool,
) {
    while let Some(message) = inbound.recv().await {
        let won = match message {
            Inbound::Think => {
                let reply = answers
                    .think()
                    .await
                    .and_then(|digits| Ok(serde_json::to_string(&DigitsPayload { digits })?));
                reply_with(client, MessageKind::Think, reply).await;
                false
            }
            Inbound::Guess(digits) => {
                let reply = answers
                    .guess(digits)
                    .await
                    .and_then(|number| Ok(serde_json::to_string(&NumberPayload { number })?));
                reply_with(client, MessageKind::Guess, reply).await;
                false
            }
            Inbound::Try(number) => {
                let result = answers.try_number(&number).await;
                let solved = matches!(&result, Ok(r) if r.is_solved(number.len()));
                let reply = result.and_then(|r| Ok(serde_json::to_string(&r)?));
                reply_with(client, MessageKind::Try, reply).await;
                if solved {
                    println!("{number} is right, the guessers won");
                }
                solved
            }
            Inbound::Tell(tell) => {
                let result = CowsBulls::new(tell.cows, tell.bulls);
                println!("{}: {} cows, {} bulls", tell.number, result.cows, result.bulls);
                if let Err(e) = answers.tell(&tell.number, result).await {
                    warn!(error = %e, "cannot take the result into account");
                }
                let solved = result.is_solved(tell.number.len());
                if solved {
                    println!("{} is the number!", tell.number);
                }
                solved
            }
            Inbound::Players(players) => {
                println!("Players online:");
                for player in players {
                    println!("  {} ({})", player.name, player.id);
                }
                false
            }
            Inbound::Disconnect => {
                info!("host closed the connection");
                return;
            }
        };
        if won && until_won {
            return;
        }
    }
}

async fn reply_with(client: &Client, kind: MessageKind, reply: Result<String>) {
    match reply {
        Ok(data) => {
            if let Err(e) = client.send_message(kind, data).await {
                warn!(%kind, error = %e, "cannot send reply");
            }
        }
        Err(e) => warn!(%kind, error = %e, "no answer"),
    }
}

/// The local player behind the session, one thinker or guesser per game.
///
/// The host never says when a game ends early, so a guesser is kept until it
/// wins, is contradicted, runs dry, or this side is asked to think.
struct Answers {
    ai: bool,
    digits: usize,
    thinker: Option<Box<dyn Thinker>>,
    guesser: Option<(usize, Box<dyn Guesser>)>,
}

impl Answers {
    fn new(ai: bool, digits: usize) -> Self {
        Self {
            ai,
            digits,
            thinker: None,
            guesser: None,
        }
    }

    async fn think(&mut self) -> Result<usize> {
        let mut thinker: Box<dyn Thinker> = if self.ai {
            Box::new(AiThinker::new(self.digits))
        } else {
            Box::new(HumanThinker::default())
        };
        self.guesser = None;
        let digits = thinker.think().await?;
        self.thinker = Some(thinker);
        Ok(digits)
    }

    async fn try_number(&mut self, number: &str) -> Result<CowsBulls> {
        match self.thinker.as_mut() {
            Some(thinker) => thinker.try_number(number).await,
            None => Err(Error::InvalidInput),
        }
    }

    async fn guess(&mut self, digits: usize) -> Result<String> {
        if let Some((d, guesser)) = self.guesser.as_mut() {
            if *d == digits {
                match guesser.guess(digits).await {
                    Ok(number) => return Ok(number),
                    // left over from a game that never finished
                    Err(e) => debug!(error = %e, "starting over with a new guesser"),
                }
            }
        }
        debug!(digits, "new guesser");
        let mut guesser: Box<dyn Guesser> = if self.ai {
            Box::new(AiGuesser::new(digits))
        } else {
            Box::new(HumanGuesser)
        };
        let number = guesser.guess(digits).await?;
        self.guesser = Some((digits, guesser));
        Ok(number)
    }

    async fn tell(&mut self, number: &str, result: CowsBulls) -> Result<()> {
        let outcome = match self.guesser.as_mut() {
            Some((_, guesser)) => guesser.tell(number, result).await,
            None => Ok(()),
        };
        if outcome.is_err() || result.is_solved(number.len()) {
            self.guesser = None;
        }
        outcome
    }
}
