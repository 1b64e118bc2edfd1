//! A hub player on the other end of a [`Client`].
//!
//! The network pushes messages whenever the peer feels like sending them,
//! while games expect a call to return the answer. Each request kind gets a
//! single pending-reply slot: the request parks a oneshot sender there, the
//! matching inbound message completes it, and a timer bounds the wait.
//!
//! Replies are matched by kind only, so there is at most one outstanding
//! request per kind. A second request of the same kind takes over the slot
//! and the first one fails with [`Error::Superseded`].
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::core::game::CowsBulls;
use crate::core::network::{DigitsPayload, MessageKind, NamePayload, NumberPayload, TellPayload};
use crate::core::registry::{Player, PlayerEntry};
use crate::core::websocket::Client;
use crate::error::{Error, Result};

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Single-use rendezvous between one waiting request and the next reply.
struct Slot<T> {
    pending: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }

    fn park(&self) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        let displaced = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(tx);
        if displaced.is_some() {
            debug!("pending reply slot taken over by a newer request");
        }
        rx
    }

    /// Hands `value` to the waiting request. Returns false when nobody waits.
    fn deliver(&self, value: T) -> bool {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match pending {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }
}

struct Replies {
    think: Slot<DigitsPayload>,
    guess: Slot<NumberPayload>,
    try_number: Slot<CowsBulls>,
}

pub struct RemotePlayer {
    client: Arc<Client>,
    name: Arc<RwLock<String>>,
    replies: Arc<Replies>,
    reply_timeout: Duration,
}

impl RemotePlayer {
    /// Wraps `client`, registering the reply actions on it.
    pub fn new(client: Arc<Client>, reply_timeout: Duration) -> Self {
        let name = Arc::new(RwLock::new(String::new()));
        let replies = Arc::new(Replies {
            think: Slot::new(),
            guess: Slot::new(),
            try_number: Slot::new(),
        });

        let display_name = name.clone();
        client.on_message(MessageKind::Name, move |data| {
            match serde_json::from_str::<NamePayload>(&data) {
                Ok(payload) => {
                    *display_name.write().unwrap_or_else(PoisonError::into_inner) = payload.name;
                }
                Err(e) => warn!(%data, error = %e, "remoteplayer: bad input for name"),
            }
        });
        client.on_message(
            MessageKind::Think,
            reply_action(MessageKind::Think, replies.clone(), |r| &r.think),
        );
        client.on_message(
            MessageKind::Guess,
            reply_action(MessageKind::Guess, replies.clone(), |r| &r.guess),
        );
        client.on_message(
            MessageKind::Try,
            reply_action(MessageKind::Try, replies.clone(), |r| &r.try_number),
        );

        Self {
            client,
            name,
            replies,
            reply_timeout,
        }
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    async fn request<T>(
        &self,
        op: &'static str,
        slot: &Slot<T>,
        kind: MessageKind,
        data: String,
    ) -> Result<T> {
        let reply = slot.park();
        self.client.send_message(kind, data).await?;
        match tokio::time::timeout(self.reply_timeout, reply).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(Error::Superseded { op }),
            Err(_) => Err(Error::Timeout { op }),
        }
    }
}

/// Action decoding a reply of `kind` into the slot `pick` selects.
fn reply_action<T>(
    kind: MessageKind,
    replies: Arc<Replies>,
    pick: fn(&Replies) -> &Slot<T>,
) -> impl Fn(String) + Send + Sync + 'static
where
    T: DeserializeOwned + Send + 'static,
{
    move |data| match serde_json::from_str::<T>(&data) {
        Ok(value) => {
            if !pick(&replies).deliver(value) {
                debug!(%kind, "no request waiting, reply dropped");
            }
        }
        Err(e) => warn!(%kind, %data, error = %e, "remoteplayer: bad input"),
    }
}

#[async_trait]
impl Player for RemotePlayer {
    fn id(&self) -> &str {
        self.client.id()
    }

    fn name(&self) -> String {
        self.name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn announce_players(&self, players: &[PlayerEntry]) -> Result<()> {
        let data = serde_json::to_string(players)?;
        self.client.send_message(MessageKind::Players, data).await
    }

    async fn think(&self) -> Result<usize> {
        let reply = self
            .request("think", &self.replies.think, MessageKind::Think, String::new())
            .await?;
        Ok(reply.digits)
    }

    async fn try_number(&self, number: &str) -> Result<CowsBulls> {
        let data = serde_json::to_string(&NumberPayload {
            number: number.to_string(),
        })?;
        self.request("try", &self.replies.try_number, MessageKind::Try, data)
            .await
    }

    async fn guess(&self, digits: usize) -> Result<String> {
        let data = serde_json::to_string(&DigitsPayload { digits })?;
        let reply = self
            .request("guess", &self.replies.guess, MessageKind::Guess, data)
            .await?;
        Ok(reply.number)
    }

    async fn tell(&self, number: &str, result: CowsBulls) -> Result<()> {
        let data = serde_json::to_string(&TellPayload {
            number: number.to_string(),
            cows: result.cows,
            bulls: result.bulls,
        })?;
        self.client.send_message(MessageKind::Tell, data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::network::Message;
    use crate::core::websocket::tests::FakeConn;
    use crate::core::websocket::ClientOptions;

    struct Harness {
        conn: Arc<FakeConn>,
        player: Arc<RemotePlayer>,
    }

    impl Harness {
        fn new(reply_timeout: Duration) -> Self {
            let conn = Arc::new(FakeConn::idle());
            let client = Client::new(conn.clone(), ClientOptions::default());
            let player = Arc::new(RemotePlayer::new(client, reply_timeout));
            Self { conn, player }
        }

        /// Feeds an inbound message straight into the dispatch table.
        fn reply(&self, kind: MessageKind, data: &str) {
            self.player.client().dispatch(kind, data.to_string());
        }

        fn written(&self) -> Vec<Message> {
            self.conn.written.lock().unwrap().clone()
        }

        /// Waits until `count` messages were written.
        async fn sent(&self, count: usize) {
            for _ in 0..200 {
                if self.written().len() >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("expected {count} messages, got {:?}", self.written());
        }
    }

    #[tokio::test]
    async fn test_think_returns_digits() {
        let h = Harness::new(Duration::from_secs(5));
        let player = h.player.clone();
        let call = tokio::spawn(async move { player.think().await });
        h.sent(1).await;
        assert_eq!(h.written()[0], Message::new(MessageKind::Think, ""));

        h.reply(MessageKind::Think, r#"{"digits":4}"#);
        assert_eq!(call.await.unwrap().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_guess_sends_digits_and_returns_number() {
        let h = Harness::new(Duration::from_secs(5));
        let player = h.player.clone();
        let call = tokio::spawn(async move { player.guess(4).await });
        h.sent(1).await;
        assert_eq!(h.written()[0], Message::new(MessageKind::Guess, r#"{"digits":4}"#));

        h.reply(MessageKind::Guess, r#"{"number":"1234"}"#);
        assert_eq!(call.await.unwrap().unwrap(), "1234");
    }

    #[tokio::test]
    async fn test_try_returns_cows_and_bulls() {
        let h = Harness::new(Duration::from_secs(5));
        let player = h.player.clone();
        let call = tokio::spawn(async move { player.try_number("1234").await });
        h.sent(1).await;
        assert_eq!(h.written()[0], Message::new(MessageKind::Try, r#"{"number":"1234"}"#));

        h.reply(MessageKind::Try, r#"{"cows":1,"bulls":2}"#);
        assert_eq!(call.await.unwrap().unwrap(), CowsBulls::new(1, 2));
    }

    #[tokio::test]
    async fn test_guess_times_out() {
        let h = Harness::new(Duration::from_millis(30));
        let err = h.player.guess(4).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("guess timed out"));
    }

    #[tokio::test]
    async fn test_malformed_reply_is_dropped() {
        let h = Harness::new(Duration::from_millis(50));
        let player = h.player.clone();
        let call = tokio::spawn(async move { player.think().await });
        h.sent(1).await;

        h.reply(MessageKind::Think, "not json");
        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "think timed out");
    }

    #[tokio::test]
    async fn test_late_reply_is_not_delivered_to_next_request() {
        let h = Harness::new(Duration::from_millis(30));
        assert!(h.player.guess(4).await.is_err());
        h.reply(MessageKind::Guess, r#"{"number":"1111"}"#);

        let player = h.player.clone();
        let call = tokio::spawn(async move { player.guess(4).await });
        h.sent(2).await;
        h.reply(MessageKind::Guess, r#"{"number":"2222"}"#);
        assert_eq!(call.await.unwrap().unwrap(), "2222");
    }

    #[tokio::test]
    async fn test_same_kind_requests_share_one_slot() {
        let h = Harness::new(Duration::from_secs(5));
        let first = {
            let player = h.player.clone();
            tokio::spawn(async move { player.guess(4).await })
        };
        h.sent(1).await;
        let second = {
            let player = h.player.clone();
            tokio::spawn(async move { player.guess(4).await })
        };
        h.sent(2).await;

        h.reply(MessageKind::Guess, r#"{"number":"1234"}"#);
        assert!(matches!(first.await.unwrap(), Err(Error::Superseded { op: "guess" })));
        assert_eq!(second.await.unwrap().unwrap(), "1234");
    }

    #[tokio::test]
    async fn test_tell_and_announce_are_fire_and_forget() {
        let h = Harness::new(Duration::from_secs(5));
        h.player.tell("1234", CowsBulls::new(1, 2)).await.unwrap();
        h.player
            .announce_players(&[PlayerEntry {
                id: "x".to_string(),
                name: "ann".to_string(),
            }])
            .await
            .unwrap();

        assert_eq!(
            h.written(),
            vec![
                Message::new(MessageKind::Tell, r#"{"number":"1234","cows":1,"bulls":2}"#),
                Message::new(MessageKind::Players, r#"[{"id":"x","name":"ann"}]"#),
            ]
        );
    }

    #[tokio::test]
    async fn test_name_updates_display_name() {
        let h = Harness::new(Duration::from_secs(5));
        assert_eq!(h.player.name(), "");
        h.reply(MessageKind::Name, r#"{"name":"ann"}"#);
        assert_eq!(h.player.name(), "ann");
        h.reply(MessageKind::Name, "garbage");
        assert_eq!(h.player.name(), "ann");
        assert_eq!(h.player.id(), h.player.client().id());
    }
}
