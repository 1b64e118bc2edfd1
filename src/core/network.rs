//! Wire protocol and the duplex message stream the connection actor runs on.
use std::fmt;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, protocol::Message as Frame};
use tokio_tungstenite::WebSocketStream;

use crate::error::{Error, Result};

/// One logical event on the wire: `{"name": kind, "data": json-as-string}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub name: String,
    #[serde(default)]
    pub data: String,
}

impl Message {
    pub fn new(kind: MessageKind, data: impl Into<String>) -> Self {
        Self {
            name: kind.as_str().to_string(),
            data: data.into(),
        }
    }

    /// The decoded kind, or `None` for names this protocol does not know.
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::parse(&self.name)
    }
}

/// Every message kind the protocol recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Connect,
    Disconnect,
    Name,
    Play,
    Think,
    Guess,
    Try,
    Tell,
    Players,
}

impl MessageKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageKind::Connect => "connect",
            MessageKind::Disconnect => "disconnect",
            MessageKind::Name => "name",
            MessageKind::Play => "play",
            MessageKind::Think => "think",
            MessageKind::Guess => "guess",
            MessageKind::Try => "try",
            MessageKind::Tell => "tell",
            MessageKind::Players => "players",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name {
            "connect" => MessageKind::Connect,
            "disconnect" => MessageKind::Disconnect,
            "name" => MessageKind::Name,
            "play" => MessageKind::Play,
            "think" => MessageKind::Think,
            "guess" => MessageKind::Guess,
            "try" => MessageKind::Try,
            "tell" => MessageKind::Tell,
            "players" => MessageKind::Players,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamePayload {
    pub name: String,
}

/// Reply to `think`, request of `guess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitsPayload {
    pub digits: usize,
}

/// Reply to `guess`, request of `try`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberPayload {
    pub number: String,
}

/// Payload of `tell`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TellPayload {
    pub number: String,
    pub cows: usize,
    pub bulls: usize,
}

/// A duplex stream of structured messages.
///
/// The connection actor only ever talks to the network through this trait,
/// so tests can stand in a scripted stream for a real socket.
#[async_trait]
pub trait Conn: Send + Sync + 'static {
    /// Reads started after this call fail once `deadline` passes.
    async fn set_read_deadline(&self, deadline: Instant) -> Result<()>;

    async fn write_message(&self, message: &Message) -> Result<()>;

    async fn read_message(&self) -> Result<Message>;

    fn remote_addr(&self) -> String;

    async fn close(&self) -> Result<()>;
}

/// [`Conn`] over a WebSocket, one JSON envelope per text frame.
pub struct WebSocketConn<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, Frame>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
    deadline: Mutex<Option<Instant>>,
    remote: String,
}

impl<S> WebSocketConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(ws: WebSocketStream<S>, remote: impl Into<String>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            deadline: Mutex::new(None),
            remote: remote.into(),
        }
    }

    async fn next_message(stream: &mut SplitStream<WebSocketStream<S>>) -> Result<Message> {
        loop {
            match stream.next().await {
                Some(Ok(Frame::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Frame::Binary(bytes))) => return Ok(serde_json::from_slice(&bytes)?),
                Some(Ok(Frame::Close(_))) | None => return Err(Error::Closed),
                // ping/pong are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl<S> Conn for WebSocketConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn set_read_deadline(&self, deadline: Instant) -> Result<()> {
        *self.deadline.lock().await = Some(deadline);
        Ok(())
    }

    async fn write_message(&self, message: &Message) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.sink.lock().await.send(Frame::Text(json)).await?;
        Ok(())
    }

    async fn read_message(&self) -> Result<Message> {
        let deadline = *self.deadline.lock().await;
        let mut stream = self.stream.lock().await;
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, Self::next_message(&mut stream))
                .await
                .map_err(|_| Error::DeadlineExceeded)?,
            None => Self::next_message(&mut stream).await,
        }
    }

    fn remote_addr(&self) -> String {
        self.remote.clone()
    }

    async fn close(&self) -> Result<()> {
        match self.sink.lock().await.close().await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in [
            MessageKind::Connect,
            MessageKind::Disconnect,
            MessageKind::Name,
            MessageKind::Play,
            MessageKind::Think,
            MessageKind::Guess,
            MessageKind::Try,
            MessageKind::Tell,
            MessageKind::Players,
        ] {
            assert_eq!(MessageKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::parse("chat"), None);
    }

    #[test]
    fn test_envelope_shape() {
        let message = Message::new(MessageKind::Guess, r#"{"digits":4}"#);
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(json, r#"{"name":"guess","data":"{\"digits\":4}"}"#);

        // data may be omitted for signal-only messages
        let parsed: Message = serde_json::from_str(r#"{"name":"think"}"#).unwrap();
        assert_eq!(parsed.kind(), Some(MessageKind::Think));
        assert!(parsed.data.is_empty());
    }

    #[tokio::test]
    async fn test_websocket_conn_exchanges_envelopes() {
        use tokio_tungstenite::tungstenite::protocol::Role;

        let (a, b) = tokio::io::duplex(4096);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        let server = WebSocketConn::new(server, "client");
        let client = WebSocketConn::new(client, "server");

        client
            .write_message(&Message::new(MessageKind::Name, r#"{"name":"ann"}"#))
            .await
            .unwrap();
        let received = server.read_message().await.unwrap();
        assert_eq!(received.kind(), Some(MessageKind::Name));
        assert_eq!(received.data, r#"{"name":"ann"}"#);
        assert_eq!(server.remote_addr(), "client");
    }

    #[tokio::test]
    async fn test_websocket_conn_read_deadline() {
        use tokio_tungstenite::tungstenite::protocol::Role;

        let (a, _b) = tokio::io::duplex(4096);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let server = WebSocketConn::new(server, "client");

        server
            .set_read_deadline(Instant::now() + std::time::Duration::from_millis(20))
            .await
            .unwrap();
        let err = server.read_message().await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
    }
}
