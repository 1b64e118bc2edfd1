//! Error types shared by the hub, the players and the transport.

use tokio_tungstenite::tungstenite;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying WebSocket failed on read, write or close.
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    /// The stream ended or was closed by the peer.
    #[error("connection closed")]
    Closed,

    /// No message arrived before the read deadline.
    #[error("read deadline exceeded")]
    DeadlineExceeded,

    /// A payload could not be encoded or decoded.
    #[error("malformed payload: {0}")]
    Protocol(#[from] serde_json::Error),

    /// No reply arrived before the reply timeout.
    #[error("{op} timed out")]
    Timeout { op: &'static str },

    /// A newer request of the same kind took over the pending reply slot.
    #[error("{op} superseded by a newer request")]
    Superseded { op: &'static str },

    #[error("invalid digit count {0}")]
    InvalidDigitCount(usize),

    #[error("digit count mismatch: expected {expected}, got {got}")]
    DigitMismatch { expected: usize, got: usize },

    /// The reported cows and bulls contradict every remaining candidate.
    #[error("invalid input")]
    InvalidInput,

    #[error("invalid role {0:?}")]
    InvalidRole(String),

    #[error("no guesser specified")]
    NoGuesser,

    #[error("invalid opponent count {0}: a game has exactly one thinker")]
    OpponentCount(usize),

    #[error("playing against an AI guesser is not supported")]
    AiGuesserUnsupported,

    /// The hub's processing loop is gone.
    #[error("hub is shut down")]
    HubClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A terminal prompt could not be shown or answered.
    #[error("prompt failed: {0}")]
    Prompt(String),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
