pub mod guesser;
pub mod multi;
pub mod remote;
pub mod thinker;

pub use guesser::AiGuesser;
pub use multi::MultiGuesser;
pub use remote::{RemotePlayer, DEFAULT_REPLY_TIMEOUT};
pub use thinker::{AiThinker, MAX_DIGITS};
