/// Core game interface: the two roles and the turn loop that drives them
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Score of a guess against a secret number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CowsBulls {
    /// Digits present in the secret at a different position.
    pub cows: usize,
    /// Digits matching the secret in value and position.
    pub bulls: usize,
}

impl CowsBulls {
    pub fn new(cows: usize, bulls: usize) -> Self {
        Self { cows, bulls }
    }

    /// Scores `guess` against `secret`, position by position.
    pub fn score(secret: &str, guess: &str) -> Self {
        let secret = secret.as_bytes();
        let mut result = Self::default();
        for (i, digit) in guess.bytes().enumerate() {
            if secret.get(i) == Some(&digit) {
                result.bulls += 1;
            } else if secret.contains(&digit) {
                result.cows += 1;
            }
        }
        result
    }

    /// Whether this score means a guess of `digits` digits hit the secret.
    pub fn is_solved(&self, digits: usize) -> bool {
        self.bulls == digits
    }
}

/// The side holding the secret number.
#[async_trait]
pub trait Thinker: Send {
    /// Thinks of a number and returns how many digits it has.
    async fn think(&mut self) -> Result<usize>;

    /// Scores a guess against the number thought of.
    async fn try_number(&mut self, number: &str) -> Result<CowsBulls>;
}

/// The side trying to find the secret number.
#[async_trait]
pub trait Guesser: Send {
    /// Proposes a number of `digits` digits.
    async fn guess(&mut self, digits: usize) -> Result<String>;

    /// Reports the score of `number`.
    async fn tell(&mut self, number: &str, result: CowsBulls) -> Result<()>;
}

/// One match between a thinker and a guesser.
pub struct Game {
    thinker: Box<dyn Thinker>,
    guesser: Box<dyn Guesser>,
}

impl Game {
    pub fn new(thinker: Box<dyn Thinker>, guesser: Box<dyn Guesser>) -> Self {
        Self { thinker, guesser }
    }

    /// Runs the turn loop until the number is guessed.
    ///
    /// Returns the number of guesses it took. The first error from either
    /// side ends the game and is returned as is.
    pub async fn play(mut self) -> Result<usize> {
        let digits = self.thinker.think().await?;
        let mut rounds = 0;
        loop {
            rounds += 1;
            let guess = self.guesser.guess(digits).await?;
            let result = self.thinker.try_number(&guess).await?;
            debug!(%guess, cows = result.cows, bulls = result.bulls, rounds, "guess scored");
            self.guesser.tell(&guess, result).await?;
            if result.is_solved(digits) {
                return Ok(rounds);
            }
        }
    }
}

/// Builds a game once the hub has resolved both roles.
pub trait GameFactory: Send + Sync + 'static {
    type Game: Send + 'static;

    fn game(&self, thinker: Box<dyn Thinker>, guesser: Box<dyn Guesser>) -> Result<Self::Game>;
}

/// The default factory, producing a plain [`Game`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Engine;

impl GameFactory for Engine {
    type Game = Game;

    fn game(&self, thinker: Box<dyn Thinker>, guesser: Box<dyn Guesser>) -> Result<Game> {
        Ok(Game::new(thinker, guesser))
    }
}
