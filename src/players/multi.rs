use async_trait::async_trait;

use crate::core::game::{CowsBulls, Guesser};
use crate::error::{Error, Result};

/// Makes several guessers look like one.
///
/// Each guess is asked of the next guesser in turn, wrapping around after
/// the last one; every result is told to all of them.
pub struct MultiGuesser {
    guessers: Vec<Box<dyn Guesser>>,
    turn: usize,
}

impl MultiGuesser {
    pub fn new(guessers: Vec<Box<dyn Guesser>>) -> Self {
        Self { guessers, turn: 0 }
    }

    pub fn len(&self) -> usize {
        self.guessers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guessers.is_empty()
    }
}

#[async_trait]
impl Guesser for MultiGuesser {
    async fn guess(&mut self, digits: usize) -> Result<String> {
        if self.guessers.is_empty() {
            return Err(Error::NoGuesser);
        }
        let turn = self.turn;
        self.turn = (turn + 1) % self.guessers.len();
        self.guessers[turn].guess(digits).await
    }

    /// Stops at the first guesser that fails; the rest are not told.
    async fn tell(&mut self, number: &str, result: CowsBulls) -> Result<()> {
        for guesser in &mut self.guessers {
            guesser.tell(number, result).await?;
        }
        Ok(())
    }
}
