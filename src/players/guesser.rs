use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_core::RngCore;

use crate::core::game::{CowsBulls, Guesser};
use crate::error::{Error, Result};
use crate::players::thinker::MAX_DIGITS;

/// Local guesser that keeps every number still consistent with the scores
/// it was told, and guesses one of them at random.
pub struct AiGuesser<R = StdRng> {
    digits: usize,
    candidates: Vec<String>,
    rng: R,
}

impl AiGuesser {
    pub fn new(digits: usize) -> Self {
        Self::with_rng(digits, StdRng::from_rng(&mut rand::rng()))
    }
}

impl<R: RngCore> AiGuesser<R> {
    pub fn with_rng(digits: usize, rng: R) -> Self {
        let mut candidates = Vec::new();
        if digits <= MAX_DIGITS {
            let mut alphabet = *b"1234567890";
            variations(&mut alphabet, digits, 0, &mut candidates);
        }
        Self {
            digits,
            candidates,
            rng,
        }
    }

    /// How many numbers are still possible.
    pub fn remaining(&self) -> usize {
        self.candidates.len()
    }
}

#[async_trait]
impl<R: RngCore + Send> Guesser for AiGuesser<R> {
    async fn guess(&mut self, digits: usize) -> Result<String> {
        if digits != self.digits {
            return Err(Error::DigitMismatch {
                expected: self.digits,
                got: digits,
            });
        }
        if self.candidates.is_empty() {
            return Err(Error::InvalidInput);
        }
        let idx = self.rng.random_range(0..self.candidates.len());
        Ok(self.candidates.swap_remove(idx))
    }

    async fn tell(&mut self, number: &str, result: CowsBulls) -> Result<()> {
        if result.is_solved(number.len()) {
            return Ok(());
        }
        self.candidates
            .retain(|candidate| CowsBulls::score(candidate, number) == result);
        if self.candidates.is_empty() {
            return Err(Error::InvalidInput);
        }
        Ok(())
    }
}

/// Collects every ordered selection of `n` distinct symbols of `alphabet`.
fn variations(alphabet: &mut [u8], n: usize, k: usize, out: &mut Vec<String>) {
    if k == n {
        out.push(String::from_utf8_lossy(&alphabet[..n]).into_owned());
        return;
    }
    for i in k..alphabet.len() {
        alphabet.swap(k, i);
        variations(alphabet, n, k + 1, out);
        alphabet.swap(k, i);
    }
}
