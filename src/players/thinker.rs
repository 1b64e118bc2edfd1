use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_core::RngCore;

use crate::core::game::{CowsBulls, Thinker};
use crate::error::{Error, Result};

/// Longest number with distinct digits.
pub const MAX_DIGITS: usize = 10;

/// Local thinker that picks numbers with distinct digits and no leading zero.
pub struct AiThinker<R = StdRng> {
    digits: usize,
    number: String,
    rng: R,
}

impl AiThinker {
    pub fn new(digits: usize) -> Self {
        Self::with_rng(digits, StdRng::from_rng(&mut rand::rng()))
    }
}

impl<R: RngCore> AiThinker<R> {
    /// Uses `rng` for every number it thinks of, so seeded sources give
    /// reproducible games.
    pub fn with_rng(digits: usize, rng: R) -> Self {
        Self {
            digits,
            number: String::new(),
            rng,
        }
    }

    /// The number currently thought of, empty before the first `think`.
    pub fn number(&self) -> &str {
        &self.number
    }

    fn generate(&mut self) -> Result<String> {
        if !(1..=MAX_DIGITS).contains(&self.digits) {
            return Err(Error::InvalidDigitCount(self.digits));
        }
        let mut perm: Vec<u8> = (0..10).collect();
        perm.shuffle(&mut self.rng);
        if perm[0] == 0 {
            // a one digit number has no other chosen digit to trade places with
            let upper = if self.digits > 1 { self.digits } else { perm.len() };
            let idx = self.rng.random_range(1..upper);
            perm.swap(0, idx);
        }
        Ok(perm[..self.digits]
            .iter()
            .map(|d| char::from(b'0' + d))
            .collect())
    }
}

#[async_trait]
impl<R: RngCore + Send> Thinker for AiThinker<R> {
    async fn think(&mut self) -> Result<usize> {
        self.number = self.generate()?;
        Ok(self.number.len())
    }

    async fn try_number(&mut self, number: &str) -> Result<CowsBulls> {
        if number.len() != self.number.len() {
            return Err(Error::DigitMismatch {
                expected: self.number.len(),
                got: number.len(),
            });
        }
        Ok(CowsBulls::score(&self.number, number))
    }
}
