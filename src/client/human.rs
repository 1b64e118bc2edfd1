//! Terminal players: a person typing numbers at a prompt.
use async_trait::async_trait;
use dialoguer::{theme::ColorfulTheme, Input};

use crate::core::game::{CowsBulls, Guesser, Thinker};
use crate::error::{Error, Result};
use crate::players::MAX_DIGITS;

/// Checks that `input` is a number of distinct digits, `digits` long when given.
pub fn validate_number(input: &str, digits: Option<usize>) -> std::result::Result<(), String> {
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err("only digits, please".to_string());
    }
    if input.len() > MAX_DIGITS {
        return Err(format!("at most {MAX_DIGITS} digits"));
    }
    if let Some(digits) = digits {
        if input.len() != digits {
            return Err(format!("exactly {digits} digits, please"));
        }
    }
    let mut seen = [false; 10];
    for b in input.bytes() {
        let d = usize::from(b - b'0');
        if seen[d] {
            return Err(format!("digit {d} is repeated"));
        }
        seen[d] = true;
    }
    Ok(())
}

async fn prompt(text: String, digits: Option<usize>) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(text)
            .validate_with(move |input: &String| validate_number(input, digits))
            .interact_text()
    })
    .await
    .map_err(|e| Error::Prompt(e.to_string()))?
    .map_err(|e| Error::Prompt(e.to_string()))
}

/// Asks for a secret number once per game, then scores guesses against it.
#[derive(Debug, Default)]
pub struct HumanThinker {
    number: String,
}

#[async_trait]
impl Thinker for HumanThinker {
    async fn think(&mut self) -> Result<usize> {
        self.number = prompt("Think of a number with distinct digits".to_string(), None).await?;
        Ok(self.number.len())
    }

    async fn try_number(&mut self, number: &str) -> Result<CowsBulls> {
        if number.len() != self.number.len() {
            return Err(Error::DigitMismatch {
                expected: self.number.len(),
                got: number.len(),
            });
        }
        let result = CowsBulls::score(&self.number, number);
        println!("They tried {number}: {} cows, {} bulls", result.cows, result.bulls);
        Ok(result)
    }
}

/// Asks for every guess. Results are shown by the session.
#[derive(Debug, Default)]
pub struct HumanGuesser;

#[async_trait]
impl Guesser for HumanGuesser {
    async fn guess(&mut self, digits: usize) -> Result<String> {
        prompt(format!("Your guess ({digits} digits)"), Some(digits)).await
    }

    async fn tell(&mut self, _number: &str, _result: CowsBulls) -> Result<()> {
        Ok(())
    }
}
