//! Number-guessing demo worker
//!
//! Keeps a secret number in the session's persistent parameters and compares
//! it against a `guess` request parameter. A fresh secret is minted the
//! first time a session plays.

use rand::Rng;

use crate::context::{ResponseContext, Sink};
use crate::error::ServerError;

use super::Worker;

const LOWER: i64 = 1;
const UPPER: i64 = 100;

pub struct GuessNumberWorker;

impl Worker for GuessNumberWorker {
    fn process(&self, ctx: &mut ResponseContext<Sink>) -> Result<(), ServerError> {
        ctx.set_mime_type("text/plain")?;

        let secret = match ctx.get_persistent_parameter("secret", "").parse::<i64>() {
            Ok(v) => v,
            Err(_) => {
                let v = rand::thread_rng().gen_range(LOWER..=UPPER);
                ctx.set_persistent_parameter("secret", &v.to_string())?;
                v
            }
        };

        let Some(guess_raw) = ctx.get_parameter("guess").map(str::to_string) else {
            ctx.write_str(&format!(
                "Guess a number between {} and {} via ?guess=N\n",
                LOWER, UPPER
            ))?;
            return Ok(());
        };

        match guess_raw.parse::<i64>() {
            Ok(guess) if guess < secret => ctx.write_str("Too low\n")?,
            Ok(guess) if guess > secret => ctx.write_str("Too high\n")?,
            Ok(_) => {
                ctx.write_str("Correct!\n")?;
                ctx.remove_persistent_parameter("secret")?;
            }
            Err(_) => ctx.write_str("Not a number\n")?,
        }
        Ok(())
    }
}
