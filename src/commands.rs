//! Small chat commands: ping, help, dice and the scoreboard

use crate::env::Env;
use crate::groupme::InboundMessage;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use std::fmt;
use thiserror::Error;
use tracing::error;

/// Upper bound on dice per roll
pub const MAX_DICE: u32 = 100;

static DICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d+)d(\d+)$").expect("Invalid dice regex"));

/// Why a roll was refused; the message is what gets posted
#[derive(Error, Debug, PartialEq)]
pub enum DiceError {
    #[error("That's not a valid dice roll format")]
    InvalidFormat,

    #[error("The numbers need to be greater than zero")]
    NotPositive,

    #[error("That's too many dice, 100 at most")]
    TooMany,
}

/// A completed roll of `count` dice with `sides` sides
#[derive(Debug, Clone, PartialEq)]
pub struct DiceRoll {
    pub count: u32,
    pub sides: u32,
    pub rolls: Vec<u32>,
}

impl DiceRoll {
    pub fn total(&self) -> u64 {
        self.rolls.iter().map(|&r| r as u64).sum()
    }
}

impl fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rolls = self
            .rolls
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{}d{} rolled {} ({})",
            self.count,
            self.sides,
            self.total(),
            rolls
        )
    }
}

/// Parse `NdM` into `(count, sides)`
pub fn parse_dice(spec: &str) -> Result<(u32, u32), DiceError> {
    let caps = DICE.captures(spec.trim()).ok_or(DiceError::InvalidFormat)?;
    let is_zero = |digits: &str| digits.bytes().all(|b| b == b'0');
    if is_zero(&caps[1]) || is_zero(&caps[2]) {
        return Err(DiceError::NotPositive);
    }
    // digits that overflow u32 are certainly too many dice or sides
    let count: u32 = caps[1].parse().map_err(|_| DiceError::TooMany)?;
    let sides: u32 = caps[2].parse().map_err(|_| DiceError::InvalidFormat)?;
    if count > MAX_DICE {
        return Err(DiceError::TooMany);
    }
    Ok((count, sides))
}

pub fn roll_dice<R: Rng + ?Sized>(spec: &str, rng: &mut R) -> Result<DiceRoll, DiceError> {
    let (count, sides) = parse_dice(spec)?;
    let rolls = (0..count).map(|_| rng.random_range(1..=sides)).collect();
    Ok(DiceRoll {
        count,
        sides,
        rolls,
    })
}

pub async fn ping(env: &Env, _args: &[String], trigger: &InboundMessage) {
    env.say(&trigger.group_id, "pong").await;
}

pub async fn help(env: &Env, _args: &[String], trigger: &InboundMessage) {
    env.say(&trigger.group_id, env.registry.help_text()).await;
}

pub async fn roll(env: &Env, args: &[String], trigger: &InboundMessage) {
    let spec = args.get(1).map(String::as_str).unwrap_or("");
    // ThreadRng is !Send, so finish with it before awaiting
    let reply = match roll_dice(spec, &mut rand::rng()) {
        Ok(roll) => roll.to_string(),
        Err(e) => e.to_string(),
    };
    env.say(&trigger.group_id, reply).await;
}

/// Leaderboard text, one ranked line per member
pub fn format_scoreboard(counts: &[crate::store::MessageCount]) -> String {
    let mut lines = vec!["🏆 Message Count Leaderboard 🏆\n".to_string()];
    for (rank, entry) in counts.iter().enumerate() {
        lines.push(format!("{}. {}: {}", rank + 1, entry.name, entry.count));
    }
    lines.join("\n")
}

pub async fn scoreboard(env: &Env, _args: &[String], trigger: &InboundMessage) {
    let reply = match env.store.query_message_counts_by_group(&trigger.group_id) {
        Ok(counts) if counts.is_empty() => "No messages recorded yet.".to_string(),
        Ok(counts) => format_scoreboard(&counts),
        Err(e) => {
            error!("Failed to load message counts: {}", e);
            "Error loading the scoreboard :(".to_string()
        }
    };
    env.say(&trigger.group_id, reply).await;
}
