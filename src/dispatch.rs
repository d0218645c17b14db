//! Webhook message dispatch
//!
//! Every inbound message is persisted first, then routed to exactly one of:
//! a registered command, the unknown-command reply, the AI responder, or
//! nothing at all.

use crate::chat;
use crate::env::Env;
use crate::groupme::InboundMessage;
use tracing::{debug, error, info};

pub const UNKNOWN_COMMAND: &str = "That's not a command";

/// Which branch a message took
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Command(String),
    UnknownCommand(String),
    Ai,
    Ignored,
}

/// Split a slash command into `[name, args...]`; `None` for anything else.
/// The name is lowercased and loses its slash.
pub fn parse_command(text: &str) -> Option<Vec<String>> {
    let text = text.trim();
    let body = text.strip_prefix('/')?;
    let mut tokens: Vec<String> = body.split_whitespace().map(str::to_string).collect();
    match tokens.first_mut() {
        Some(name) => {
            *name = name.to_lowercase();
            Some(tokens)
        }
        None => Some(vec![String::new()]),
    }
}

/// Whether free text should be answered by the language model; never when
/// no model is configured
pub fn mentions_bot(env: &Env, msg: &InboundMessage) -> bool {
    let trigger = env.config.mention_trigger.to_lowercase();
    env.llm.is_enabled()
        && !trigger.is_empty()
        && msg.text().to_lowercase().contains(&trigger)
        && !msg.is_from_bot()
        && !env.config.is_bot(&msg.user_id)
}

pub async fn dispatch(env: &Env, msg: &InboundMessage) -> Dispatch {
    match env.store.record_message(msg) {
        Ok(true) => debug!("Stored message {}", msg.id),
        Ok(false) => debug!("Message {} already stored", msg.id),
        Err(e) => error!("Failed to store message {}: {}", msg.id, e),
    }

    if let Some(args) = parse_command(msg.text()) {
        let name = args[0].clone();
        return match env.registry.get(&name) {
            Some(command) => {
                info!("Running /{} for {}", name, msg.name);
                (command.handler)(env, &args, msg).await;
                Dispatch::Command(name)
            }
            None => {
                info!("Unknown command /{} from {}", name, msg.name);
                env.say(&msg.group_id, UNKNOWN_COMMAND).await;
                Dispatch::UnknownCommand(name)
            }
        };
    }

    if mentions_bot(env, msg) {
        chat::respond_with_ai(env, msg).await;
        return Dispatch::Ai;
    }

    Dispatch::Ignored
}
