//! hookbot - GroupMe webhook bot
//!
//! Receives group chat messages over HTTP, stores them in SQLite, runs slash
//! commands, answers mentions with a language model and delivers scheduled
//! reminders.

pub mod channel;
pub mod chat;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod groupme;
pub mod jobs;
pub mod llm;
pub mod registry;
pub mod reminder;
pub mod server;
pub mod store;
pub mod sync;

pub use env::Env;
pub use error::{Error, Result};
