//! Command registry - static table from command name to handler
//!
//! Built once at startup and never mutated. Handlers share one signature,
//! `(env, args, trigger)`, where `args[0]` is the command name itself.

use crate::commands;
use crate::env::Env;
use crate::groupme::InboundMessage;
use crate::reminder;
use crate::sync;
use futures_util::future::BoxFuture;
use std::collections::HashMap;

/// Handler capability stored in the registry
pub type Handler =
    for<'a> fn(&'a Env, &'a [String], &'a InboundMessage) -> BoxFuture<'a, ()>;

/// Adapts an `async fn(&Env, &[String], &InboundMessage)` into a `Handler`
macro_rules! handler {
    ($name:ident => $target:path) => {
        fn $name<'a>(
            env: &'a Env,
            args: &'a [String],
            trigger: &'a InboundMessage,
        ) -> BoxFuture<'a, ()> {
            Box::pin($target(env, args, trigger))
        }
    };
}

handler!(ping => commands::ping);
handler!(help => commands::help);
handler!(roll => commands::roll);
handler!(scoreboard => commands::scoreboard);
handler!(remindme => reminder::remind_me);
handler!(reminders => reminder::list_reminders);
handler!(sync_messages => sync::sync_command);

/// One registry entry
#[derive(Clone)]
pub struct Command {
    pub name: &'static str,
    /// Shown by `/help`; hidden when empty
    pub usage: &'static str,
    pub handler: Handler,
}

pub struct Registry {
    commands: Vec<Command>,
    index: HashMap<&'static str, usize>,
}

impl Registry {
    pub fn new(commands: Vec<Command>) -> Self {
        let index = commands
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name, i))
            .collect();
        Self { commands, index }
    }

    /// The bot's command set
    pub fn builtin() -> Self {
        Self::new(vec![
            Command {
                name: "help",
                usage: "Shows this message.",
                handler: help,
            },
            Command {
                name: "ping",
                usage: "",
                handler: ping,
            },
            Command {
                name: "roll",
                usage: "Rolls any number of any-sided dice (eg. 4d20 rolls four 20-sided dice).",
                handler: roll,
            },
            Command {
                name: "scoreboard",
                usage: "Message count leaderboard.",
                handler: scoreboard,
            },
            Command {
                name: "remindme",
                usage: "Sets a reminder. Add a custom message with a dash (eg. \"/remindme friday at noon - Remember the meeting\").",
                handler: remindme,
            },
            Command {
                name: "reminders",
                usage: "Shows upcoming reminders.",
                handler: reminders,
            },
            Command {
                name: "sync",
                usage: "",
                handler: sync_messages,
            },
        ])
    }

    /// Look up a command by name (case-insensitive, no leading slash)
    pub fn get(&self, name: &str) -> Option<&Command> {
        let name = name.to_lowercase();
        self.index.get(name.as_str()).map(|&i| &self.commands[i])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.commands.iter().map(|c| c.name).collect()
    }

    /// Text for `/help`, listing every command with a usage line
    pub fn help_text(&self) -> String {
        let mut lines = vec!["Command List:".to_string()];
        for command in self.commands.iter().filter(|c| !c.usage.is_empty()) {
            lines.push(String::new());
            lines.push(format!("/{}: {}", command.name, command.usage));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_commands() {
        let registry = Registry::builtin();
        for name in ["help", "ping", "roll", "scoreboard", "remindme", "reminders", "sync"] {
            assert!(registry.get(name).is_some(), "missing /{}", name);
        }
        assert!(registry.get("mlb").is_none());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = Registry::builtin();
        assert_eq!(registry.get("RemindMe").unwrap().name, "remindme");
        assert_eq!(registry.get("PING").unwrap().name, "ping");
    }

    #[test]
    fn test_help_hides_unlisted_commands() {
        let help = Registry::builtin().help_text();
        assert!(help.starts_with("Command List:"));
        assert!(help.contains("/roll: Rolls"));
        assert!(help.contains("/remindme:"));
        assert!(!help.contains("/sync"));
        assert!(!help.contains("/ping"));
    }

    #[test]
    fn test_custom_registry() {
        let registry = Registry::new(vec![Command {
            name: "only",
            usage: "the only one",
            handler: ping,
        }]);
        assert_eq!(registry.names(), vec!["only"]);
        assert!(registry.get("ping").is_none());
    }
}
