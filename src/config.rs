//! Configuration loaded from the environment

use crate::error::{Error, Result};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};

/// Default cron identifier for the reminder check
pub const REMINDER_SCHEDULE: &str = "* * * * *";

/// Default cron identifier for the nightly history sync
pub const MESSAGE_SYNC_SCHEDULE: &str = "0 4 * * *";

/// Upstream history API page size
pub const SYNC_PAGE_SIZE: u32 = 25;

/// Page fetches allowed per `/sync` invocation before handing back a continuation
pub const SYNC_MAX_ATTEMPTS: u32 = 4;

/// Due reminders delivered per tick
pub const REMINDER_BATCH_SIZE: usize = 10;

/// All runtime settings, threaded through every call via `Env`
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub bind_addr: String,
    pub webhook_path: String,
    pub groupme_api_url: String,
    pub groupme_token: String,
    pub anthropic_api_url: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub ai_system_context: String,
    pub mention_trigger: String,
    pub admin_user_ids: Vec<String>,
    pub bot_user_ids: Vec<String>,
    pub display_tz: Tz,
    pub reminder_schedule: String,
    pub message_sync_schedule: String,
    pub reminder_batch_size: usize,
    pub sync_page_size: u32,
    pub sync_max_attempts: u32,
    pub message_sync_window_hours: i64,
    pub history_window_hours: i64,
}

impl Default for Config {
    fn default() -> Self {
        let db_path = dirs::data_dir()
            .map(|d| d.join("hookbot/hookbot.db"))
            .unwrap_or_else(|| PathBuf::from("hookbot.db"));

        Self {
            db_path,
            bind_addr: "0.0.0.0:8787".to_string(),
            webhook_path: "/groupme-webhook".to_string(),
            groupme_api_url: "https://api.groupme.com/v3".to_string(),
            groupme_token: String::new(),
            anthropic_api_url: "https://api.anthropic.com".to_string(),
            anthropic_api_key: None,
            anthropic_model: "claude-sonnet-4-20250514".to_string(),
            ai_system_context: "You are a friendly, concise member of a group chat.".to_string(),
            mention_trigger: "hookbot".to_string(),
            admin_user_ids: Vec::new(),
            bot_user_ids: Vec::new(),
            display_tz: chrono_tz::America::New_York,
            reminder_schedule: REMINDER_SCHEDULE.to_string(),
            message_sync_schedule: MESSAGE_SYNC_SCHEDULE.to_string(),
            reminder_batch_size: REMINDER_BATCH_SIZE,
            sync_page_size: SYNC_PAGE_SIZE,
            sync_max_attempts: SYNC_MAX_ATTEMPTS,
            message_sync_window_hours: 48,
            history_window_hours: 48,
        }
    }
}

impl Config {
    /// Build config from `HOOKBOT_*` environment variables (after loading `.env`)
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let display_tz = match std::env::var("HOOKBOT_TIMEZONE") {
            Ok(name) => name
                .parse::<Tz>()
                .map_err(|e| Error::Config(format!("HOOKBOT_TIMEZONE: {}", e)))?,
            Err(_) => defaults.display_tz,
        };

        Ok(Self {
            db_path: env_var("HOOKBOT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            bind_addr: env_var("HOOKBOT_BIND").unwrap_or(defaults.bind_addr),
            webhook_path: normalize_path(
                &env_var("HOOKBOT_WEBHOOK_PATH").unwrap_or(defaults.webhook_path),
            ),
            groupme_api_url: env_var("HOOKBOT_GROUPME_API_URL").unwrap_or(defaults.groupme_api_url),
            groupme_token: env_var("HOOKBOT_GROUPME_TOKEN").unwrap_or_default(),
            anthropic_api_url: env_var("HOOKBOT_ANTHROPIC_API_URL")
                .unwrap_or(defaults.anthropic_api_url),
            anthropic_api_key: env_var("HOOKBOT_ANTHROPIC_API_KEY"),
            anthropic_model: env_var("HOOKBOT_ANTHROPIC_MODEL").unwrap_or(defaults.anthropic_model),
            ai_system_context: env_var("HOOKBOT_AI_CONTEXT").unwrap_or(defaults.ai_system_context),
            mention_trigger: env_var("HOOKBOT_MENTION")
                .map(|m| m.to_lowercase())
                .unwrap_or(defaults.mention_trigger),
            admin_user_ids: env_var("HOOKBOT_ADMIN_IDS")
                .map(|s| split_list(&s))
                .unwrap_or_default(),
            bot_user_ids: env_var("HOOKBOT_BOT_IDS")
                .map(|s| split_list(&s))
                .unwrap_or_default(),
            display_tz,
            reminder_schedule: env_var("HOOKBOT_REMINDER_CRON").unwrap_or(defaults.reminder_schedule),
            message_sync_schedule: env_var("HOOKBOT_SYNC_CRON")
                .unwrap_or(defaults.message_sync_schedule),
            reminder_batch_size: env_parse("HOOKBOT_REMINDER_BATCH", defaults.reminder_batch_size)?,
            sync_page_size: defaults.sync_page_size,
            sync_max_attempts: env_parse("HOOKBOT_SYNC_MAX_ATTEMPTS", defaults.sync_max_attempts)?,
            message_sync_window_hours: env_parse(
                "HOOKBOT_SYNC_WINDOW_HOURS",
                defaults.message_sync_window_hours,
            )?,
            history_window_hours: defaults.history_window_hours,
        })
    }

    /// Create config for testing with a database inside `temp_dir`
    pub fn for_test(temp_dir: &Path) -> Self {
        Self {
            db_path: temp_dir.join("hookbot.db"),
            groupme_api_url: "http://127.0.0.1:9".to_string(),
            groupme_token: "test-token".to_string(),
            anthropic_api_url: "http://127.0.0.1:9".to_string(),
            admin_user_ids: vec!["admin-1".to_string()],
            bot_user_ids: vec!["bot-1".to_string()],
            ..Self::default()
        }
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_user_ids.iter().any(|id| id == user_id) || self.is_bot(user_id)
    }

    pub fn is_bot(&self, user_id: &str) -> bool {
        self.bot_user_ids.iter().any(|id| id == user_id)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{}: {}", key, e))),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.db_path.to_string_lossy().contains("hookbot.db"));
        assert_eq!(config.webhook_path, "/groupme-webhook");
        assert_eq!(config.reminder_batch_size, 10);
        assert_eq!(config.sync_max_attempts, 4);
    }

    #[test]
    fn test_test_config() {
        let temp = std::env::temp_dir();
        let config = Config::for_test(&temp);
        assert_eq!(config.db_path, temp.join("hookbot.db"));
        assert!(config.is_admin("admin-1"));
    }

    #[test]
    fn test_bots_count_as_admins() {
        let config = Config::for_test(&std::env::temp_dir());
        assert!(config.is_bot("bot-1"));
        assert!(config.is_admin("bot-1"));
        assert!(!config.is_admin("someone"));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" a, b,,c "), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("hook"), "/hook");
        assert_eq!(normalize_path("/hook"), "/hook");
    }
}
