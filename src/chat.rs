//! Conversational replies to messages that mention the bot

use crate::datetime::format_display;
use crate::env::Env;
use crate::groupme::InboundMessage;
use crate::store::{HistoryFilter, HistoryRow};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::{error, warn};

pub const FALLBACK_REPLY: &str = "Received an invalid response from the robot overlords :(";

/// Most history lines put in front of the model
const HISTORY_LIMIT: usize = 500;

/// Prompt body: the question, then recent group history for context
pub fn build_prompt(
    trigger: &InboundMessage,
    history: &[HistoryRow],
    window_hours: i64,
    now: DateTime<Utc>,
    tz: Tz,
) -> String {
    let lines = history
        .iter()
        .map(|row| {
            format!(
                "[{}] {}: {}",
                format_display(&row.timestamp, tz),
                row.name,
                row.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{}: {}\n\n----------\n\
         The following is group chat message history over the last {} hours, included for context.\n\
         The timestamp of the message to which you're responding is {}.\n\n{}",
        trigger.first_name(),
        trigger.text(),
        window_hours,
        format_display(&now, tz),
        lines
    )
}

pub async fn respond_with_ai(env: &Env, trigger: &InboundMessage) {
    let now = Utc::now();
    let window = env.config.history_window_hours;
    let filter = HistoryFilter {
        group_id: trigger.group_id.clone(),
        after: Some(now - Duration::hours(window)),
        limit: Some(HISTORY_LIMIT),
    };

    let history = match env.store.query_messages_by_group(&filter) {
        Ok(rows) => rows,
        Err(e) => {
            warn!("Could not load history for group {}: {}", trigger.group_id, e);
            Vec::new()
        }
    };

    let prompt = build_prompt(trigger, &history, window, now, env.config.display_tz);
    let reply = match env
        .llm
        .complete(Some(&env.config.ai_system_context), &prompt)
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            error!("Language model reply failed: {}", e);
            FALLBACK_REPLY.to_string()
        }
    };

    env.say(&trigger.group_id, reply).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_includes_question_and_history() {
        let trigger = InboundMessage {
            id: "m9".to_string(),
            created_at: 1_747_500_000,
            sender_type: "user".to_string(),
            text: Some("hookbot what's for dinner?".to_string()),
            user_id: "u1".to_string(),
            name: "Grace Hopper".to_string(),
            group_id: "g1".to_string(),
            avatar_url: None,
            attachments: Vec::new(),
        };
        let history = vec![HistoryRow {
            timestamp: DateTime::from_timestamp(1_747_497_600, 0).unwrap(),
            name: "Alan".to_string(),
            text: "tacos tonight".to_string(),
        }];
        let now = DateTime::from_timestamp(1_747_500_000, 0).unwrap();

        let prompt = build_prompt(&trigger, &history, 48, now, chrono_tz::America::New_York);
        assert!(prompt.starts_with("Grace: hookbot what's for dinner?"));
        assert!(prompt.contains("last 48 hours"));
        // 2025-05-17 16:00 UTC is 12:00 PM in New York
        assert!(prompt.contains("[05/17/2025, 12:00 PM] Alan: tacos tonight"));
    }
}
