//! Reminders: `/remindme`, `/reminders` and delivery of due rows
//!
//! A reminder is created `PENDING` and flipped to sent exactly once, after
//! its notification has gone out. Delivery runs from the periodic reminder
//! job and handles each due row on its own, so one failed send never blocks
//! the rest of the batch.

use crate::channel::{Mention, Outbound};
use crate::datetime::format_display;
use crate::env::Env;
use crate::groupme::{first_name, InboundMessage};
use crate::store::NewReminder;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const DEFAULT_MESSAGE: &str = "Here's your reminder!";

/// Separates the time expression from the custom message
const MESSAGE_SEPARATOR: &str = " - ";

/// Why a reminder wasn't created; the message is what gets posted
#[derive(Error, Debug)]
pub enum RemindError {
    #[error("You need to tell me when to remind you")]
    MissingTime,

    #[error("I can't figure out when that is... try something simpler")]
    Unparseable,

    #[error("I can't remind you in the past")]
    InPast,

    #[error("Something went wrong setting your reminder :(")]
    Store(#[from] crate::error::Error),
}

/// Counts from one delivery pass
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

/// Split `remindme` arguments into `(time expression, message)`
pub fn split_request(args: &[String]) -> Option<(String, String)> {
    let text = args.get(1..)?.join(" ");
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    match text.split_once(MESSAGE_SEPARATOR) {
        Some((when, message)) => {
            let message = message.trim();
            let message = if message.is_empty() {
                DEFAULT_MESSAGE
            } else {
                message
            };
            Some((when.trim().to_string(), message.to_string()))
        }
        None => Some((text.to_string(), DEFAULT_MESSAGE.to_string())),
    }
}

/// Parse and store a reminder requested by `trigger`
pub async fn create_reminder(
    env: &Env,
    args: &[String],
    trigger: &InboundMessage,
    now: DateTime<Utc>,
) -> Result<NewReminder, RemindError> {
    let (when, message) = split_request(args).ok_or(RemindError::MissingTime)?;
    let eta = env
        .dates
        .parse(&when, now)
        .await
        .ok_or(RemindError::Unparseable)?;

    if eta <= now {
        info!("Rejected reminder in the past: now={} eta={}", now, eta);
        return Err(RemindError::InPast);
    }

    let reminder = NewReminder {
        id: Uuid::new_v4().to_string(),
        created: now,
        eta,
        group_id: trigger.group_id.clone(),
        user_id: trigger.user_id.clone(),
        message,
        command_message_id: Some(trigger.id.clone()),
    };
    env.store.insert_reminder(&reminder)?;
    Ok(reminder)
}

pub async fn remind_me(env: &Env, args: &[String], trigger: &InboundMessage) {
    let reply = match create_reminder(env, args, trigger, Utc::now()).await {
        Ok(reminder) => format!(
            "OK {}, I'll remind you on {}",
            trigger.first_name(),
            format_display(&reminder.eta, env.config.display_tz)
        ),
        Err(e) => {
            if let RemindError::Store(inner) = &e {
                error!("Error creating reminder: {}", inner);
            }
            e.to_string()
        }
    };
    env.say(&trigger.group_id, reply).await;
}

pub async fn list_reminders(env: &Env, _args: &[String], trigger: &InboundMessage) {
    let reply = match env.store.list_pending_reminders() {
        Ok(pending) if pending.is_empty() => "No reminders scheduled.".to_string(),
        Ok(pending) => {
            let mut lines = vec!["📋 Upcoming Reminders:\n".to_string()];
            for reminder in &pending {
                lines.push(format!(
                    "{}: \"{}\" - {}",
                    reminder.user_name,
                    reminder.message,
                    format_display(&reminder.eta, env.config.display_tz)
                ));
            }
            lines.join("\n")
        }
        Err(e) => {
            error!("Error listing reminders: {}", e);
            "Error retrieving reminders :(".to_string()
        }
    };
    env.say(&trigger.group_id, reply).await;
}

/// Send every reminder due by `now` (up to the configured batch) and mark
/// each one sent after its own notification succeeds
pub async fn deliver_due(env: &Env, now: DateTime<Utc>) -> DeliveryReport {
    let mut report = DeliveryReport::default();

    let due = match env
        .store
        .query_pending_reminders_due_by(now, env.config.reminder_batch_size)
    {
        Ok(due) => due,
        Err(e) => {
            error!("Error checking reminders: {}", e);
            return report;
        }
    };
    if !due.is_empty() {
        info!("Found {} reminders to send", due.len());
    }

    for reminder in due {
        let name = first_name(&reminder.user_name);
        let prefix = "🔔 Reminder for ";
        let message = Outbound {
            text: format!("{}{}: {}", prefix, name, reminder.message),
            mentions: vec![Mention::after(prefix, name, &reminder.user_id)],
            reply_to: reminder.command_message_id.clone(),
        };

        if !env.post(&reminder.group_id, message).await {
            warn!("Reminder {} left pending after failed send", reminder.id);
            report.failed += 1;
            continue;
        }

        match env.store.mark_reminder_sent(&reminder.id) {
            Ok(_) => {
                info!("Sent reminder {} to {}", reminder.id, reminder.user_name);
                report.sent += 1;
            }
            Err(e) => {
                error!("Failed to mark reminder {} sent: {}", reminder.id, e);
                report.failed += 1;
            }
        }
    }

    report
}
