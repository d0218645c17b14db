//! Paginated history sync
//!
//! Walks a group's history backwards one page at a time, persisting every
//! message. The admin `/sync` command is bounded per invocation; when the
//! bound is hit it posts a `/sync <group> <cursor> <total>` continuation that
//! resumes where it left off when re-issued.

use crate::channel::HistorySource;
use crate::env::Env;
use crate::error::Result;
use crate::groupme::InboundMessage;
use crate::store::Store;
use chrono::{DateTime, Utc};
use tracing::{error, info};

/// Where a sync starts (or resumes) from
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub group_id: String,
    /// Fetch messages older than this id; `None` starts at the newest
    pub cursor: Option<String>,
    /// Messages already synced by earlier invocations
    pub total: u64,
}

impl SyncRequest {
    /// `args` is `["sync", group?, cursor?, total?]`; the group defaults to
    /// the one the command was sent in
    pub fn from_args(args: &[String], trigger: &InboundMessage) -> Self {
        let group_id = args
            .get(1)
            .cloned()
            .unwrap_or_else(|| trigger.group_id.clone());
        let cursor = args
            .get(2)
            .filter(|c| !c.is_empty() && c.as_str() != "null")
            .cloned();
        let total = args.get(3).and_then(|t| t.parse().ok()).unwrap_or(0);
        Self {
            group_id,
            cursor,
            total,
        }
    }

    /// Command text that resumes this request
    pub fn continuation(&self) -> String {
        format!(
            "/sync {} {} {}",
            self.group_id,
            self.cursor.as_deref().unwrap_or("null"),
            self.total
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Reached the start of history
    Complete { total: u64 },
    /// Hit the page bound; resume with `request`
    Suspended { request: SyncRequest },
    /// A fetch or write failed after `total` messages
    Failed { total: u64, error: String },
}

/// Fetch and persist up to `max_pages` non-empty pages, starting at `request`
pub async fn run_sync(
    store: &Store,
    history: &dyn HistorySource,
    mut request: SyncRequest,
    max_pages: u32,
) -> SyncOutcome {
    let mut pages = 0;

    loop {
        if pages >= max_pages {
            return SyncOutcome::Suspended { request };
        }

        let page = match history
            .fetch_page(&request.group_id, request.cursor.as_deref())
            .await
        {
            Ok(page) => page,
            Err(e) => {
                error!("Exception raised while syncing: {}", e);
                return SyncOutcome::Failed {
                    total: request.total,
                    error: e.to_string(),
                };
            }
        };
        if page.is_empty() {
            return SyncOutcome::Complete {
                total: request.total,
            };
        }
        pages += 1;

        for message in &page {
            if let Err(e) = store.record_message(message) {
                error!("Failed to store message {}: {}", message.id, e);
                return SyncOutcome::Failed {
                    total: request.total,
                    error: e.to_string(),
                };
            }
            request.cursor = Some(message.id.clone());
            request.total += 1;
        }
        info!(
            "Wrote {} messages (total: {})",
            page.len(),
            request.total
        );
    }
}

/// Text posted back to the group for a finished invocation
pub fn outcome_text(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Complete { total } => format!("Success - Synced {} messages", total),
        SyncOutcome::Suspended { request } => request.continuation(),
        SyncOutcome::Failed { total, .. } => {
            format!("Something went wrong after {} messages :(", total)
        }
    }
}

pub async fn sync_command(env: &Env, args: &[String], trigger: &InboundMessage) {
    if !env.config.is_admin(&trigger.user_id) {
        env.say(&trigger.group_id, "no").await;
        return;
    }
    // continuations come back through the bot, which shouldn't announce each leg
    if !env.config.is_bot(&trigger.user_id) {
        env.say(&trigger.group_id, "Syncing messages...").await;
    }

    let request = SyncRequest::from_args(args, trigger);
    let outcome = run_sync(
        &env.store,
        env.history.as_ref(),
        request,
        env.config.sync_max_attempts,
    )
    .await;
    env.say(&trigger.group_id, outcome_text(&outcome)).await;
}

/// Persist a group's recent history, walking back until messages are older
/// than `since`. Returns the number of messages seen.
pub async fn backfill_recent(
    store: &Store,
    history: &dyn HistorySource,
    group_id: &str,
    since: DateTime<Utc>,
    max_pages: u32,
) -> Result<u64> {
    let mut cursor: Option<String> = None;
    let mut seen = 0;

    for _ in 0..max_pages {
        let page = history.fetch_page(group_id, cursor.as_deref()).await?;
        if page.is_empty() {
            break;
        }

        let mut reached_window_start = false;
        for message in &page {
            if message.timestamp() < since {
                reached_window_start = true;
                break;
            }
            store.record_message(message)?;
            cursor = Some(message.id.clone());
            seen += 1;
        }
        if reached_window_start {
            break;
        }
    }

    Ok(seen)
}
