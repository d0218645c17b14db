//! Periodic jobs keyed by cron expression
//!
//! `run_scheduled` is the single entry point for a trigger: it maps the cron
//! string to a job and runs it. `run_scheduler` is the in-process clock that
//! fires those triggers while the server is up.

use crate::config::Config;
use crate::env::Env;
use crate::error::{Error, Result};
use crate::reminder;
use crate::sync;
use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

/// Pages walked per group by the periodic backfill
const BACKFILL_MAX_PAGES: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    ReminderCheck,
    MessageSync,
}

impl Job {
    /// The job configured for `cron`, if any
    pub fn for_schedule(config: &Config, cron: &str) -> Option<Job> {
        let cron = cron.trim();
        if cron == config.reminder_schedule {
            Some(Job::ReminderCheck)
        } else if cron == config.message_sync_schedule {
            Some(Job::MessageSync)
        } else {
            None
        }
    }
}

/// Cron crate needs 6 fields (sec min hour dom month dow); a 5-field
/// expression gets "0" prepended for seconds
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    let expr = expr.trim();
    let full = if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    };
    Schedule::from_str(&full)
        .map_err(|e| Error::Config(format!("Invalid cron expression '{}': {}", expr, e)))
}

/// Every configured job with its parsed schedule
pub fn schedules(config: &Config) -> Result<Vec<(String, Schedule)>> {
    [&config.reminder_schedule, &config.message_sync_schedule]
        .into_iter()
        .map(|expr| Ok((expr.clone(), parse_schedule(expr)?)))
        .collect()
}

/// Run the job for `cron`. Returns which job ran, or `None` for an unknown
/// schedule.
pub async fn run_scheduled(env: &Env, cron: &str, now: DateTime<Utc>) -> Option<Job> {
    let Some(job) = Job::for_schedule(&env.config, cron) else {
        warn!("No job configured for schedule '{}'", cron);
        return None;
    };
    run_job(env, job, now).await;
    Some(job)
}

pub async fn run_job(env: &Env, job: Job, now: DateTime<Utc>) {
    match job {
        Job::ReminderCheck => {
            let report = reminder::deliver_due(env, now).await;
            if report.sent + report.failed > 0 {
                info!(
                    "Reminder check: {} sent, {} failed",
                    report.sent, report.failed
                );
            }
        }
        Job::MessageSync => sync_recent_messages(env, now).await,
    }
}

async fn sync_recent_messages(env: &Env, now: DateTime<Utc>) {
    let groups = match env.store.groups() {
        Ok(groups) => groups,
        Err(e) => {
            error!("Failed to list groups for message sync: {}", e);
            return;
        }
    };

    let since = now - Duration::hours(env.config.message_sync_window_hours);
    for group in groups {
        match sync::backfill_recent(
            &env.store,
            env.history.as_ref(),
            &group,
            since,
            BACKFILL_MAX_PAGES,
        )
        .await
        {
            Ok(seen) => info!("Synced {} recent messages for group {}", seen, group),
            Err(e) => error!("Message sync failed for group {}: {}", group, e),
        }
    }
}

/// The first fire time strictly after `last`, with every schedule due then
pub fn next_fire<'a>(
    schedules: &'a [(String, Schedule)],
    last: DateTime<Utc>,
) -> Option<(DateTime<Utc>, Vec<&'a str>)> {
    let upcoming: Vec<(&str, DateTime<Utc>)> = schedules
        .iter()
        .filter_map(|(expr, schedule)| Some((expr.as_str(), schedule.after(&last).next()?)))
        .collect();
    let next = upcoming.iter().map(|(_, t)| *t).min()?;
    let due = upcoming
        .into_iter()
        .filter(|(_, t)| *t == next)
        .map(|(expr, _)| expr)
        .collect();
    Some((next, due))
}

/// Fire configured jobs on their schedules until the task is dropped.
///
/// Fire times advance from the previous fire time, not the wall clock, so
/// each one runs once even if the clock steps backwards.
pub async fn run_scheduler(env: Env) -> Result<()> {
    let schedules = schedules(&env.config)?;
    info!("Scheduler running {} jobs", schedules.len());

    let mut last = Utc::now();
    loop {
        let Some((next, due)) = next_fire(&schedules, last) else {
            warn!("No upcoming fire times; scheduler stopping");
            return Ok(());
        };

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        debug!("Next scheduled run at {}", next);
        tokio::time::sleep(wait).await;

        for expr in due {
            let env = env.clone();
            let expr = expr.to_string();
            tokio::spawn(async move {
                run_scheduled(&env, &expr, next).await;
            });
        }
        last = next;
    }
}
