//! Natural-language time parsing for reminders, plus display formatting
//!
//! Rule-based parsing covers the common phrasings ("in 20 minutes", "+2h",
//! "tomorrow at 3pm", "friday"). Anything else can fall through to the
//! language model when one is configured.

use crate::llm::LanguageModel;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hour used when only a day is given ("tomorrow", "next tuesday")
const DEFAULT_HOUR: u32 = 10;

#[async_trait]
pub trait DateParser: Send + Sync {
    /// Resolve `text` relative to `now`; `None` when it can't be understood
    async fn parse(&self, text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Render a timestamp for chat, e.g. `05/17/2025, 08:37 PM`
pub fn format_display(ts: &DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format("%m/%d/%Y, %I:%M %p").to_string()
}

static OFFSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:in\s+|\+)?(\d+|an?|one)\s*(m|mins?|minutes?|h|hrs?|hours?|d|days?|w|wks?|weeks?)$",
    )
    .expect("Invalid offset regex")
});

static ABSOLUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})(?:[ t](\d{1,2}:\d{2}))?$").expect("Invalid absolute regex")
});

static DAY_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?P<day>today|tonight|tomorrow|(?:next\s+)?(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday|mon|tue|tues|wed|thu|thur|thurs|fri|sat|sun))\s*)?(?P<at>at\s+)?(?P<time>noon|midnight|(?P<hour>\d{1,2})(?::(?P<minute>\d{2}))?\s*(?P<ampm>am|pm)?)?$",
    )
    .expect("Invalid day/time regex")
});

/// Deterministic parser for common phrasings, interpreted in `tz`
pub struct RuleParser {
    tz: Tz,
}

impl RuleParser {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn parse_at(&self, text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let normalized = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        if let Some(offset) = parse_offset(&normalized) {
            return Some(now + offset);
        }
        if let Some(absolute) = self.parse_absolute(&normalized) {
            return Some(absolute);
        }
        self.parse_day_time(&normalized, now)
    }

    fn parse_absolute(&self, text: &str) -> Option<DateTime<Utc>> {
        let caps = ABSOLUTE.captures(text)?;
        let date = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
        let time = match caps.get(2) {
            Some(t) => NaiveTime::parse_from_str(t.as_str(), "%H:%M").ok()?,
            None => NaiveTime::from_hms_opt(DEFAULT_HOUR, 0, 0)?,
        };
        self.to_utc(date.and_time(time))
    }

    fn parse_day_time(&self, text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let caps = DAY_TIME.captures(text)?;
        let day = caps.name("day").map(|m| m.as_str());
        let time = caps.name("time").map(|m| m.as_str());

        let explicit_time = caps.name("at").is_some()
            || caps.name("minute").is_some()
            || caps.name("ampm").is_some()
            || matches!(time, Some("noon") | Some("midnight"));
        match (day, time) {
            (None, None) => return None,
            // a bare number on its own is too ambiguous
            (None, Some(_)) if !explicit_time => return None,
            _ => {}
        }

        let today = now.with_timezone(&self.tz).date_naive();
        let date = match day {
            None | Some("today") | Some("tonight") => today,
            Some("tomorrow") => today.succ_opt()?,
            Some(name) => {
                let weekday = parse_weekday(name.trim_start_matches("next").trim())?;
                let ahead = (7 + weekday.num_days_from_monday() as i64
                    - today.weekday().num_days_from_monday() as i64)
                    % 7;
                today + Duration::days(if ahead == 0 { 7 } else { ahead })
            }
        };

        let clock = match time {
            Some("noon") => NaiveTime::from_hms_opt(12, 0, 0)?,
            Some("midnight") => NaiveTime::from_hms_opt(0, 0, 0)?,
            Some(_) => {
                let hour: u32 = caps.name("hour")?.as_str().parse().ok()?;
                let minute: u32 = match caps.name("minute") {
                    Some(m) => m.as_str().parse().ok()?,
                    None => 0,
                };
                let hour = match caps.name("ampm").map(|m| m.as_str()) {
                    Some(_) if hour == 0 || hour > 12 => return None,
                    Some("am") => hour % 12,
                    Some(_) => hour % 12 + 12,
                    // "tonight at 9" is evening
                    None if day == Some("tonight") && (1..12).contains(&hour) => hour + 12,
                    None => hour,
                };
                NaiveTime::from_hms_opt(hour, minute, 0)?
            }
            None if day == Some("tonight") => NaiveTime::from_hms_opt(20, 0, 0)?,
            None => NaiveTime::from_hms_opt(DEFAULT_HOUR, 0, 0)?,
        };

        self.to_utc(date.and_time(clock))
    }

    fn to_utc(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[async_trait]
impl DateParser for RuleParser {
    async fn parse(&self, text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.parse_at(text, now)
    }
}

fn parse_offset(text: &str) -> Option<Duration> {
    let caps = OFFSET.captures(text)?;
    let amount: i64 = match &caps[1] {
        "a" | "an" | "one" => 1,
        n => n.parse().ok()?,
    };
    let unit = &caps[2];
    let duration = match unit.chars().next()? {
        'm' => Duration::try_minutes(amount)?,
        'h' => Duration::try_hours(amount)?,
        'd' => Duration::try_days(amount)?,
        'w' => Duration::try_weeks(amount)?,
        _ => return None,
    };
    Some(duration)
}

fn parse_weekday(name: &str) -> Option<Weekday> {
    let weekday = match &name[..name.len().min(3)] {
        "mon" => Weekday::Mon,
        "tue" => Weekday::Tue,
        "wed" => Weekday::Wed,
        "thu" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" => Weekday::Sat,
        "sun" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

/// Asks the language model for an ISO-8601 timestamp
pub struct LlmDateParser {
    model: Arc<dyn LanguageModel>,
    tz: Tz,
}

impl LlmDateParser {
    pub fn new(model: Arc<dyn LanguageModel>, tz: Tz) -> Self {
        Self { model, tz }
    }

    fn prompt(&self, text: &str, now: DateTime<Utc>) -> String {
        format!(
            "Convert a natural language time description into a single ISO 8601 timestamp.\n\n\
             Current date and time: {now}\n\
             Time zone: {tz}\n\
             Description: \"{text}\"\n\n\
             Rules:\n\
             - Use the current date and time given above, not your own.\n\
             - Interpret the description in the {tz} time zone.\n\
             - If only a day is given, use {hour}:00.\n\
             - Reply with ONLY the timestamp including its UTC offset, e.g. 2025-05-17T20:37:00-04:00\n\
             - If no specific time can be determined, reply with 0",
            now = now.with_timezone(&self.tz).to_rfc3339(),
            tz = self.tz.name(),
            text = text,
            hour = DEFAULT_HOUR,
        )
    }
}

#[async_trait]
impl DateParser for LlmDateParser {
    async fn parse(&self, text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let reply = match self.model.complete(None, &self.prompt(text, now)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Time parse via language model failed: {}", e);
                return None;
            }
        };
        debug!("Language model resolved '{}' to '{}'", text, reply);

        let reply = reply.trim().trim_matches('`').trim();
        if reply == "0" {
            return None;
        }
        DateTime::parse_from_rfc3339(reply)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Tries each parser in order and returns the first answer
pub struct ChainParser {
    parsers: Vec<Box<dyn DateParser>>,
}

impl ChainParser {
    pub fn new(parsers: Vec<Box<dyn DateParser>>) -> Self {
        Self { parsers }
    }
}

#[async_trait]
impl DateParser for ChainParser {
    async fn parse(&self, text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        for parser in &self.parsers {
            if let Some(ts) = parser.parse(text, now).await {
                return Some(ts);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use chrono::Timelike;

    fn ny() -> Tz {
        chrono_tz::America::New_York
    }

    // Saturday 2025-05-17 16:00 UTC = 12:00 EDT
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 17, 16, 0, 0).unwrap()
    }

    fn parse(text: &str) -> Option<DateTime<Utc>> {
        RuleParser::new(ny()).parse_at(text, now())
    }

    fn local(ts: DateTime<Utc>) -> String {
        ts.with_timezone(&ny()).format("%Y-%m-%d %H:%M").to_string()
    }

    #[test]
    fn test_relative_offsets() {
        assert_eq!(parse("in 30 minutes"), Some(now() + Duration::minutes(30)));
        assert_eq!(parse("+2h"), Some(now() + Duration::hours(2)));
        assert_eq!(parse("in an hour"), Some(now() + Duration::hours(1)));
        assert_eq!(parse("3 days"), Some(now() + Duration::days(3)));
        assert_eq!(parse("In  1   Week"), Some(now() + Duration::weeks(1)));
    }

    #[test]
    fn test_tomorrow_defaults_to_ten() {
        assert_eq!(local(parse("tomorrow").unwrap()), "2025-05-18 10:00");
        assert_eq!(local(parse("tomorrow at 3pm").unwrap()), "2025-05-18 15:00");
        assert_eq!(local(parse("tomorrow 7:45 am").unwrap()), "2025-05-18 07:45");
    }

    #[test]
    fn test_today_times() {
        assert_eq!(local(parse("at 5pm").unwrap()), "2025-05-17 17:00");
        assert_eq!(local(parse("noon").unwrap()), "2025-05-17 12:00");
        assert_eq!(local(parse("tonight").unwrap()), "2025-05-17 20:00");
        assert_eq!(local(parse("tonight at 9").unwrap()), "2025-05-17 21:00");
        assert_eq!(local(parse("tonight 10:30").unwrap()), "2025-05-17 22:30");
        assert_eq!(local(parse("tonight at 21:15").unwrap()), "2025-05-17 21:15");
        assert_eq!(local(parse("tonight at 9am").unwrap()), "2025-05-17 09:00");
        assert_eq!(local(parse("at 18:30").unwrap()), "2025-05-17 18:30");
        // already passed today, still resolved; the caller rejects past times
        assert!(parse("at 9am").unwrap() < now());
    }

    #[test]
    fn test_weekdays_roll_forward() {
        assert_eq!(local(parse("monday").unwrap()), "2025-05-19 10:00");
        assert_eq!(local(parse("next friday at noon").unwrap()), "2025-05-23 12:00");
        // today is saturday, so "saturday" means a week out
        assert_eq!(local(parse("sat").unwrap()), "2025-05-24 10:00");
    }

    #[test]
    fn test_absolute_dates() {
        assert_eq!(local(parse("2025-06-01 14:30").unwrap()), "2025-06-01 14:30");
        assert_eq!(local(parse("2025-06-01").unwrap()), "2025-06-01 10:00");
    }

    #[test]
    fn test_unparseable() {
        assert!(parse("").is_none());
        assert!(parse("whenever").is_none());
        assert!(parse("5").is_none());
        assert!(parse("at 13pm").is_none());
        assert!(parse("2025-13-40").is_none());
    }

    #[test]
    fn test_format_display() {
        let ts = Utc.with_ymd_and_hms(2025, 5, 18, 0, 37, 0).unwrap();
        assert_eq!(format_display(&ts, ny()), "05/17/2025, 08:37 PM");
    }

    struct Canned(&'static str);

    #[async_trait]
    impl LanguageModel for Canned {
        async fn complete(&self, _system: Option<&str>, _prompt: &str) -> Result<String> {
            if self.0.is_empty() {
                return Err(Error::Llm("down".to_string()));
            }
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_llm_parser_reads_iso() {
        let parser = LlmDateParser::new(Arc::new(Canned("2025-05-17T20:37:00-04:00")), ny());
        let ts = parser.parse("after dinner", now()).await.unwrap();
        assert_eq!(ts.hour(), 0);
        assert_eq!(ts.minute(), 37);
    }

    #[tokio::test]
    async fn test_llm_parser_zero_and_errors() {
        let zero = LlmDateParser::new(Arc::new(Canned("0")), ny());
        assert!(zero.parse("someday", now()).await.is_none());

        let garbage = LlmDateParser::new(Arc::new(Canned("sometime soon")), ny());
        assert!(garbage.parse("someday", now()).await.is_none());

        let down = LlmDateParser::new(Arc::new(Canned("")), ny());
        assert!(down.parse("someday", now()).await.is_none());
    }

    #[tokio::test]
    async fn test_chain_falls_through() {
        let chain = ChainParser::new(vec![
            Box::new(RuleParser::new(ny())),
            Box::new(LlmDateParser::new(Arc::new(Canned("2030-01-01T00:00:00Z")), ny())),
        ]);
        assert_eq!(
            chain.parse("in 5 minutes", now()).await,
            Some(now() + Duration::minutes(5))
        );
        assert_eq!(
            chain.parse("after the game", now()).await,
            Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap())
        );
    }
}
