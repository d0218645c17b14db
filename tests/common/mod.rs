//! Shared fakes for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use hookbot::channel::{HistorySource, Notifier, Outbound};
use hookbot::config::Config;
use hookbot::datetime::RuleParser;
use hookbot::error::{Error, Result};
use hookbot::groupme::InboundMessage;
use hookbot::llm::LanguageModel;
use hookbot::registry::Registry;
use hookbot::store::Store;
use hookbot::Env;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records every outbound message; can be told to fail every send or only
/// chosen attempts (counted from 0)
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, Outbound)>>,
    pub fail: AtomicBool,
    pub fail_attempts: Mutex<Vec<usize>>,
    attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.text.clone())
            .collect()
    }

    pub fn messages(&self) -> Vec<(String, Outbound)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, group_id: &str, message: Outbound) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let chosen = self.fail_attempts.lock().unwrap().contains(&attempt);
        if chosen || self.fail.load(Ordering::SeqCst) {
            return Err(Error::Upstream {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((group_id.to_string(), message));
        Ok(())
    }
}

/// Serves queued pages, then either empty pages or an endless supply of
/// full ones
#[derive(Default)]
pub struct ScriptedHistory {
    pub pages: Mutex<VecDeque<Vec<InboundMessage>>>,
    pub endless: AtomicBool,
    pub calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl ScriptedHistory {
    pub fn with_page_sizes(sizes: &[usize]) -> Self {
        let history = Self::default();
        for &size in sizes {
            let page = history.generate(size);
            history.pages.lock().unwrap().push_back(page);
        }
        history
    }

    pub fn endless() -> Self {
        let history = Self::default();
        history.endless.store(true, Ordering::SeqCst);
        history
    }

    fn generate(&self, size: usize) -> Vec<InboundMessage> {
        (0..size)
            .map(|_| {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                let mut msg = message(&format!("h{}", n), "u2", "Hal History", "old news");
                msg.created_at = Utc::now().timestamp() - 3600;
                msg
            })
            .collect()
    }
}

#[async_trait]
impl HistorySource for ScriptedHistory {
    async fn fetch_page(
        &self,
        _group_id: &str,
        _before_id: Option<&str>,
    ) -> Result<Vec<InboundMessage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(page) = self.pages.lock().unwrap().pop_front() {
            return Ok(page);
        }
        if self.endless.load(Ordering::SeqCst) {
            return Ok(self.generate(25));
        }
        Ok(Vec::new())
    }
}

/// Language model with a fixed answer (or a failure when `None`)
pub struct CannedModel {
    pub reply: Option<String>,
    pub prompts: Mutex<Vec<String>>,
}

impl CannedModel {
    pub fn new(reply: Option<&str>) -> Self {
        Self {
            reply: reply.map(str::to_string),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LanguageModel for CannedModel {
    async fn complete(&self, _system: Option<&str>, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply
            .clone()
            .ok_or_else(|| Error::Llm("canned failure".to_string()))
    }
}

pub struct Harness {
    pub env: Env,
    pub notifier: Arc<RecordingNotifier>,
    pub history: Arc<ScriptedHistory>,
    pub llm: Arc<CannedModel>,
}

pub fn harness(dir: &Path) -> Harness {
    harness_with(dir, ScriptedHistory::default(), CannedModel::new(Some("beep boop")))
}

pub fn harness_with(dir: &Path, history: ScriptedHistory, llm: CannedModel) -> Harness {
    let config = Config::for_test(dir);
    let store = Arc::new(Store::open(&config.db_path).unwrap());
    let notifier = Arc::new(RecordingNotifier::default());
    let history = Arc::new(history);
    let llm = Arc::new(llm);

    let env = Env {
        store,
        registry: Arc::new(Registry::builtin()),
        notifier: notifier.clone(),
        history: history.clone(),
        dates: Arc::new(RuleParser::new(config.display_tz)),
        llm: llm.clone(),
        config: Arc::new(config),
    };

    Harness {
        env,
        notifier,
        history,
        llm,
    }
}

/// Whether reminder `id` is still waiting to be delivered
pub fn is_pending(env: &Env, id: &str) -> bool {
    env.store
        .list_pending_reminders()
        .unwrap()
        .iter()
        .any(|r| r.id == id)
}

/// An inbound user message in group `g1`, sent now
pub fn message(id: &str, user_id: &str, name: &str, text: &str) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        created_at: Utc::now().timestamp(),
        sender_type: "user".to_string(),
        text: Some(text.to_string()),
        user_id: user_id.to_string(),
        name: name.to_string(),
        group_id: "g1".to_string(),
        avatar_url: None,
        attachments: Vec::new(),
    }
}
