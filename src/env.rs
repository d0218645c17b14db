//! Explicit runtime context handed to every handler and job

use crate::channel::{HistorySource, Notifier, Outbound};
use crate::config::Config;
use crate::datetime::{ChainParser, DateParser, LlmDateParser, RuleParser};
use crate::error::Result;
use crate::groupme::GroupMeClient;
use crate::llm::{AnthropicClient, Disabled, LanguageModel};
use crate::registry::Registry;
use crate::store::Store;
use std::sync::Arc;
use tracing::{error, info};

/// Configuration plus every collaborator the bot talks to
#[derive(Clone)]
pub struct Env {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub registry: Arc<Registry>,
    pub notifier: Arc<dyn Notifier>,
    pub history: Arc<dyn HistorySource>,
    pub dates: Arc<dyn DateParser>,
    pub llm: Arc<dyn LanguageModel>,
}

impl Env {
    /// Wire up the real GroupMe and Anthropic clients around an opened store
    pub fn from_config(config: Config) -> Result<Self> {
        let store = Arc::new(Store::open(&config.db_path)?);
        let http = reqwest::Client::new();

        let groupme = Arc::new(GroupMeClient::new(
            http.clone(),
            &config.groupme_api_url,
            &config.groupme_token,
            config.sync_page_size,
            store.clone(),
        ));

        let rules = RuleParser::new(config.display_tz);
        let (llm, dates): (Arc<dyn LanguageModel>, Arc<dyn DateParser>) =
            match &config.anthropic_api_key {
                Some(key) => {
                    let llm: Arc<dyn LanguageModel> = Arc::new(AnthropicClient::new(
                        http,
                        &config.anthropic_api_url,
                        key,
                        &config.anthropic_model,
                    ));
                    let chain: Vec<Box<dyn DateParser>> = vec![
                        Box::new(rules),
                        Box::new(LlmDateParser::new(llm.clone(), config.display_tz)),
                    ];
                    let dates: Arc<dyn DateParser> = Arc::new(ChainParser::new(chain));
                    (llm, dates)
                }
                None => {
                    info!("No language model key configured; mentions will be ignored");
                    let llm: Arc<dyn LanguageModel> = Arc::new(Disabled);
                    let dates: Arc<dyn DateParser> = Arc::new(rules);
                    (llm, dates)
                }
            };

        let registry = Registry::builtin();
        info!("Loaded commands: {}", registry.names().join(", "));

        Ok(Self {
            config: Arc::new(config),
            store,
            registry: Arc::new(registry),
            notifier: groupme.clone() as Arc<dyn Notifier>,
            history: groupme as Arc<dyn HistorySource>,
            dates,
            llm,
        })
    }

    /// Post a message; failures are logged and reported as `false`
    pub async fn post(&self, group_id: &str, message: Outbound) -> bool {
        match self.notifier.send(group_id, message).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send message to group {}: {}", group_id, e);
                false
            }
        }
    }

    /// Post plain text, best effort
    pub async fn say(&self, group_id: &str, text: impl Into<String>) {
        self.post(group_id, Outbound::text(text)).await;
    }
}
