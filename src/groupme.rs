//! GroupMe wire types and REST client
//!
//! The client posts through a group's registered bot and pages backwards
//! through group history for the sync engine.

use crate::channel::{HistorySource, Notifier, Outbound};
use crate::error::{Error, Result};
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// A message as delivered by the webhook or returned by the history API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    pub id: String,
    pub created_at: i64,
    #[serde(default)]
    pub sender_type: String,
    #[serde(default)]
    pub text: Option<String>,
    pub user_id: String,
    pub name: String,
    pub group_id: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Value>,
}

impl InboundMessage {
    /// Message text; image-only posts carry none
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.created_at, 0).unwrap_or_default()
    }

    /// First word of the sender's display name
    pub fn first_name(&self) -> &str {
        first_name(&self.name)
    }

    pub fn is_from_bot(&self) -> bool {
        self.sender_type == "bot"
    }
}

pub fn first_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or(name)
}

#[derive(Debug, Deserialize)]
struct MessagesEnvelope {
    response: Option<MessagesPage>,
}

#[derive(Debug, Deserialize)]
struct MessagesPage {
    #[serde(default)]
    messages: Option<Vec<InboundMessage>>,
}

/// REST client for the GroupMe v3 API
pub struct GroupMeClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    page_size: u32,
    store: Arc<Store>,
}

impl GroupMeClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        token: &str,
        page_size: u32,
        store: Arc<Store>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            page_size,
            store,
        }
    }
}

/// JSON body for `POST /bots/post`
fn bot_post_payload(bot_id: &str, message: &Outbound) -> Value {
    let mut attachments = Vec::new();

    if let Some(reply_to) = &message.reply_to {
        attachments.push(json!({
            "type": "reply",
            "reply_id": reply_to,
            "base_reply_id": reply_to,
        }));
    }

    if !message.mentions.is_empty() {
        let user_ids: Vec<&str> = message.mentions.iter().map(|m| m.user_id.as_str()).collect();
        let loci: Vec<[usize; 2]> = message
            .mentions
            .iter()
            .map(|m| [m.index, m.length])
            .collect();
        attachments.push(json!({
            "type": "mentions",
            "user_ids": user_ids,
            "loci": loci,
        }));
    }

    json!({
        "text": message.text,
        "bot_id": bot_id,
        "attachments": attachments,
    })
}

#[async_trait]
impl Notifier for GroupMeClient {
    async fn send(&self, group_id: &str, message: Outbound) -> Result<()> {
        let bot_id = self.store.bot_id_for_group(group_id)?;
        let payload = bot_post_payload(&bot_id, &message);

        let response = self
            .http
            .post(format!("{}/bots/post", self.base_url))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Posted {} chars to group {}", message.text.len(), group_id);
        Ok(())
    }
}

#[async_trait]
impl HistorySource for GroupMeClient {
    async fn fetch_page(
        &self,
        group_id: &str,
        before_id: Option<&str>,
    ) -> Result<Vec<InboundMessage>> {
        let mut query = vec![
            ("token", self.token.clone()),
            ("limit", self.page_size.to_string()),
        ];
        if let Some(before) = before_id {
            query.push(("before_id", before.to_string()));
        }

        let response = self
            .http
            .get(format!("{}/groups/{}/messages", self.base_url, group_id))
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(Vec::new());
        }
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!("History fetch for {} failed with {}", group_id, status);
            return Err(Error::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: MessagesEnvelope = response.json().await?;
        Ok(envelope
            .response
            .and_then(|page| page.messages)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Mention;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, store: Arc<Store>) -> GroupMeClient {
        GroupMeClient::new(reqwest::Client::new(), &server.uri(), "tok", 25, store)
    }

    fn page_json(ids: &[&str]) -> Value {
        let messages: Vec<Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "created_at": 1_700_000_000,
                    "sender_type": "user",
                    "text": "hi",
                    "user_id": "u1",
                    "name": "Alice",
                    "group_id": "g1",
                    "avatar_url": null,
                    "attachments": [],
                })
            })
            .collect();
        json!({ "meta": { "code": 200 }, "response": { "count": ids.len(), "messages": messages } })
    }

    #[test]
    fn test_deserialize_webhook_payload() {
        let raw = r#"{
            "id": "1234567890",
            "created_at": 1302623328,
            "sender_type": "user",
            "text": "/roll 2d6",
            "user_id": "1234567890",
            "name": "John Doe",
            "group_id": "1234567890",
            "avatar_url": "https://i.groupme.com/123456789",
            "attachments": [],
            "source_guid": "GUID"
        }"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.text(), "/roll 2d6");
        assert_eq!(msg.first_name(), "John");
        assert_eq!(msg.timestamp().timestamp(), 1302623328);
        assert!(!msg.is_from_bot());
    }

    #[test]
    fn test_null_text_is_empty() {
        let raw = r#"{"id":"1","created_at":0,"text":null,"user_id":"u","name":"N","group_id":"g"}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.text(), "");
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn test_payload_with_reply_and_mentions() {
        let message = Outbound {
            text: "Reminder for Alice: hi".to_string(),
            mentions: vec![Mention {
                user_id: "u1".to_string(),
                index: 13,
                length: 5,
            }],
            reply_to: Some("m9".to_string()),
        };
        let payload = bot_post_payload("bot-7", &message);
        assert_eq!(payload["bot_id"], "bot-7");
        assert_eq!(payload["attachments"][0]["type"], "reply");
        assert_eq!(payload["attachments"][0]["reply_id"], "m9");
        assert_eq!(payload["attachments"][1]["user_ids"], json!(["u1"]));
        assert_eq!(payload["attachments"][1]["loci"], json!([[13, 5]]));
    }

    #[test]
    fn test_plain_payload_has_no_attachments() {
        let payload = bot_post_payload("bot-7", &Outbound::text("pong"));
        assert_eq!(payload["attachments"], json!([]));
    }

    #[tokio::test]
    async fn test_send_posts_with_registered_bot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bots/post"))
            .and(body_json(json!({"text": "pong", "bot_id": "bot-7", "attachments": []})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(Store::open_in_memory().unwrap());
        store.upsert_group("g1", "bot-7").unwrap();
        client(&server, store).send("g1", Outbound::text("pong")).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_unknown_group_fails() {
        let server = MockServer::start().await;
        let store = Arc::new(Store::open_in_memory().unwrap());
        let err = client(&server, store).send("nope", Outbound::text("x")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_page_passes_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/groups/g1/messages"))
            .and(query_param("before_id", "m50"))
            .and(query_param("limit", "25"))
            .and(query_param("token", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_json(&["m49", "m48"])))
            .mount(&server)
            .await;

        let store = Arc::new(Store::open_in_memory().unwrap());
        let page = client(&server, store).fetch_page("g1", Some("m50")).await.unwrap();
        let ids: Vec<_> = page.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m49", "m48"]);
    }

    #[tokio::test]
    async fn test_fetch_page_not_modified_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/groups/g1/messages"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let store = Arc::new(Store::open_in_memory().unwrap());
        let page = client(&server, store).fetch_page("g1", None).await.unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_page_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/groups/g1/messages"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let store = Arc::new(Store::open_in_memory().unwrap());
        let err = client(&server, store).fetch_page("g1", None).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { status: 500, .. }));
    }
}
