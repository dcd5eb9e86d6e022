//! Chat service client used to deliver notifications.
//!
//! Authenticates with app credentials for a tenant access token, resolves
//! group display names to chat ids, and posts interactive template cards.
//! Tokens and the group directory are cached in memory.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use subenv_core::{Error, Redacted, Result};
use subenv_engine::{Notification, Notifier, NotifyTarget};

use crate::config::ChatConfig;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Tokens are refreshed this long before the service expires them.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const GROUP_PAGE_SIZE: &str = "100";

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Notifier that delivers template cards through the chat service.
#[derive(Debug)]
pub struct ChatNotifier {
    base_url: String,
    app_id: String,
    app_secret: Redacted<String>,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
    groups: Mutex<HashMap<String, String>>,
}

impl ChatNotifier {
    /// Creates a notifier for the chat service at `base_url`.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            app_id: app_id.into(),
            app_secret: Redacted(app_secret.into()),
            client,
            token: Mutex::new(None),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a notifier from configuration, or `None` when no credentials
    /// are configured.
    #[must_use]
    pub fn from_config(config: &ChatConfig) -> Option<Self> {
        config
            .credentials()
            .map(|(id, secret)| Self::new(config.base_url.clone(), id, secret))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn tenant_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.value.clone());
        }

        let response: TokenResponse = self
            .client
            .post(self.url("open-apis/auth/v3/tenant_access_token/internal"))
            .json(&TokenRequest {
                app_id: &self.app_id,
                app_secret: self.app_secret.expose(),
            })
            .send()
            .await
            .map_err(|e| Error::remote(format!("chat token request failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Serialization {
                message: format!("invalid chat token response: {e}"),
            })?;

        if response.code != 0 || response.tenant_access_token.is_empty() {
            return Err(Error::remote(format!(
                "chat token rejected (code {}): {}",
                response.code, response.msg
            )));
        }

        let token = CachedToken {
            value: response.tenant_access_token,
            expires_at: now + chrono::Duration::seconds(response.expire),
        };
        tracing::debug!(expires_at = %token.expires_at, "refreshed chat tenant token");
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn chat_id(&self, group: &str, token: &str) -> Result<String> {
        if let Some(id) = self.groups.lock().await.get(group) {
            return Ok(id.clone());
        }

        let directory = self.fetch_groups(token).await?;
        let mut groups = self.groups.lock().await;
        *groups = directory;
        groups
            .get(group)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("chat group {group}")))
    }

    async fn fetch_groups(&self, token: &str) -> Result<HashMap<String, String>> {
        let mut directory = HashMap::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("page_size", GROUP_PAGE_SIZE.to_string()),
                ("sort_type", "ByCreateTimeAsc".to_string()),
            ];
            if let Some(page) = page_token.take() {
                query.push(("page_token", page));
            }

            let response: GroupsResponse = self
                .client
                .get(self.url("open-apis/im/v1/chats"))
                .query(&query)
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| Error::remote(format!("chat group listing failed: {e}")))?
                .json()
                .await
                .map_err(|e| Error::Serialization {
                    message: format!("invalid chat group listing: {e}"),
                })?;

            if response.code != 0 {
                return Err(Error::remote(format!(
                    "chat group listing rejected (code {}): {}",
                    response.code, response.msg
                )));
            }

            directory.extend(
                response
                    .data
                    .items
                    .into_iter()
                    .map(|item| (item.name, item.chat_id)),
            );

            match response.data.page_token {
                Some(next) if response.data.has_more && !next.is_empty() => {
                    page_token = Some(next);
                }
                _ => break,
            }
        }

        tracing::debug!(groups = directory.len(), "loaded chat group directory");
        Ok(directory)
    }
}

#[async_trait]
impl Notifier for ChatNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let token = self.tenant_token().await?;
        let (receive_id_type, receive_id) = match &notification.target {
            NotifyTarget::User(email) => ("email", email.clone()),
            NotifyTarget::Group(name) => ("chat_id", self.chat_id(name, &token).await?),
        };

        let content = serde_json::to_string(&Card {
            kind: "template",
            data: CardData {
                template_id: &notification.template_id,
                template_variable: &notification.variables,
            },
        })?;

        let response: MessageResponse = self
            .client
            .post(self.url("open-apis/im/v1/messages"))
            .query(&[("receive_id_type", receive_id_type)])
            .bearer_auth(&token)
            .json(&MessageRequest {
                receive_id: &receive_id,
                msg_type: "interactive",
                content,
            })
            .send()
            .await
            .map_err(|e| Error::remote(format!("chat message request failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Serialization {
                message: format!("invalid chat message response: {e}"),
            })?;

        if response.code != 0 {
            return Err(Error::remote(format!(
                "chat message to {} rejected (code {}): {}",
                notification.target, response.code, response.msg
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    app_id: &'a str,
    app_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
    #[serde(default)]
    expire: i64,
}

#[derive(Debug, Deserialize)]
struct GroupItem {
    #[serde(default)]
    chat_id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct GroupPage {
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    items: Vec<GroupItem>,
    #[serde(default)]
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroupsResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: GroupPage,
}

#[derive(Debug, Serialize)]
struct CardData<'a> {
    template_id: &'a str,
    template_variable: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct Card<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: CardData<'a>,
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    receive_id: &'a str,
    msg_type: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}
