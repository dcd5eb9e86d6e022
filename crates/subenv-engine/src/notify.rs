//! Chat notification contract.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use subenv_core::Result;

/// Who receives a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum NotifyTarget {
    /// A single user, addressed by email.
    User(String),
    /// A chat group, addressed by display name.
    Group(String),
}

impl fmt::Display for NotifyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(email) => write!(f, "user:{email}"),
            Self::Group(name) => write!(f, "group:{name}"),
        }
    }
}

/// A templated card message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Recipient.
    pub target: NotifyTarget,
    /// Card template id.
    pub template_id: String,
    /// Template variables.
    pub variables: BTreeMap<String, String>,
}

impl Notification {
    /// Creates a notification with no variables.
    #[must_use]
    pub fn new(target: NotifyTarget, template_id: impl Into<String>) -> Self {
        Self {
            target,
            template_id: template_id.into(),
            variables: BTreeMap::new(),
        }
    }

    /// Sets a template variable.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }
}

/// Sends notifications.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Delivers one notification.
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Notifier that only logs. Used when no chat credentials are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            recipient = %notification.target,
            template = %notification.template_id,
            variables = ?notification.variables,
            "notification (not delivered, chat disabled)"
        );
        Ok(())
    }
}
