//! Notifier that records instead of sending.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use subenv_core::{Error, Result};
use subenv_engine::notify::{Notification, Notifier};

/// Records every notification; can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following send fail.
    pub fn fail_sends(&self, fail: bool) {
        *self.failing.lock().expect("lock") = fail;
    }

    /// Notifications delivered so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        if *self.failing.lock().expect("lock") {
            return Err(Error::remote("injected notification failure"));
        }
        self.sent.lock().expect("lock").push(notification.clone());
        Ok(())
    }
}
