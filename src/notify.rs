//! Outbound notifications
//!
//! Delivery (SMTP or otherwise) lives outside this crate. The core only
//! needs a dispatch call it can run in the background and forget about.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::types::{MarqueeError, Result};

/// Message templates the core sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// Sent after registration, carries the activation token
    UserWelcome,
}

impl Template {
    pub fn as_str(&self) -> &'static str {
        match self {
            Template::UserWelcome => "user_welcome",
        }
    }
}

/// A rendered-to-be notification
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub recipient: String,
    pub template: Template,
    pub data: serde_json::Value,
}

/// Delivery collaborator
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<()>;
}

/// Logs notifications instead of delivering them
#[derive(Debug, Clone)]
pub struct LogNotifier {
    sender: String,
}

impl LogNotifier {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> Result<()> {
        info!(
            sender = %self.sender,
            recipient = %notification.recipient,
            template = notification.template.as_str(),
            "Notification dispatched"
        );
        Ok(())
    }
}

/// Records notifications in memory; optionally fails every send
#[derive(Debug, Clone, Default)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    fail: bool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every send errors
    pub fn failing() -> Self {
        Self {
            sent: Arc::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, notification: Notification) -> Result<()> {
        if self.fail {
            return Err(MarqueeError::internal(format!(
                "delivery to {} failed",
                notification.recipient
            )));
        }
        self.sent
            .lock()
            .map_err(|e| MarqueeError::internal(format!("Lock poisoned: {}", e)))?
            .push(notification);
        Ok(())
    }
}
