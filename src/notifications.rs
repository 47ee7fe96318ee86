// Transient operator notifications (toasts)

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub level: Level,
    pub created_at: DateTime<Utc>,
}

/// Holds each notification for its TTL and fans new ones out to subscribers
pub struct Notifier {
    ttl: Duration,
    visible: Mutex<Vec<Notification>>,
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(ttl: Duration) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            ttl,
            visible: Mutex::new(Vec::new()),
            sender,
        }
    }

    pub fn success(&self, title: impl Into<String>, description: impl Into<String>) -> Notification {
        self.push(Level::Success, title.into(), description.into())
    }

    pub fn error(&self, title: impl Into<String>, description: impl Into<String>) -> Notification {
        self.push(Level::Error, title.into(), description.into())
    }

    fn push(&self, level: Level, title: String, description: String) -> Notification {
        let notification = Notification {
            id: Uuid::new_v4(),
            title,
            description,
            level,
            created_at: Utc::now(),
        };

        match level {
            Level::Success => info!(title = %notification.title, "{}", notification.description),
            Level::Error => error!(title = %notification.title, "{}", notification.description),
        }

        if let Ok(mut visible) = self.visible.lock() {
            self.prune(&mut visible, notification.created_at);
            visible.push(notification.clone());
        }
        // No subscribers is fine
        let _ = self.sender.send(notification.clone());
        notification
    }

    /// Notifications younger than the TTL, oldest first. Expired ones are dropped.
    pub fn visible(&self) -> Vec<Notification> {
        self.visible_at(Utc::now())
    }

    fn visible_at(&self, now: DateTime<Utc>) -> Vec<Notification> {
        match self.visible.lock() {
            Ok(mut visible) => {
                self.prune(&mut visible, now);
                visible.clone()
            }
            Err(_) => Vec::new(),
        }
    }

    fn prune(&self, visible: &mut Vec<Notification>, now: DateTime<Utc>) {
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        visible.retain(|n| now.signed_duration_since(n.created_at) < ttl);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}
