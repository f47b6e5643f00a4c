//! Subscriber registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;
use uuid::Uuid;
use vgen_models::JobStatus;

use crate::error::{NotifyError, NotifyResult};

/// Job events a subscriber can be told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationEvent {
    #[serde(rename = "job.started")]
    JobStarted,
    #[serde(rename = "job.rendering")]
    JobRendering,
    #[serde(rename = "job.completed")]
    JobCompleted,
    #[serde(rename = "job.failed")]
    JobFailed,
    #[serde(rename = "job.cancelled")]
    JobCancelled,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::JobStarted => "job.started",
            NotificationEvent::JobRendering => "job.rendering",
            NotificationEvent::JobCompleted => "job.completed",
            NotificationEvent::JobFailed => "job.failed",
            NotificationEvent::JobCancelled => "job.cancelled",
        }
    }

    /// Event fired when a job enters `status`. `pending` fires nothing.
    pub fn for_status(status: JobStatus) -> Option<Self> {
        match status {
            JobStatus::Pending => None,
            JobStatus::Active => Some(NotificationEvent::JobStarted),
            JobStatus::Rendering => Some(NotificationEvent::JobRendering),
            JobStatus::Completed => Some(NotificationEvent::JobCompleted),
            JobStatus::Failed => Some(NotificationEvent::JobFailed),
            JobStatus::Cancelled => Some(NotificationEvent::JobCancelled),
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered external endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: String,
    pub url: String,
    /// Events to deliver; empty means all
    #[serde(default)]
    pub events: Vec<NotificationEvent>,
    /// Per-subscriber HMAC key, overriding the notifier default
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Subscriber {
    pub fn wants(&self, event: NotificationEvent) -> bool {
        self.events.is_empty() || self.events.contains(&event)
    }
}

/// Thread-safe set of subscribers keyed by id.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<String, Subscriber>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an http(s) endpoint.
    pub fn add(
        &self,
        url: &str,
        events: Vec<NotificationEvent>,
        secret: Option<String>,
    ) -> NotifyResult<Subscriber> {
        let parsed = Url::parse(url).map_err(|e| NotifyError::invalid_url(format!("{}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(NotifyError::invalid_url(format!(
                "{}: scheme must be http or https",
                url
            )));
        }

        let subscriber = Subscriber {
            id: Uuid::new_v4().to_string(),
            url: parsed.to_string(),
            events,
            secret: secret.filter(|s| !s.is_empty()),
            created_at: Utc::now(),
        };
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(subscriber.id.clone(), subscriber.clone());

        info!(subscriber_id = %subscriber.id, url = %subscriber.url, "Subscriber registered");
        Ok(subscriber)
    }

    pub fn remove(&self, id: &str) -> NotifyResult<Subscriber> {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .ok_or_else(|| NotifyError::SubscriberNotFound(id.to_string()))
    }

    /// All subscribers, oldest first.
    pub fn list(&self) -> Vec<Subscriber> {
        let mut all: Vec<Subscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Subscribers that want `event`.
    pub fn interested(&self, event: NotificationEvent) -> Vec<Subscriber> {
        self.list().into_iter().filter(|s| s.wants(event)).collect()
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_filter() {
        let registry = SubscriberRegistry::new();
        registry.add("https://a.example/hook", vec![], None).unwrap();
        registry
            .add("https://b.example/hook", vec![NotificationEvent::JobFailed], None)
            .unwrap();

        assert_eq!(registry.interested(NotificationEvent::JobCompleted).len(), 1);
        assert_eq!(registry.interested(NotificationEvent::JobFailed).len(), 2);
    }

    #[test]
    fn test_rejects_bad_urls() {
        let registry = SubscriberRegistry::new();
        assert!(registry.add("not a url", vec![], None).is_err());
        assert!(registry.add("ftp://a.example/x", vec![], None).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove() {
        let registry = SubscriberRegistry::new();
        let sub = registry.add("http://localhost:9/x", vec![], None).unwrap();
        registry.remove(&sub.id).unwrap();
        assert!(matches!(registry.remove(&sub.id), Err(NotifyError::SubscriberNotFound(_))));
    }

    #[test]
    fn test_secret_is_not_serialized() {
        let registry = SubscriberRegistry::new();
        let sub = registry
            .add("https://a.example/hook", vec![], Some("k".into()))
            .unwrap();
        let value = serde_json::to_value(&sub).unwrap();
        assert!(value.get("secret").is_none());
    }

    #[test]
    fn test_event_for_status() {
        assert_eq!(NotificationEvent::for_status(JobStatus::Pending), None);
        assert_eq!(
            NotificationEvent::for_status(JobStatus::Completed),
            Some(NotificationEvent::JobCompleted)
        );
    }
}
