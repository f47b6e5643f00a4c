//! Outbound notifier.
//!
//! [`Notifier::notify`] fans one job event out to every interested
//! subscriber on its own task, so a slow or failing endpoint never delays
//! the others or the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vgen_models::Job;

use crate::breaker::CircuitBreakers;
use crate::config::NotifierConfig;
use crate::error::{NotifyError, NotifyResult};
use crate::metrics;
use crate::signature::{self, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER};
use crate::subscriber::{NotificationEvent, Subscriber, SubscriberRegistry};

/// Body POSTed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub event: NotificationEvent,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Stable across retries; subscribers dedupe on it
    pub delivery_id: String,
}

/// What happened to one subscriber's delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Failed { attempts: u32, error: String },
    /// Breaker open; nothing sent
    Skipped,
}

/// Signed, retried delivery of job events.
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    registry: Arc<SubscriberRegistry>,
    breakers: Arc<CircuitBreakers>,
    config: Arc<NotifierConfig>,
}

impl Notifier {
    /// Build a notifier and register `config.subscribers`.
    pub fn new(config: NotifierConfig) -> NotifyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NotifyError::config(format!("Failed to build HTTP client: {}", e)))?;

        let registry = Arc::new(SubscriberRegistry::new());
        for url in &config.subscribers {
            registry.add(url, Vec::new(), None)?;
        }

        Ok(Self {
            client,
            registry,
            breakers: Arc::new(CircuitBreakers::new(
                config.breaker_threshold,
                config.breaker_cooldown,
            )),
            config: Arc::new(config),
        })
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    /// Remove a subscriber and its breaker state.
    pub fn unsubscribe(&self, id: &str) -> NotifyResult<Subscriber> {
        let removed = self.registry.remove(id)?;
        self.breakers.forget(id);
        Ok(removed)
    }

    /// Deliver `event` for `job` to every interested subscriber.
    ///
    /// Returns one handle per spawned delivery; callers may ignore them.
    pub fn notify(&self, event: NotificationEvent, job: &Job) -> Vec<JoinHandle<DeliveryOutcome>> {
        let subscribers = self.registry.interested(event);
        if subscribers.is_empty() {
            return Vec::new();
        }

        let data = match serde_json::to_value(job) {
            Ok(data) => data,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to serialize notification payload");
                return Vec::new();
            }
        };

        debug!(job_id = %job.id, event = %event, subscribers = subscribers.len(), "Dispatching notification");
        subscribers
            .into_iter()
            .map(|subscriber| {
                let payload = NotificationPayload {
                    event,
                    data: data.clone(),
                    timestamp: Utc::now(),
                    delivery_id: Uuid::new_v4().to_string(),
                };
                let notifier = self.clone();
                tokio::spawn(async move { notifier.deliver(&subscriber, &payload).await })
            })
            .collect()
    }

    /// Deliver one payload to one subscriber with retries and breaker checks.
    pub async fn deliver(&self, subscriber: &Subscriber, payload: &NotificationPayload) -> DeliveryOutcome {
        if !self.breakers.allow(&subscriber.id) {
            debug!(subscriber_id = %subscriber.id, "Breaker open, skipping delivery");
            metrics::record_delivery("skipped");
            return DeliveryOutcome::Skipped;
        }

        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                metrics::record_delivery("failed");
                return DeliveryOutcome::Failed {
                    attempts: 0,
                    error: e.to_string(),
                };
            }
        };
        let secret = subscriber
            .secret
            .as_deref()
            .or(self.config.signing_secret.as_deref());

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.try_send(subscriber, payload, &body, secret).await {
                Ok(()) => {
                    self.breakers.record_success(&subscriber.id);
                    metrics::record_delivery("delivered");
                    debug!(
                        subscriber_id = %subscriber.id,
                        delivery_id = %payload.delivery_id,
                        attempts = attempt,
                        "Notification delivered"
                    );
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(e) if attempt < max_attempts => {
                    metrics::record_attempt_failure();
                    let delay = self.config.delay_for_attempt(attempt);
                    warn!(
                        subscriber_id = %subscriber.id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Notification attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    metrics::record_attempt_failure();
                    metrics::record_delivery("failed");
                    if self.breakers.record_failure(&subscriber.id) {
                        metrics::record_breaker_opened();
                        info!(
                            subscriber_id = %subscriber.id,
                            cooldown_secs = self.config.breaker_cooldown.as_secs(),
                            "Subscriber paused after repeated failures"
                        );
                    }
                    error!(
                        subscriber_id = %subscriber.id,
                        delivery_id = %payload.delivery_id,
                        attempts = attempt,
                        error = %e,
                        "Notification dropped after all retries"
                    );
                    return DeliveryOutcome::Failed {
                        attempts: attempt,
                        error: e.to_string(),
                    };
                }
            }
        }
    }

    async fn try_send(
        &self,
        subscriber: &Subscriber,
        payload: &NotificationPayload,
        body: &[u8],
        secret: Option<&str>,
    ) -> NotifyResult<()> {
        let mut request = self
            .client
            .post(&subscriber.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(DELIVERY_HEADER, &payload.delivery_id)
            .header(EVENT_HEADER, payload.event.as_str());
        if let Some(secret) = secret {
            request = request.header(SIGNATURE_HEADER, signature::sign(secret, body)?);
        }

        let response = request.body(body.to_vec()).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use serde_json::json;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config() -> NotifierConfig {
        NotifierConfig {
            timeout: Duration::from_secs(2),
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            breaker_threshold: 2,
            breaker_cooldown: Duration::from_secs(60),
            signing_secret: Some("topsecret".into()),
            subscribers: Vec::new(),
        }
    }

    fn job() -> Job {
        Job::new(json!({"topic": "space"}), 6)
    }

    #[tokio::test]
    async fn test_delivers_signed_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-vgen-event", "job.completed"))
            .and(header_exists("x-vgen-delivery"))
            .and(header_exists("x-vgen-signature"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(fast_config()).unwrap();
        notifier
            .registry()
            .add(&format!("{}/hook", server.uri()), vec![], None)
            .unwrap();

        let job = job();
        let handles = notifier.notify(NotificationEvent::JobCompleted, &job);
        assert_eq!(handles.len(), 1);
        for handle in handles {
            assert_eq!(handle.await.unwrap(), DeliveryOutcome::Delivered { attempts: 1 });
        }

        let requests = server.received_requests().await.unwrap();
        let request = &requests[0];
        let sig = request
            .headers
            .get("x-vgen-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert!(signature::verify("topsecret", &request.body, sig));

        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["event"], "job.completed");
        assert_eq!(body["data"]["id"], job.id.as_str());
        assert!(body["delivery_id"].is_string());
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let notifier = Notifier::new(fast_config()).unwrap();
        notifier.registry().add(&server.uri(), vec![], None).unwrap();

        let outcomes = futures_outcomes(notifier.notify(NotificationEvent::JobFailed, &job())).await;
        assert_eq!(outcomes, vec![DeliveryOutcome::Delivered { attempts: 3 }]);

        let requests = server.received_requests().await.unwrap();
        let ids: Vec<_> = requests
            .iter()
            .map(|r| r.headers.get("x-vgen-delivery").cloned())
            .collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_breaker_pauses_failing_subscriber_only() {
        let bad = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&bad)
            .await;
        let good = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&good)
            .await;

        let mut config = fast_config();
        config.max_attempts = 1;
        let notifier = Notifier::new(config).unwrap();
        let bad_sub = notifier.registry().add(&bad.uri(), vec![], None).unwrap();
        notifier.registry().add(&good.uri(), vec![], None).unwrap();

        for _ in 0..2 {
            futures_outcomes(notifier.notify(NotificationEvent::JobFailed, &job())).await;
        }
        assert!(notifier.breakers().is_open(&bad_sub.id));

        let outcomes = futures_outcomes(notifier.notify(NotificationEvent::JobFailed, &job())).await;
        assert!(outcomes.contains(&DeliveryOutcome::Skipped));
        assert!(outcomes.contains(&DeliveryOutcome::Delivered { attempts: 1 }));
        assert_eq!(bad.received_requests().await.unwrap().len(), 2);
        assert_eq!(good.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_uninterested_subscriber_is_not_called() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let notifier = Notifier::new(fast_config()).unwrap();
        notifier
            .registry()
            .add(&server.uri(), vec![NotificationEvent::JobFailed], None)
            .unwrap();
        assert!(notifier.notify(NotificationEvent::JobCompleted, &job()).is_empty());
    }

    async fn futures_outcomes(handles: Vec<JoinHandle<DeliveryOutcome>>) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        outcomes
    }
}
