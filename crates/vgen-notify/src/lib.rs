//! Outbound job notifications.
//!
//! This crate provides:
//! - A registry of external subscriber URLs
//! - HMAC-SHA256 signing (also used to verify inbound webhooks)
//! - Retried delivery with exponential backoff
//! - A per-subscriber circuit breaker

pub mod breaker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod notifier;
pub mod signature;
pub mod subscriber;

pub use breaker::CircuitBreakers;
pub use config::NotifierConfig;
pub use error::{NotifyError, NotifyResult};
pub use notifier::{DeliveryOutcome, NotificationPayload, Notifier};
pub use subscriber::{NotificationEvent, Subscriber, SubscriberRegistry};
