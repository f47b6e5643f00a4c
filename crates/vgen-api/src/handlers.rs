//! Request handlers.

pub mod health;
pub mod jobs;
pub mod queue;
pub mod streams;
pub mod subscribers;
pub mod webhooks;

pub use health::*;
