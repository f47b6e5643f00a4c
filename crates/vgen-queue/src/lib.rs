//! Admission control and event fan-out.
//!
//! This crate provides:
//! - The admission controller: N worker slots plus a FIFO wait queue
//! - The event broadcaster: per-job and global stream subscriptions

pub mod admission;
pub mod broadcast;

pub use admission::{Admission, AdmissionController, AdmissionSnapshot};
pub use broadcast::EventBroadcaster;
