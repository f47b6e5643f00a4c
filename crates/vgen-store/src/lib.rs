//! Job store for the vgen scheduler.
//!
//! This crate provides:
//! - The [`JobStore`], sole writer of job state, with per-job critical sections
//! - A read-through TTL cache (short TTL for live jobs, long for terminal ones)
//! - In-memory and file-backed repositories
//! - A render id index for render completion lookups

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod repository;
pub mod store;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use repository::{FileRepository, JobRepository, MemoryRepository};
pub use store::{JobFilter, JobStore, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
