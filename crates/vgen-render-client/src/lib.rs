//! Client for the external render service.
//!
//! The render monitor polls through the [`RenderStatusSource`] trait, so
//! tests can substitute a scripted source for the HTTP client.

pub mod client;
pub mod config;
pub mod error;

pub use client::{RenderClient, RenderStatusSource};
pub use config::RenderClientConfig;
pub use error::{RenderError, RenderResult};
