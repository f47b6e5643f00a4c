//! Background services.

pub mod queue_reporter;

pub use queue_reporter::QueueReporter;
