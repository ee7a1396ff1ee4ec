pub mod metrics;
pub mod recovery;
pub mod tracing;
