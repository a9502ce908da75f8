//! Infrastructure layer: background jobs, the task queue, the version gate
//! and worker configuration.

pub mod config;
pub mod jobs;
pub mod version_gate;

#[cfg(test)]
mod test_support;

pub use config::WorkerConfig;
pub use version_gate::{CALCULATION_VERSION_OPTION_NAME, VersionGate};
