//! Service wiring: builds the supervisor, pipeline and presenter tasks and
//! runs them until a shutdown signal arrives.

mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::MonitorOrchestrator;
pub use types::{ComponentState, ShutdownReason};
