// Long-lived state machines behind the REST surface. One worker task per
// cluster serializes every mutation touching that cluster; different
// clusters proceed in parallel. Errors never escape a worker: each failure
// path writes `(failed, message)` to the row it was driving.

mod cluster;
mod deployment;
mod worker;

pub use deployment::{endpoint_taken, read_credentials};
pub use worker::{ClusterCommand, Orchestrator};

use std::fmt::Display;

/// A failed step carries its name so the persisted error message reads
/// `"<step>: <cause>"`.
#[derive(Debug)]
pub struct StepError {
    pub step: String,
    pub source: anyhow::Error,
}

impl StepError {
    pub fn message(&self) -> String {
        format!("{}: {}", self.step, self.source)
    }
}

pub(crate) trait StepContext<T> {
    fn step(self, name: &str) -> Result<T, StepError>;
}

impl<T, E> StepContext<T> for Result<T, E>
where
    E: Display + Send + Sync + 'static,
{
    fn step(self, name: &str) -> Result<T, StepError> {
        self.map_err(|e| StepError {
            step: name.to_string(),
            source: anyhow::anyhow!("{}", e),
        })
    }
}
