use crate::coverage::{CoverageSet, Location};
use log::trace;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Verdict of one target execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail,
    Unresolved,
}

/// Everything one execution produced: a textual result (the crash signature
/// for failures, empty for passes), the verdict, and the locations covered
/// up to the point the execution ended.
#[derive(Debug, Clone)]
pub struct Execution {
    pub result: String,
    pub outcome: Outcome,
    pub coverage: CoverageSet,
}

#[derive(Error, Debug)]
pub enum RunnerError {
    /// The harness itself broke, as opposed to the target failing.
    #[error("execution harness error: {0}")]
    Execution(String),
}

/// Runs the target once on an input.
pub trait Runner {
    fn execute(&mut self, input: &[u8]) -> Result<Execution, RunnerError>;
}

/// Collects coverage hits from inside a target harness.
///
/// The interior mutex lets the harness record through a shared reference
/// while the runner holds the probe. Hits recorded before a panic survive
/// the unwind, so crashing executions still report partial coverage.
#[derive(Debug, Default)]
pub struct CoverageProbe {
    hits: Mutex<CoverageSet>,
}

impl CoverageProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `site:line` as covered for the current execution.
    pub fn hit(&self, site: &str, line: u32) {
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Location::new(site, line));
    }

    fn take(&self) -> CoverageSet {
        std::mem::take(&mut *self.hits.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Executes a harness closure in-process, converting panics into `Fail`
/// outcomes with the panic message as signature.
pub struct InProcessRunner<F>
where
    F: Fn(&[u8], &CoverageProbe) -> Result<(), String>,
{
    harness: F,
    probe: CoverageProbe,
}

impl<F> InProcessRunner<F>
where
    F: Fn(&[u8], &CoverageProbe) -> Result<(), String>,
{
    pub fn new(harness: F) -> Self {
        Self {
            harness,
            probe: CoverageProbe::new(),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl<F> Runner for InProcessRunner<F>
where
    F: Fn(&[u8], &CoverageProbe) -> Result<(), String>,
{
    fn execute(&mut self, input: &[u8]) -> Result<Execution, RunnerError> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.harness)(input, &self.probe)));
        // Drain after the call so pre-panic hits are retained.
        let coverage = self.probe.take();
        trace!(
            "executed {} input bytes, {} locations covered",
            input.len(),
            coverage.len()
        );
        let execution = match outcome {
            Ok(Ok(())) => Execution {
                result: String::new(),
                outcome: Outcome::Pass,
                coverage,
            },
            Ok(Err(message)) => Execution {
                result: message,
                outcome: Outcome::Fail,
                coverage,
            },
            Err(payload) => Execution {
                result: panic_message(payload),
                outcome: Outcome::Fail,
                coverage,
            },
        };
        Ok(execution)
    }
}
