//! Progress reporting for iterative backends.

/// Events emitted while a backend runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressMsg {
    /// One iteration of an iterative solver finished.
    SolverIteration {
        /// Backend name
        solver: &'static str,
        /// Iteration number, starting at 1
        iter: usize,
        /// Residual norm after the iteration
        residual: f64,
    },
}

/// Sink that consumes progress messages.
///
/// Implemented for any `Fn(ProgressMsg)` closure.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, msg: ProgressMsg);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressMsg) + Send + Sync,
{
    fn emit(&self, msg: ProgressMsg) {
        self(msg)
    }
}
