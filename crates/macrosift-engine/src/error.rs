use thiserror::Error;

/// Errors produced while emulating macro code.
///
/// Only the resource-guard variants are fatal: they abort the whole analysis
/// run and are never retried. Everything else is recoverable: callers
/// degrade to the uninitialized sentinel or fall back to the slow path.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The recursion guard tripped. Aborts the analysis run.
    #[error("recursion depth approaching limit, aborting analysis")]
    RecursionLimit,

    /// The wall-clock budget was exhausted. Aborts the analysis run.
    #[error("emulation time limit exceeded, aborting analysis")]
    Timeout,

    /// A loop exceeded its iteration budget. This is a typed signal (never
    /// matched by message text); the JIT terminates the loop and treats it
    /// as handled.
    #[error("possible infinite loop detected")]
    InfiniteLoop,

    /// A construct the current code path does not support.
    #[error("unsupported construct: {0}")]
    Unsupported(String),

    /// A recoverable evaluation failure.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl EngineError {
    /// True for the unrecoverable guard aborts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::RecursionLimit | EngineError::Timeout)
    }
}
