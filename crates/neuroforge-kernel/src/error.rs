use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    /// The task itself is malformed (empty text, bad payload).
    #[error("invalid task: {0}")]
    InvalidTask(String),
    /// The generator could not produce code; fatal to the run.
    #[error("code generation failed: {0}")]
    Generation(String),
    /// The repairer could not produce a fix; fatal to the run.
    #[error("code repair failed: {0}")]
    Repair(String),
    /// The runner could not be reached or rejected the payload.
    #[error("runner error: {0}")]
    Runner(String),
}
