//! Orchestration kernel: drives write → execute → repair cycles with
//! bounded retries, adaptive timeouts, and memory-assisted priming.
//!
//! The kernel owns the attempt state for a run's whole lifetime and carries
//! it by value through the state machine; the only cross-run coordination
//! lives in the sandbox's admission semaphore and the shared memory adapter.

mod agents;
mod error;
mod inference;
mod llm;
mod orchestrator;
mod runner_client;
mod signature;
mod state;

pub use agents::{sanitize_completion, CodeGenerator, CodeRepairer, GeneratedProgram};
pub use error::KernelError;
pub use inference::{extract_missing_inputs, infer_python_requirements, map_import_to_distribution};
pub use llm::GeminiClient;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use runner_client::{HttpRunner, ProgramRunner, SandboxRunner};
pub use signature::error_signature;
pub use state::{AttemptState, RunPayload, RunResult, Task, TaskOutcome};
