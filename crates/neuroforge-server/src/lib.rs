//! HTTP surface for NeuroForge: the task API (`/run_task`,
//! `/run_task_multipart`) and the sandbox runner API (`/run`), both thin
//! wrappers over the kernel and sandbox crates.

mod api_errors;
mod api_handlers;
mod api_models;

pub use api_errors::ApiError;
pub use api_handlers::{build_router, AppState};
pub use api_models::{RunRequestBody, RunResponseBody, RunTaskRequest, RunTaskResponse};
