//! Disposable-container sandbox for executing untrusted generated programs.
//!
//! A run stages the program (plus any input files and a `requirements.txt`)
//! into a fresh temp workspace, copies it into a uniquely-named container,
//! executes it under a wall-clock limit, and brings the post-run workspace
//! back as a ZIP archive. Admission is bounded by a semaphore so at most a
//! fixed number of containers exist at once.

mod artifacts;
mod profiles;
mod runner;

pub use artifacts::{capture_artifacts, ArtifactCapture};
pub use profiles::{Language, LanguageProfile, UnknownLanguage};
pub use runner::{ContainerRunner, RunOutcome, RunRequest, SandboxError, SandboxSettings};

pub const TIMEOUT_EXIT_CODE: i32 = 124;
