//! Job execution: spawning the executable, capturing its output and driving
//! each job through its lifecycle.
//!
//! [`JobEngine`] is the entry point. It owns the [`ActiveProcessRegistry`]
//! and a task tracker with one runner task per job.

pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
mod runner;
mod streams;

pub use config::RunnerConfig;
pub use engine::JobEngine;
pub use error::EngineError;
pub use registry::{ActiveProcessRegistry, ProcessHandle};
