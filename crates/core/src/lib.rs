//! Domain building blocks shared by every sdjobs crate.
//!
//! - [`types`]: id and timestamp aliases.
//! - [`error`]: [`CoreError`](error::CoreError), the domain error type.
//! - [`job`]: job type, lifecycle state machine and submission body.
//! - [`args`]: translation of job parameters into the executable's argv.
//! - [`output`]: console output filtering for captured stdout.

pub mod args;
pub mod error;
pub mod job;
pub mod output;
pub mod types;
