//! Route tree.
//!
//! ```text
//! /health                      health check
//! /jobs                        job submission, status, SSE output stream
//! ```

pub mod health;
pub mod jobs;
