//! Row types for the `jobs` table and the status update DTO.

pub mod job;
