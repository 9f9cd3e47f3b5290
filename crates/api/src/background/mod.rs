pub mod job_retention;
