/// Job ids are UUIDv7 strings, so lexical order follows creation order.
pub type JobId = String;

/// All persisted timestamps are UTC milliseconds since the Unix epoch.
pub type EpochMillis = i64;

/// Current UTC time in epoch milliseconds.
pub fn now_millis() -> EpochMillis {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a fresh time-ordered job id.
pub fn new_job_id() -> JobId {
    uuid::Uuid::now_v7().to_string()
}
