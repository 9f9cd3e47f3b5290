//! Inline schema migrations, applied in order and tracked by version in the
//! `_migrations` table.

pub const MIGRATIONS: &[&str] = &[
    // 1: jobs table
    r#"
CREATE TABLE IF NOT EXISTS jobs (
    id           TEXT PRIMARY KEY NOT NULL,
    type         TEXT NOT NULL,
    status       TEXT NOT NULL,
    created_at   INTEGER NOT NULL,
    started_at   INTEGER,
    completed_at INTEGER,
    result       TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_type_created ON jobs (type, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs (created_at);
"#,
];
