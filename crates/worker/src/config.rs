use std::path::PathBuf;
use std::time::Duration;

use sdjobs_core::args::ResourceDirs;

/// Settings for spawning and supervising the executable.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Path or name of the image-generation executable.
    pub executable: PathBuf,
    /// Working directory of every spawned process.
    pub working_dir: PathBuf,
    /// Where generated images are written.
    pub output_dir: PathBuf,
    /// Root of the per-kind model directories, see [`ResourceDirs::under`].
    pub models_dir: PathBuf,
    /// Time a process may keep running after its first stderr output.
    pub stderr_watchdog: Duration,
    /// Time between SIGTERM and SIGKILL when terminating a process.
    pub kill_grace: Duration,
}

impl RunnerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default   |
    /// |-------------------------|-----------|
    /// | `SD_EXECUTABLE`         | `sd`      |
    /// | `SD_WORKING_DIR`        | `.`       |
    /// | `SD_OUTPUT_DIR`         | `outputs` |
    /// | `SD_MODELS_DIR`         | `models`  |
    /// | `SD_STDERR_WATCHDOG_MS` | `500`     |
    /// | `SD_KILL_GRACE_MS`      | `2000`    |
    pub fn from_env() -> Self {
        let var = |key: &str, default: &str| std::env::var(key).unwrap_or_else(|_| default.into());

        let stderr_watchdog_ms: u64 = var("SD_STDERR_WATCHDOG_MS", "500")
            .parse()
            .expect("SD_STDERR_WATCHDOG_MS must be a valid u64");

        let kill_grace_ms: u64 = var("SD_KILL_GRACE_MS", "2000")
            .parse()
            .expect("SD_KILL_GRACE_MS must be a valid u64");

        Self {
            executable: var("SD_EXECUTABLE", "sd").into(),
            working_dir: var("SD_WORKING_DIR", ".").into(),
            output_dir: var("SD_OUTPUT_DIR", "outputs").into(),
            models_dir: var("SD_MODELS_DIR", "models").into(),
            stderr_watchdog: Duration::from_millis(stderr_watchdog_ms),
            kill_grace: Duration::from_millis(kill_grace_ms),
        }
    }

    pub fn resource_dirs(&self) -> ResourceDirs {
        ResourceDirs::under(&self.models_dir)
    }

    /// Absolute directory prefixes hidden from captured output.
    pub fn redact_roots(&self) -> Vec<String> {
        [&self.models_dir, &self.output_dir, &self.working_dir]
            .into_iter()
            .filter_map(|dir| std::path::absolute(dir).ok())
            .map(|dir| dir.to_string_lossy().into_owned())
            .filter(|dir| dir != "/")
            .collect()
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            executable: "sd".into(),
            working_dir: ".".into(),
            output_dir: "outputs".into(),
            models_dir: "models".into(),
            stderr_watchdog: Duration::from_millis(500),
            kill_grace: Duration::from_millis(2000),
        }
    }
}
