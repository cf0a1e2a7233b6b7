use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use pb_backend::BackendError;
use pb_core::BenchmarkSize;
use serde::{Deserialize, Serialize};

pub const RUN_LOG_SCHEMA_VERSION: &str = "pb-bench-run-log-v1";
const DIAGNOSTIC_BYTES: usize = 1024;

/// One JSONL entry per attempted (workload, size, backend) combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRunLog {
    pub schema_version: String,
    pub ts_unix_ms: u64,
    pub workload: String,
    pub backend: String,
    pub size: usize,
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub outcome: String,
    pub wall_time: Option<f64>,
    pub reason_code: String,
    pub replay_command: String,
    /// Captured output hit the cap; profiler stats may be missing.
    #[serde(default)]
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl StructuredRunLog {
    fn base(workload: &str, backend: &str, size: &BenchmarkSize, replay_command: String) -> Self {
        Self {
            schema_version: RUN_LOG_SCHEMA_VERSION.to_string(),
            ts_unix_ms: now_unix_ms(),
            workload: workload.to_string(),
            backend: backend.to_string(),
            size: size.real_size,
            nx: size.grid.nx,
            ny: size.grid.ny,
            nz: size.grid.nz,
            outcome: String::new(),
            wall_time: None,
            reason_code: String::new(),
            replay_command,
            truncated: false,
            diagnostic: None,
        }
    }

    #[must_use]
    pub fn passed(
        workload: &str,
        backend: &str,
        size: &BenchmarkSize,
        replay_command: String,
        wall_time: f64,
        truncated: bool,
    ) -> Self {
        let mut log = Self::base(workload, backend, size, replay_command);
        log.outcome = "pass".to_string();
        log.reason_code = "run_ok".to_string();
        log.wall_time = Some(wall_time);
        log.truncated = truncated;
        log
    }

    #[must_use]
    pub fn failed(
        workload: &str,
        backend: &str,
        size: &BenchmarkSize,
        replay_command: String,
        error: &BackendError,
    ) -> Self {
        let mut log = Self::base(workload, backend, size, replay_command);
        log.outcome = "fail".to_string();
        log.reason_code = failure_reason_code(error).to_string();
        log.diagnostic = Some(pb_backend::bounded_diagnostic(
            &error.to_string(),
            DIAGNOSTIC_BYTES,
        ));
        log
    }
}

#[must_use]
pub fn failure_reason_code(error: &BackendError) -> &'static str {
    match error {
        BackendError::ProcessFailed {
            timed_out: true, ..
        } => "timeout",
        BackendError::ProcessFailed {
            exit_code: None, ..
        } => "terminated",
        BackendError::ProcessFailed { .. } => "nonzero_exit",
        BackendError::Spawn { .. } => "spawn_failed",
        BackendError::UnknownPlaceholder { .. } | BackendError::MissingParameter { .. } => {
            "render_failed"
        }
        _ => "run_error",
    }
}

pub fn write_jsonl(output_path: &Path, entries: &[StructuredRunLog]) -> Result<(), String> {
    let mut lines = String::new();
    for entry in entries {
        let line = serde_json::to_string(entry)
            .map_err(|error| format!("failed to serialize run log entry: {error}"))?;
        lines.push_str(&line);
        lines.push('\n');
    }

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|error| {
            format!("failed to create run log dir {}: {error}", parent.display())
        })?;
    }

    fs::write(output_path, lines)
        .map_err(|error| format!("failed to write run log {}: {error}", output_path.display()))
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
        })
}
