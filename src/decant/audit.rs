use crate::decant::paths::DecantPaths;
use crate::decant::util::now_epoch_secs;
use crate::decant::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub phase: String,
    pub status: String,
    pub message: String,
}

pub fn append_event(paths: &DecantPaths, phase: &str, status: &str, message: &str) -> Result<()> {
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    let event = AuditEvent {
        at_epoch_secs: now_epoch_secs()?,
        phase: phase.to_string(),
        status: status.to_string(),
        message: message.to_string(),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let path = paths.logs_dir.join("audit.log");
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Audit without failing the caller; problems surface as a warning line.
pub fn record(paths: &DecantPaths, phase: &str, status: &str, message: &str) {
    if let Err(err) = append_event(paths, phase, status, message) {
        warn::emit(WarnEvent {
            code: "AUDIT_WRITE_FAILED",
            stage: phase,
            action: "append-audit-log",
            session: "na",
            reason: status,
            err: &format!("{err:#}"),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::append_event;
    use crate::decant::paths::DecantPaths;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn append_event_writes_one_json_line_per_call() {
        let tmp = tempdir().expect("tempdir");
        let paths = DecantPaths {
            decant_home: tmp.path().to_path_buf(),
            logs_dir: tmp.path().join("logs"),
            config_file: tmp.path().join("decant.toml"),
            projects_dir: tmp.path().join("projects"),
        };

        append_event(&paths, "compact", "written", "kept 4 records").expect("first");
        append_event(&paths, "compact", "noop", "nothing to do").expect("second");

        let raw = fs::read_to_string(paths.logs_dir.join("audit.log")).expect("read audit");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["phase"], "compact");
        assert_eq!(first["status"], "written");
        assert_eq!(first["message"], "kept 4 records");
    }
}
