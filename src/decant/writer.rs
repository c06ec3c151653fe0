use crate::decant::record::{LoadedLog, Record, content_hash};
use crate::error::DecantError;
use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const MAX_BACKUP_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub records_written: usize,
}

/// `<dir>/<stem>.<stamp>[.<n>].jsonl.bak`
pub fn backup_path_for(path: &Path, stamp: &str, attempt: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("session");
    let name = if attempt == 0 {
        format!("{stem}.{stamp}.jsonl.bak")
    } else {
        format!("{stem}.{stamp}.{attempt}.jsonl.bak")
    };
    path.with_file_name(name)
}

fn backup_failed(path: &Path, reason: impl Into<String>) -> DecantError {
    DecantError::BackupFailed {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Copy `bytes` next to `path` without ever overwriting an older backup.
pub fn write_backup(path: &Path, bytes: &[u8]) -> Result<PathBuf, DecantError> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    for attempt in 0..MAX_BACKUP_ATTEMPTS {
        let candidate = backup_path_for(path, &stamp, attempt);
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(backup_failed(path, format!("{}: {err}", candidate.display()))),
        };
        if let Err(err) = file.write_all(bytes).and_then(|()| file.sync_all()) {
            let _ = fs::remove_file(&candidate);
            return Err(backup_failed(path, format!("{}: {err}", candidate.display())));
        }
        return Ok(candidate);
    }
    Err(backup_failed(
        path,
        format!("{MAX_BACKUP_ATTEMPTS} backups already exist for stamp {stamp}"),
    ))
}

/// One record per line, each terminated by a newline.
pub fn render(records: &[Record]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for record in records {
        out.extend_from_slice(record.to_line()?.as_bytes());
        out.push(b'\n');
    }
    Ok(out)
}

/// Replace the log with `records`. The file must still match what was
/// loaded; the backup (when enabled) is taken before the replacement, and the
/// replacement itself is a rename of a synced temp file.
pub fn commit(log: &LoadedLog, records: &[Record], backup: bool) -> Result<WriteOutcome> {
    let path = log.path.as_path();
    let current =
        fs::read(path).with_context(|| format!("failed to re-read {}", path.display()))?;
    if content_hash(&current) != log.content_hash {
        return Err(DecantError::LogChanged {
            path: path.to_path_buf(),
        }
        .into());
    }

    let output = render(records)?;
    let backup_path = if backup {
        Some(write_backup(path, &current)?)
    } else {
        None
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(&output)
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    let permissions = fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .permissions();
    tmp.as_file()
        .set_permissions(permissions)
        .with_context(|| format!("failed to copy permissions of {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync temp file for {}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to replace {}", path.display()))?;

    Ok(WriteOutcome {
        path: path.to_path_buf(),
        backup_path,
        bytes_before: current.len() as u64,
        bytes_after: output.len() as u64,
        records_written: records.len(),
    })
}
