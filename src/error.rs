use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecantError {
    #[error("malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("corrupt tree at record {id}: {reason}")]
    CorruptTree { id: String, reason: String },
    #[error("boundary not found: {0}")]
    BoundaryNotFound(String),
    #[error("oracle unavailable during {stage} after {attempts} attempt(s): {reason}")]
    OracleUnavailable {
        stage: &'static str,
        attempts: usize,
        reason: String,
    },
    #[error("backup of {} failed: {reason}", path.display())]
    BackupFailed { path: PathBuf, reason: String },
    #[error("session log {} changed while decant was running; nothing written", path.display())]
    LogChanged { path: PathBuf },
}

impl DecantError {
    pub fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptTree {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> DecantErrorCode {
        match self {
            Self::MalformedRecord { .. } => DecantErrorCode::E003MalformedRecord,
            Self::CorruptTree { .. } => DecantErrorCode::E004CorruptTree,
            Self::BoundaryNotFound(_) => DecantErrorCode::E005BoundaryNotFound,
            Self::OracleUnavailable { .. } => DecantErrorCode::E006OracleUnavailable,
            Self::BackupFailed { .. } => DecantErrorCode::E007BackupFailed,
            Self::LogChanged { .. } => DecantErrorCode::E008LogChanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecantErrorCode {
    E001Failure,
    E003MalformedRecord,
    E004CorruptTree,
    E005BoundaryNotFound,
    E006OracleUnavailable,
    E007BackupFailed,
    E008LogChanged,
}

impl DecantErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Failure => "E001_FAILURE",
            Self::E003MalformedRecord => "E003_MALFORMED_RECORD",
            Self::E004CorruptTree => "E004_CORRUPT_TREE",
            Self::E005BoundaryNotFound => "E005_BOUNDARY_NOT_FOUND",
            Self::E006OracleUnavailable => "E006_ORACLE_UNAVAILABLE",
            Self::E007BackupFailed => "E007_BACKUP_FAILED",
            Self::E008LogChanged => "E008_LOG_CHANGED",
        }
    }

    /// Process exit status. 2 is left to clap for usage errors.
    pub fn exit_status(self) -> i32 {
        match self {
            Self::E001Failure => 1,
            Self::E003MalformedRecord => 3,
            Self::E004CorruptTree => 4,
            Self::E005BoundaryNotFound => 5,
            Self::E006OracleUnavailable => 6,
            Self::E007BackupFailed => 7,
            Self::E008LogChanged => 8,
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<DecantError>())
            .map(DecantError::code)
            .unwrap_or(Self::E001Failure)
    }
}
