//! Session log records.
//!
//! A log is one JSON object per line. Each line is kept verbatim next to its
//! parsed form so that records nobody touched are written back byte-for-byte.

use crate::error::DecantError;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

pub const KEY_ID: &str = "uuid";
pub const KEY_PARENT: &str = "parentUuid";
pub const KEY_TYPE: &str = "type";
pub const KEY_SIDECHAIN: &str = "isSidechain";
pub const KEY_LEAF: &str = "leafUuid";
pub const KEY_MESSAGE_ID: &str = "messageId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    User,
    Assistant,
    Summary,
    System,
    Other,
}

impl RecordKind {
    fn from_type(raw: Option<&str>) -> Self {
        match raw {
            Some("user") => Self::User,
            Some("assistant") => Self::Assistant,
            Some("summary") => Self::Summary,
            Some("system") => Self::System,
            _ => Self::Other,
        }
    }

    pub fn is_conversational(self) -> bool {
        matches!(self, Self::User | Self::Assistant)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Summary => "summary",
            Self::System => "system",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Record {
    /// 1-based physical line in the source file; 0 for synthesized records.
    pub line: usize,
    pub id: Option<String>,
    pub parent_id: Option<String>,
    pub kind: RecordKind,
    pub is_side_branch: bool,
    payload: Map<String, Value>,
    raw: Option<String>,
}

fn malformed(line: usize, reason: impl Into<String>) -> DecantError {
    DecantError::MalformedRecord {
        line,
        reason: reason.into(),
    }
}

fn optional_id(
    payload: &Map<String, Value>,
    key: &str,
    line: usize,
) -> Result<Option<String>, DecantError> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(malformed(
            line,
            format!("`{key}` must be a string or null, found {}", json_type_name(other)),
        )),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Record {
    fn from_payload(
        line: usize,
        payload: Map<String, Value>,
        raw: Option<String>,
    ) -> Result<Self, DecantError> {
        let id = optional_id(&payload, KEY_ID, line)?;
        let parent_id = optional_id(&payload, KEY_PARENT, line)?;
        let kind = RecordKind::from_type(payload.get(KEY_TYPE).and_then(Value::as_str));
        let is_side_branch = match payload.get(KEY_SIDECHAIN) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(malformed(
                    line,
                    format!(
                        "`{KEY_SIDECHAIN}` must be a boolean, found {}",
                        json_type_name(other)
                    ),
                ));
            }
        };
        Ok(Self {
            line,
            id,
            parent_id,
            kind,
            is_side_branch,
            payload,
            raw,
        })
    }

    /// Parse one non-blank line of a log.
    pub fn parse_line(line: usize, raw: &str) -> Result<Self, DecantError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|err| malformed(line, err.to_string()))?;
        match value {
            Value::Object(payload) => Self::from_payload(line, payload, Some(raw.to_string())),
            other => Err(malformed(
                line,
                format!("expected a JSON object, found {}", json_type_name(&other)),
            )),
        }
    }

    /// A record created by decant itself; it has no source line.
    pub fn synthesized(payload: Map<String, Value>) -> Result<Self, DecantError> {
        Self::from_payload(0, payload, None)
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Mutable access to the payload. The record is re-serialized on write
    /// from then on.
    pub fn payload_mut(&mut self) -> &mut Map<String, Value> {
        self.raw = None;
        &mut self.payload
    }

    pub fn replace_payload(&mut self, payload: Map<String, Value>) {
        self.raw = None;
        self.payload = payload;
    }

    pub fn is_modified(&self) -> bool {
        self.raw.is_none()
    }

    pub fn type_name(&self) -> Option<&str> {
        self.payload.get(KEY_TYPE).and_then(Value::as_str)
    }

    pub fn message_id(&self) -> Option<&str> {
        self.payload
            .get(KEY_MESSAGE_ID)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Rewrite `parentUuid`, the one linkage field decant may change.
    pub fn set_parent_id(&mut self, parent: Option<&str>) {
        let value = parent.map_or(Value::Null, |p| Value::String(p.to_string()));
        self.payload_mut().insert(KEY_PARENT.to_string(), value);
        self.parent_id = parent.map(ToOwned::to_owned);
    }

    /// The line to write back: the original text when untouched, compact
    /// JSON with the original key order otherwise.
    pub fn to_line(&self) -> Result<Cow<'_, str>> {
        match &self.raw {
            Some(raw) => Ok(Cow::Borrowed(raw.as_str())),
            None => Ok(Cow::Owned(
                serde_json::to_string(&self.payload).context("failed to serialize record")?,
            )),
        }
    }

    pub fn serialized_len(&self) -> usize {
        match &self.raw {
            Some(raw) => raw.len(),
            None => serde_json::to_string(&self.payload).map_or(0, |s| s.len()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedLog {
    pub path: PathBuf,
    pub byte_len: u64,
    pub content_hash: String,
    pub records: Vec<Record>,
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Parse a whole log. Any bad line aborts; there is no partial recovery.
pub fn parse_log(bytes: &[u8]) -> Result<Vec<Record>, DecantError> {
    let mut records = Vec::new();
    for (idx, raw_line) in bytes.split(|b| *b == b'\n').enumerate() {
        let line = idx + 1;
        let text = std::str::from_utf8(raw_line)
            .map_err(|err| malformed(line, format!("invalid UTF-8: {err}")))?;
        if text.trim().is_empty() {
            continue;
        }
        records.push(Record::parse_line(line, text)?);
    }
    Ok(records)
}

pub fn load_log(path: &Path) -> Result<LoadedLog> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let records =
        parse_log(&bytes).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(LoadedLog {
        path: path.to_path_buf(),
        byte_len: bytes.len() as u64,
        content_hash: content_hash(&bytes),
        records,
    })
}
