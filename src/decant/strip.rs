//! Optional noise reduction before compaction.
//!
//! Every pass keeps `uuid` and `parentUuid` intact and only rewrites a
//! record when the rewrite is actually smaller.

use crate::decant::record::Record;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

const TOOL_OUTPUT_MAX_BYTES: usize = 8_192;
const TOOL_OUTPUT_MAX_LINES: usize = 100;
const INNER_METADATA: [&str; 3] = ["usage", "stop_reason", "stop_sequence"];
const OUTER_METADATA: [&str; 3] = ["costUSD", "duration", "apiDuration"];

pub const PROGRESS_COLLAPSE: &str = "progress-collapse";
pub const THINKING_STRIP: &str = "thinking-strip";
pub const METADATA_STRIP: &str = "metadata-strip";
pub const TOOL_OUTPUT_TRIM: &str = "tool-output-trim";

#[derive(Debug, Clone, Default, Serialize)]
pub struct StripStats {
    pub original_count: usize,
    pub final_count: usize,
    pub original_bytes: u64,
    pub saved_bytes: u64,
    /// Bytes saved per pass.
    pub breakdown: BTreeMap<&'static str, u64>,
}

fn compact_len(payload: &Map<String, Value>) -> u64 {
    serde_json::to_string(payload).map_or(0, |s| s.len() as u64)
}

/// Apply `edit` to a copy of the payload and keep it when it shrinks.
fn rewrite(record: &mut Record, edit: impl FnOnce(&mut Map<String, Value>) -> bool) -> u64 {
    let mut payload = record.payload().clone();
    if !edit(&mut payload) {
        return 0;
    }
    let before = compact_len(record.payload());
    let after = compact_len(&payload);
    if after >= before {
        return 0;
    }
    record.replace_payload(payload);
    before - after
}

fn content_blocks(payload: &mut Map<String, Value>) -> Option<&mut Vec<Value>> {
    payload
        .get_mut("message")?
        .get_mut("content")?
        .as_array_mut()
}

fn collapse_progress(records: Vec<Record>) -> (Vec<Record>, u64) {
    let referenced: HashSet<String> = records
        .iter()
        .filter_map(|r| r.parent_id.clone())
        .collect();
    let is_progress = |r: &Record| r.type_name() == Some("progress");

    let mut saved = 0;
    let mut out = Vec::with_capacity(records.len());
    let mut iter = records.into_iter().peekable();
    while let Some(record) = iter.next() {
        let superseded = is_progress(&record) && iter.peek().is_some_and(is_progress);
        let needed = record.id.as_ref().is_some_and(|id| referenced.contains(id));
        if superseded && !needed {
            saved += record.serialized_len() as u64;
            continue;
        }
        out.push(record);
    }
    (out, saved)
}

fn strip_thinking(payload: &mut Map<String, Value>) -> bool {
    if payload.get("type").and_then(Value::as_str) != Some("assistant") {
        return false;
    }
    let Some(blocks) = content_blocks(payload) else {
        return false;
    };
    let before = blocks.len();
    blocks.retain(|b| b.get("type").and_then(Value::as_str) != Some("thinking"));
    let mut changed = blocks.len() != before;
    for block in blocks.iter_mut() {
        if let Some(obj) = block.as_object_mut() {
            changed |= obj.remove("signature").is_some();
        }
    }
    changed
}

fn strip_metadata(payload: &mut Map<String, Value>) -> bool {
    let mut changed = false;
    if let Some(message) = payload.get_mut("message").and_then(Value::as_object_mut) {
        for key in INNER_METADATA {
            changed |= message.remove(key).is_some();
        }
    }
    for key in OUTER_METADATA {
        changed |= payload.remove(key).is_some();
    }
    changed
}

fn floor_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Shortened tool output, or `None` when it is within limits.
pub fn trim_tool_output(content: &str) -> Option<String> {
    let lines: Vec<&str> = content.split('\n').collect();
    if lines.len() > TOOL_OUTPUT_MAX_LINES {
        let keep = TOOL_OUTPUT_MAX_LINES / 2;
        let trimmed = lines.len() - TOOL_OUTPUT_MAX_LINES;
        return Some(format!(
            "{}\n\n... [{trimmed} lines trimmed] ...\n\n{}",
            lines[..keep].join("\n"),
            lines[lines.len() - keep..].join("\n")
        ));
    }
    if content.len() > TOOL_OUTPUT_MAX_BYTES {
        let half = TOOL_OUTPUT_MAX_BYTES / 2;
        let head_end = floor_boundary(content, half);
        let tail_start = ceil_boundary(content, content.len() - half);
        let trimmed = content.len() - TOOL_OUTPUT_MAX_BYTES;
        return Some(format!(
            "{}\n... [{trimmed} bytes trimmed] ...\n{}",
            &content[..head_end],
            &content[tail_start..]
        ));
    }
    None
}

fn trim_tool_results(payload: &mut Map<String, Value>) -> bool {
    let Some(blocks) = content_blocks(payload) else {
        return false;
    };
    let mut changed = false;
    for block in blocks.iter_mut() {
        if block.get("type").and_then(Value::as_str) != Some("tool_result") {
            continue;
        }
        let Some(Value::String(content)) = block.get("content") else {
            continue;
        };
        if let Some(shorter) = trim_tool_output(content) {
            block["content"] = Value::String(shorter);
            changed = true;
        }
    }
    changed
}

fn apply_pass(
    records: &mut [Record],
    edit: fn(&mut Map<String, Value>) -> bool,
) -> u64 {
    records.iter_mut().map(|r| rewrite(r, edit)).sum()
}

pub fn strip_records(records: Vec<Record>) -> (Vec<Record>, StripStats) {
    let mut stats = StripStats {
        original_count: records.len(),
        original_bytes: records.iter().map(|r| r.serialized_len() as u64).sum(),
        ..StripStats::default()
    };

    let (mut records, saved) = collapse_progress(records);
    stats.breakdown.insert(PROGRESS_COLLAPSE, saved);
    stats
        .breakdown
        .insert(THINKING_STRIP, apply_pass(&mut records, strip_thinking));
    stats
        .breakdown
        .insert(METADATA_STRIP, apply_pass(&mut records, strip_metadata));
    stats
        .breakdown
        .insert(TOOL_OUTPUT_TRIM, apply_pass(&mut records, trim_tool_results));

    stats.final_count = records.len();
    stats.saved_bytes = stats.breakdown.values().sum();
    (records, stats)
}
