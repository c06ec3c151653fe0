//! The structural rewrite: drop the head of the main line (and every branch
//! hanging from it), put a summary record in its place, and re-root the
//! boundary under that summary.

use crate::decant::record::{
    KEY_ID, KEY_LEAF, KEY_PARENT, KEY_SIDECHAIN, KEY_TYPE, Record, RecordKind,
};
use crate::decant::tree::ConversationTree;
use crate::error::DecantError;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use uuid::Uuid;

const METADATA_KEYS: [&str; 4] = ["cwd", "sessionId", "version", "gitBranch"];
const DEFAULT_USER_TYPE: &str = "external";

/// Text and identity of the summary record to inject.
#[derive(Debug, Clone)]
pub struct SummarySeed {
    pub text: String,
    pub id: String,
    pub timestamp: String,
}

impl SummarySeed {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpliceStats {
    pub head_main_line: usize,
    pub dropped_branch: usize,
    pub dropped_structural: usize,
    pub kept_main_line: usize,
    pub kept_branch: usize,
    pub kept_structural: usize,
    pub preserved_foreign: usize,
}

impl SpliceStats {
    pub fn dropped(&self) -> usize {
        self.head_main_line + self.dropped_branch + self.dropped_structural
    }
}

#[derive(Debug, Clone)]
pub struct SplicePlan {
    /// Output records in write order.
    pub records: Vec<Record>,
    /// `None` for the identity plan.
    pub summary_id: Option<String>,
    pub boundary_id: Option<String>,
    /// Last main-line record of the dropped head.
    pub head_leaf_id: Option<String>,
    pub stats: SpliceStats,
}

/// The plan that keeps everything.
pub fn identity(tree: &ConversationTree) -> SplicePlan {
    let mut stats = SpliceStats::default();
    for record in tree.records() {
        if record.id.is_none() {
            stats.kept_structural += 1;
        }
    }
    for idx in 0..tree.node_count() {
        if !tree.is_active(idx) {
            stats.preserved_foreign += 1;
        } else if tree.node(idx).on_main_line {
            stats.kept_main_line += 1;
        } else {
            stats.kept_branch += 1;
        }
    }
    SplicePlan {
        records: tree.records().to_vec(),
        summary_id: None,
        boundary_id: None,
        head_leaf_id: None,
        stats,
    }
}

/// Summary record in the host's native compaction shape, rooted at null.
pub fn build_summary_record(
    tree: &ConversationTree,
    head_leaf_id: &str,
    seed: &SummarySeed,
) -> Result<Record, DecantError> {
    let metadata = tree.session_metadata_record();
    let meta = |key: &str| metadata.and_then(|r| r.payload().get(key)).cloned();

    let mut payload = Map::new();
    payload.insert(KEY_PARENT.to_string(), Value::Null);
    payload.insert(KEY_SIDECHAIN.to_string(), Value::Bool(false));
    payload.insert(
        "userType".to_string(),
        meta("userType").unwrap_or_else(|| Value::String(DEFAULT_USER_TYPE.to_string())),
    );
    for key in METADATA_KEYS {
        if let Some(value) = meta(key) {
            payload.insert(key.to_string(), value);
        }
    }
    payload.insert(KEY_TYPE.to_string(), Value::String("summary".to_string()));
    payload.insert("summary".to_string(), Value::String(seed.text.clone()));
    payload.insert(KEY_LEAF.to_string(), Value::String(head_leaf_id.to_string()));
    payload.insert(KEY_ID.to_string(), Value::String(seed.id.clone()));
    payload.insert("timestamp".to_string(), Value::String(seed.timestamp.clone()));
    Record::synthesized(payload)
}

/// Rewrite the log so `boundary` becomes the first kept main-line record.
pub fn splice(
    tree: &ConversationTree,
    boundary: usize,
    seed: &SummarySeed,
) -> Result<SplicePlan, DecantError> {
    let position = tree.main_line_position(boundary).ok_or_else(|| {
        DecantError::BoundaryNotFound(format!(
            "record `{}` is not on the main line",
            tree.id(boundary)
        ))
    })?;
    if position == 0 {
        return Ok(identity(tree));
    }

    let head_leaf = tree.main_line()[position - 1];
    let head_leaf_id = tree.id(head_leaf).to_string();
    let boundary_id = tree.id(boundary).to_string();
    if boundary_id == seed.id {
        return Err(DecantError::corrupt(
            &boundary_id,
            "summary id collides with the boundary record",
        ));
    }

    let tail: HashSet<usize> = tree.descendants(boundary).into_iter().collect();
    let mut stats = SpliceStats::default();
    let mut dropped_ids: HashSet<&str> = HashSet::new();
    let mut kept_ids: HashSet<&str> = HashSet::new();
    for idx in 0..tree.node_count() {
        let node = tree.node(idx);
        let id = tree.id(idx);
        if !tree.is_active(idx) {
            stats.preserved_foreign += 1;
            kept_ids.insert(id);
        } else if tail.contains(&idx) {
            if node.on_main_line {
                stats.kept_main_line += 1;
            } else {
                stats.kept_branch += 1;
            }
            kept_ids.insert(id);
        } else {
            if node.on_main_line {
                stats.head_main_line += 1;
            } else {
                stats.dropped_branch += 1;
            }
            dropped_ids.insert(id);
        }
    }
    if kept_ids.contains(seed.id.as_str()) {
        return Err(DecantError::corrupt(
            &seed.id,
            "summary id collides with an existing record",
        ));
    }

    let mut records = Vec::with_capacity(kept_ids.len() + 1);
    records.push(build_summary_record(tree, &head_leaf_id, seed)?);
    for record in tree.records() {
        let keep = match record.id.as_deref() {
            Some(id) => kept_ids.contains(id),
            None => {
                let linked_to_head = record
                    .message_id()
                    .is_some_and(|m| dropped_ids.contains(m));
                if linked_to_head {
                    stats.dropped_structural += 1;
                } else {
                    stats.kept_structural += 1;
                }
                !linked_to_head
            }
        };
        if !keep {
            continue;
        }
        let mut record = record.clone();
        if record.id.as_deref() == Some(boundary_id.as_str()) {
            record.set_parent_id(Some(&seed.id));
        }
        records.push(record);
    }

    let records = verify_replay(records, &seed.id)?;
    Ok(SplicePlan {
        records,
        summary_id: Some(seed.id.clone()),
        boundary_id: Some(boundary_id),
        head_leaf_id: Some(head_leaf_id),
        stats,
    })
}

/// Replay the output through the tree builder; the summary must come out as
/// the root of the active conversation.
fn verify_replay(records: Vec<Record>, summary_id: &str) -> Result<Vec<Record>, DecantError> {
    let replay = ConversationTree::build(records)?;
    let root = replay.root().ok_or_else(|| {
        DecantError::corrupt(summary_id, "spliced log has no active conversation")
    })?;
    if replay.id(root) != summary_id || replay.record(root).kind != RecordKind::Summary {
        return Err(DecantError::corrupt(
            replay.id(root),
            format!("spliced log is rooted here instead of at summary `{summary_id}`"),
        ));
    }
    Ok(replay.into_records())
}
