//! Conversation forest built from `uuid` / `parentUuid` links.
//!
//! Nodes live in an arena indexed by position; parents always precede their
//! children in the log, so a single forward pass links everything.

use crate::decant::record::Record;
use crate::error::DecantError;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct Node {
    pub record_index: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Node index of the forest root this node hangs from.
    pub component: usize,
    pub on_main_line: bool,
    /// Nearest main-line ancestor for side-branch nodes of the active
    /// conversation.
    pub attachment: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ConversationTree {
    records: Vec<Record>,
    nodes: Vec<Node>,
    by_id: HashMap<String, usize>,
    main_line: Vec<usize>,
}

fn record_id(record: &Record) -> &str {
    record.id.as_deref().unwrap_or_default()
}

/// Explain why `parent` is not linkable from the record at `start`: either
/// the parent chain loops, or the parent simply shows up later (or never).
fn unresolved_parent_error(
    records: &[Record],
    positions: &HashMap<&str, usize>,
    start: usize,
) -> DecantError {
    let record = &records[start];
    let id = record_id(record);
    let parent = record.parent_id.as_deref().unwrap_or_default();

    let mut seen = HashSet::new();
    let mut cursor = Some(start);
    while let Some(pos) = cursor {
        if !seen.insert(pos) {
            return DecantError::corrupt(
                id,
                format!("cycle in parentUuid links starting at line {}", record.line),
            );
        }
        cursor = records[pos]
            .parent_id
            .as_deref()
            .and_then(|p| positions.get(p).copied());
    }

    match positions.get(parent) {
        Some(&later) => DecantError::corrupt(
            id,
            format!(
                "parentUuid `{parent}` at line {} refers forward to line {}",
                record.line, records[later].line
            ),
        ),
        None => DecantError::corrupt(
            id,
            format!(
                "parentUuid `{parent}` at line {} does not exist in the log",
                record.line
            ),
        ),
    }
}

fn pick_leaf(records: &[Record], nodes: &[Node]) -> Option<usize> {
    let candidates = || {
        nodes
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, node)| !records[node.record_index].is_side_branch)
    };
    candidates()
        .find(|(_, node)| records[node.record_index].kind.is_conversational())
        .or_else(|| candidates().next())
        .map(|(idx, _)| idx)
}

impl ConversationTree {
    pub fn build(records: Vec<Record>) -> Result<Self, DecantError> {
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (pos, record) in records.iter().enumerate() {
            let Some(id) = record.id.as_deref() else {
                continue;
            };
            if let Some(&first) = positions.get(id) {
                return Err(DecantError::corrupt(
                    id,
                    format!(
                        "duplicate uuid on lines {} and {}",
                        records[first].line, record.line
                    ),
                ));
            }
            positions.insert(id, pos);
        }

        let mut nodes: Vec<Node> = Vec::with_capacity(positions.len());
        let mut by_id: HashMap<String, usize> = HashMap::with_capacity(positions.len());
        for (pos, record) in records.iter().enumerate() {
            let Some(id) = record.id.as_deref() else {
                continue;
            };
            let parent = match record.parent_id.as_deref() {
                None => None,
                Some(parent) if parent == id => {
                    return Err(DecantError::corrupt(
                        id,
                        format!("record at line {} is its own parent", record.line),
                    ));
                }
                Some(parent) => match by_id.get(parent) {
                    Some(&parent_idx) => Some(parent_idx),
                    None => return Err(unresolved_parent_error(&records, &positions, pos)),
                },
            };

            let idx = nodes.len();
            let component = parent.map_or(idx, |p| nodes[p].component);
            if let Some(p) = parent {
                nodes[p].children.push(idx);
            }
            nodes.push(Node {
                record_index: pos,
                parent,
                children: Vec::new(),
                component,
                on_main_line: false,
                attachment: None,
            });
            by_id.insert(id.to_string(), idx);
        }
        drop(positions);

        let mut main_line = Vec::new();
        if let Some(leaf) = pick_leaf(&records, &nodes) {
            let mut cursor = Some(leaf);
            while let Some(idx) = cursor {
                // Links only point backwards, so this walk cannot loop.
                nodes[idx].on_main_line = true;
                main_line.push(idx);
                cursor = nodes[idx].parent;
            }
            main_line.reverse();

            let active = nodes[leaf].component;
            for idx in 0..nodes.len() {
                if nodes[idx].on_main_line || nodes[idx].component != active {
                    continue;
                }
                let attachment = nodes[idx].parent.and_then(|p| {
                    if nodes[p].on_main_line {
                        Some(p)
                    } else {
                        nodes[p].attachment
                    }
                });
                nodes[idx].attachment = attachment;
            }
        }

        Ok(Self {
            records,
            nodes,
            by_id,
            main_line,
        })
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    pub fn record(&self, idx: usize) -> &Record {
        &self.records[self.nodes[idx].record_index]
    }

    pub fn id(&self, idx: usize) -> &str {
        record_id(self.record(idx))
    }

    pub fn lookup(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    /// Main line from root to leaf, as node indices.
    pub fn main_line(&self) -> &[usize] {
        &self.main_line
    }

    pub fn root(&self) -> Option<usize> {
        self.main_line.first().copied()
    }

    pub fn leaf(&self) -> Option<usize> {
        self.main_line.last().copied()
    }

    pub fn main_line_position(&self, idx: usize) -> Option<usize> {
        if !self.nodes[idx].on_main_line {
            return None;
        }
        self.main_line.iter().position(|&n| n == idx)
    }

    pub fn active_component(&self) -> Option<usize> {
        self.leaf().map(|leaf| self.nodes[leaf].component)
    }

    pub fn is_active(&self, idx: usize) -> bool {
        self.active_component() == Some(self.nodes[idx].component)
    }

    /// `idx` and everything below it, breadth-first.
    pub fn descendants(&self, idx: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([idx]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            out.push(current);
            queue.extend(self.nodes[current].children.iter().copied());
        }
        out
    }

    /// First record carrying session metadata (`sessionId`).
    pub fn session_metadata_record(&self) -> Option<&Record> {
        self.records
            .iter()
            .find(|record| record.field_str("sessionId").is_some_and(|s| !s.is_empty()))
    }
}
