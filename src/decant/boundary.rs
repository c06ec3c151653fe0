//! Boundary resolution: which main-line record is the first one kept.

use crate::decant::config::TranscriptConfig;
use crate::decant::transcript::{self, is_user_turn};
use crate::decant::tree::ConversationTree;
use crate::error::DecantError;
use crate::oracle::prompts::NOT_FOUND;
use crate::oracle::{BoundaryOracle, TopicQuery};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Split before this main-line node.
    Split { boundary: usize },
    /// Nothing to compact; the log stays as it is.
    NoOp { reason: String },
}

fn ensure_conversation(tree: &ConversationTree) -> Result<(), DecantError> {
    if tree.main_line().is_empty() {
        return Err(DecantError::BoundaryNotFound(
            "the log has no conversation records".to_string(),
        ));
    }
    Ok(())
}

/// Keep the last `count` user turns.
pub fn resolve_by_count(tree: &ConversationTree, count: usize) -> Result<Resolution, DecantError> {
    if count == 0 {
        return Err(DecantError::BoundaryNotFound(
            "--last must keep at least one turn".to_string(),
        ));
    }
    ensure_conversation(tree)?;

    let mut seen = 0usize;
    let mut boundary = None;
    for &node in tree.main_line().iter().rev() {
        if is_user_turn(tree.record(node)) {
            seen += 1;
            if seen == count {
                boundary = Some(node);
                break;
            }
        }
    }

    match boundary {
        None => Ok(Resolution::NoOp {
            reason: format!(
                "requested {count} turns but the conversation only has {seen}; keeping everything"
            ),
        }),
        Some(node) if Some(node) == tree.root() => Ok(Resolution::NoOp {
            reason: format!("the last {count} turns span the whole conversation; keeping everything"),
        }),
        Some(node) => Ok(Resolution::Split { boundary: node }),
    }
}

fn strip_token(token: &str) -> &str {
    token.trim_matches(|c: char| {
        matches!(c, '"' | '\'' | '`' | ',' | '.' | ';' | ':' | '(' | ')' | '[' | ']' | '<' | '>')
    })
}

/// Pull a record id out of a free-text oracle answer. `None` means the oracle
/// said the topic is absent.
pub fn parse_oracle_answer(tree: &ConversationTree, answer: &str) -> Option<String> {
    let trimmed = answer.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NOT_FOUND) {
        return None;
    }
    if tree.lookup(trimmed).is_some() {
        return Some(trimmed.to_string());
    }
    let tokens = trimmed.split_whitespace().map(strip_token);
    for token in tokens.clone() {
        if tree.lookup(token).is_some() {
            return Some(token.to_string());
        }
    }
    // Nothing known; hand back the first token so the error names it.
    tokens
        .filter(|t| !t.is_empty())
        .find(|t| !t.eq_ignore_ascii_case(NOT_FOUND))
        .map(str::to_string)
        .or_else(|| Some(trimmed.to_string()))
}

/// A candidate must exist, sit on the main line, and not be the root.
pub fn validate_candidate(tree: &ConversationTree, id: &str) -> Result<usize, DecantError> {
    let node = tree.lookup(id).ok_or_else(|| {
        DecantError::BoundaryNotFound(format!("oracle returned unknown record id `{id}`"))
    })?;
    if !tree.node(node).on_main_line {
        return Err(DecantError::BoundaryNotFound(format!(
            "oracle returned `{id}` (line {}), which is not on the main line",
            tree.record(node).line
        )));
    }
    if Some(node) == tree.root() {
        return Err(DecantError::BoundaryNotFound(format!(
            "oracle returned the conversation root `{id}`; there is nothing before it to compact"
        )));
    }
    Ok(node)
}

/// Ask the oracle where `topic` starts and validate its answer.
pub fn resolve_by_topic<O: BoundaryOracle + ?Sized>(
    tree: &ConversationTree,
    topic: &str,
    oracle: &O,
    limits: &TranscriptConfig,
) -> Result<Resolution, DecantError> {
    ensure_conversation(tree)?;
    let exchanges = transcript::exchanges(tree);
    if exchanges.is_empty() {
        return Err(DecantError::BoundaryNotFound(
            "the conversation has no text exchanges to search".to_string(),
        ));
    }
    let query = TopicQuery {
        topic: topic.to_string(),
        transcript: transcript::boundary_transcript(&exchanges, limits.boundary_max_chars),
        exchanges,
    };
    let answer = oracle.locate(&query)?;
    let candidate = parse_oracle_answer(tree, &answer).ok_or_else(|| {
        DecantError::BoundaryNotFound(format!("topic `{topic}` not found in the conversation"))
    })?;
    let boundary = validate_candidate(tree, &candidate)?;
    Ok(Resolution::Split { boundary })
}
