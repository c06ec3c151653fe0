use crate::decant::record::{Record, RecordKind};
use crate::decant::tree::ConversationTree;
use crate::decant::util::{keep_head_and_tail, prefix_chars};
use serde::Serialize;
use serde_json::Value;

const BOUNDARY_TRUNCATION_MARKER: &str = "\n\n... [middle section truncated due to length] ...\n\n";
const SUMMARY_TRUNCATION_MARKER: &str = "\n\n... [middle section truncated] ...\n\n";
const MAX_BASH_PREVIEW_CHARS: usize = 120;
const MAX_RESULT_PREVIEW_CHARS: usize = 150;

/// A user prompt or assistant text reply on the main line.
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    pub id: String,
    pub role: String,
    pub text: String,
    pub line: usize,
}

fn content(record: &Record) -> Option<&Value> {
    record
        .payload()
        .get("message")
        .and_then(|m| m.get("content"))
}

pub const PREVIOUS_SUMMARY_ROLE: &str = "previous summary";

/// Text of an earlier decant's summary record.
fn summary_text(record: &Record) -> Option<String> {
    if record.kind != RecordKind::Summary {
        return None;
    }
    let text = record.field_str("summary")?.trim();
    if text.is_empty() { None } else { Some(text.to_string()) }
}

fn role(record: &Record) -> String {
    record
        .payload()
        .get("message")
        .and_then(|m| m.get("role"))
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .unwrap_or(record.kind.label())
        .to_string()
}

fn block_type(block: &Value) -> Option<&str> {
    block.get("type").and_then(Value::as_str)
}

fn has_tool_result(blocks: &[Value]) -> bool {
    blocks
        .iter()
        .any(|b| block_type(b) == Some("tool_result"))
}

/// Conversational text of a record, if it has any. Tool results are not
/// conversation.
pub fn exchange_text(record: &Record) -> Option<String> {
    if !record.kind.is_conversational() {
        return None;
    }
    let text = match content(record)? {
        Value::String(s) => s.trim().to_string(),
        Value::Array(blocks) => {
            if has_tool_result(blocks) {
                return None;
            }
            blocks
                .iter()
                .filter(|b| block_type(b) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        }
        _ => return None,
    };
    if text.is_empty() { None } else { Some(text) }
}

/// A user turn is a user record that carries a prompt, not a tool result.
pub fn is_user_turn(record: &Record) -> bool {
    record.kind == RecordKind::User && exchange_text(record).is_some()
}

fn to_exchange(record: &Record) -> Option<Exchange> {
    let text = exchange_text(record)?;
    Some(Exchange {
        id: record.id.clone()?,
        role: role(record),
        text,
        line: record.line,
    })
}

pub fn exchanges(tree: &ConversationTree) -> Vec<Exchange> {
    tree.main_line()
        .iter()
        .filter_map(|&n| to_exchange(tree.record(n)))
        .collect()
}

/// Exchanges strictly before `boundary` on the main line, including the
/// summary left by an earlier decant.
pub fn head_exchanges(tree: &ConversationTree, boundary: usize) -> Vec<Exchange> {
    tree.main_line()
        .iter()
        .take_while(|&&n| n != boundary)
        .filter_map(|&n| {
            let record = tree.record(n);
            match summary_text(record) {
                Some(text) => Some(Exchange {
                    id: record.id.clone()?,
                    role: PREVIOUS_SUMMARY_ROLE.to_string(),
                    text,
                    line: record.line,
                }),
                None => to_exchange(record),
            }
        })
        .collect()
}

/// Labelled transcript the topic oracle answers against.
pub fn boundary_transcript(exchanges: &[Exchange], max_chars: usize) -> String {
    let full = exchanges
        .iter()
        .map(|ex| format!("[MSG uuid={}] {}: {}", ex.id, ex.role.to_uppercase(), ex.text))
        .collect::<Vec<_>>()
        .join("\n\n");
    keep_head_and_tail(&full, max_chars, BOUNDARY_TRUNCATION_MARKER)
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("?")
}

fn render_tool_use(block: &Value) -> String {
    let name = str_field(block, "name");
    let input = block.get("input").unwrap_or(&Value::Null);
    match name {
        "Bash" => format!(
            "  [Bash: {}]",
            prefix_chars(str_field(input, "command"), MAX_BASH_PREVIEW_CHARS)
        ),
        "Read" | "Write" | "Edit" => format!("  [{name}: {}]", str_field(input, "file_path")),
        "Grep" | "Glob" => format!("  [{name}: {}]", str_field(input, "pattern")),
        "Task" => format!("  [Task: {}]", str_field(input, "description")),
        _ => format!("  [{name}]"),
    }
}

fn render_tool_result(block: &Value) -> String {
    let is_error = block
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let preview = match block.get("content") {
        Some(Value::String(s)) => prefix_chars(s, MAX_RESULT_PREVIEW_CHARS).to_string(),
        Some(other) => prefix_chars(&other.to_string(), MAX_RESULT_PREVIEW_CHARS).to_string(),
        None => String::new(),
    };
    let tag = if is_error { "result(ERR)" } else { "result" };
    format!("  [{tag}: {preview}...]")
}

/// Detailed rendering for summarization: text, abbreviated tool calls and
/// results; thinking is left out.
pub fn render_detail(record: &Record) -> Option<String> {
    if let Some(text) = summary_text(record) {
        return Some(format!("[PREVIOUS SUMMARY]: {text}"));
    }
    if !record.kind.is_conversational() {
        return None;
    }
    let label = role(record).to_uppercase();
    match content(record)? {
        Value::String(s) if !s.trim().is_empty() => Some(format!("[{label}]: {s}")),
        Value::Array(blocks) => {
            let parts = blocks
                .iter()
                .filter_map(|block| match block_type(block) {
                    Some("text") => block.get("text").and_then(Value::as_str).map(str::to_string),
                    Some("tool_use") => Some(render_tool_use(block)),
                    Some("tool_result") => Some(render_tool_result(block)),
                    _ => None,
                })
                .collect::<Vec<_>>();
            if parts.is_empty() {
                None
            } else {
                Some(format!("[{label}]: {}", parts.join("\n")))
            }
        }
        _ => None,
    }
}

/// Transcript of the main-line head (everything before `boundary`).
pub fn head_transcript(tree: &ConversationTree, boundary: usize, max_chars: usize) -> String {
    let full = tree
        .main_line()
        .iter()
        .take_while(|&&n| n != boundary)
        .filter_map(|&n| render_detail(tree.record(n)))
        .collect::<Vec<_>>()
        .join("\n\n");
    keep_head_and_tail(&full, max_chars, SUMMARY_TRUNCATION_MARKER)
}

#[cfg(test)]
mod tests {
    use super::{
        boundary_transcript, exchange_text, exchanges, head_exchanges, head_transcript,
        is_user_turn, render_detail,
    };
    use crate::decant::record::{Record, parse_log};
    use crate::decant::tree::ConversationTree;
    use crate::decant::tree::fixtures::scenario;

    fn record(raw: &str) -> Record {
        Record::parse_line(1, raw).expect("parse")
    }

    #[test]
    fn tool_results_are_not_user_turns() {
        let prompt = record(r#"{"type":"user","uuid":"u","message":{"role":"user","content":"  fix it  "}}"#);
        let result = record(
            r#"{"type":"user","uuid":"r","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t","content":"ok"}]}}"#,
        );
        assert_eq!(exchange_text(&prompt).as_deref(), Some("fix it"));
        assert!(is_user_turn(&prompt));
        assert!(!is_user_turn(&result));
    }

    #[test]
    fn assistant_text_blocks_are_joined_and_thinking_skipped() {
        let reply = record(
            r#"{"type":"assistant","uuid":"a","message":{"role":"assistant","content":[{"type":"thinking","thinking":"hmm"},{"type":"text","text":"one"},{"type":"tool_use","name":"Bash","input":{"command":"ls"}},{"type":"text","text":"two"}]}}"#,
        );
        assert_eq!(exchange_text(&reply).as_deref(), Some("one\ntwo"));
        assert!(!is_user_turn(&reply));
    }

    #[test]
    fn detail_abbreviates_tools() {
        let reply = record(
            r#"{"type":"assistant","uuid":"a","message":{"role":"assistant","content":[{"type":"text","text":"checking"},{"type":"tool_use","name":"Read","input":{"file_path":"/src/main.rs"}},{"type":"tool_use","name":"WebFetch","input":{}}]}}"#,
        );
        let rendered = render_detail(&reply).expect("rendered");
        assert_eq!(rendered, "[ASSISTANT]: checking\n  [Read: /src/main.rs]\n  [WebFetch]");

        let result = record(
            r#"{"type":"user","uuid":"r","message":{"role":"user","content":[{"type":"tool_result","is_error":true,"content":"boom"}]}}"#,
        );
        assert_eq!(render_detail(&result).as_deref(), Some("[USER]:   [result(ERR): boom...]"));
    }

    #[test]
    fn boundary_transcript_labels_ids_and_truncates_middle() {
        let tree = ConversationTree::build(scenario()).expect("build");
        let all = exchanges(&tree);
        assert_eq!(all.len(), 6);
        let transcript = boundary_transcript(&all, 100_000);
        assert!(transcript.starts_with("[MSG uuid=root] USER: text of root"));
        assert!(transcript.contains("[MSG uuid=a1] ASSISTANT: reply a1"));
        assert!(!transcript.contains("s1"));

        let short = boundary_transcript(&all, 60);
        assert!(short.contains("middle section truncated"));
        assert!(short.starts_with("[MSG uuid=root]"));
        assert!(short.ends_with("text of u3"));
    }

    #[test]
    fn head_transcript_stops_at_boundary() {
        let tree = ConversationTree::build(scenario()).expect("build");
        let u2 = tree.lookup("u2").expect("u2");
        let head = head_transcript(&tree, u2, 200_000);
        assert!(head.contains("[USER]: text of u1"));
        assert!(head.contains("[ASSISTANT]: reply a1"));
        assert!(!head.contains("u2"));
    }

    #[test]
    fn earlier_summary_is_carried_into_the_next_head() {
        let log = concat!(
            "{\"parentUuid\":null,\"type\":\"summary\",\"summary\":\"PRIOR WORK: parser rewritten\",\"leafUuid\":\"old\",\"uuid\":\"sum0\"}\n",
            "{\"parentUuid\":\"sum0\",\"type\":\"user\",\"message\":{\"role\":\"user\",\"content\":\"next task\"},\"uuid\":\"u1\"}\n",
            "{\"parentUuid\":\"u1\",\"type\":\"assistant\",\"message\":{\"role\":\"assistant\",\"content\":[{\"type\":\"text\",\"text\":\"done\"}]},\"uuid\":\"a1\"}\n",
            "{\"parentUuid\":\"a1\",\"type\":\"user\",\"message\":{\"role\":\"user\",\"content\":\"and then\"},\"uuid\":\"u2\"}\n",
        );
        let tree = ConversationTree::build(parse_log(log.as_bytes()).expect("parse")).expect("build");
        let u2 = tree.lookup("u2").expect("u2");

        let head = head_transcript(&tree, u2, 200_000);
        assert!(head.starts_with("[PREVIOUS SUMMARY]: PRIOR WORK: parser rewritten"));
        assert!(head.contains("[USER]: next task"));

        let head = head_exchanges(&tree, u2);
        assert_eq!(head.len(), 3);
        assert_eq!(head[0].role, "previous summary");
        assert_eq!(head[0].id, "sum0");

        // Only the head gains the summary; topic search still sees prompts and replies.
        assert_eq!(exchanges(&tree).len(), 3);
    }
}
