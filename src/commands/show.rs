use anyhow::Result;

use crate::commands::CommandReport;
use crate::decant::paths::resolve_paths;
use crate::decant::record::load_log;
use crate::decant::sessions::find_session;
use crate::decant::transcript::exchanges;
use crate::decant::tree::ConversationTree;
use crate::decant::util::{format_bytes, truncate_with_ellipsis};

const PREVIEW_CHARS: usize = 200;

pub fn run(session: &str, full: bool) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let path = find_session(&paths.projects_dir, session)?;
    let log = load_log(&path)?;
    let mut report = CommandReport::new("show");
    report.detail(format!("session={}", path.display()));
    report.detail(format!("size={}", format_bytes(log.byte_len)));
    report.detail(format!("records={}", log.records.len()));

    let tree = ConversationTree::build(log.records)?;
    let exchanges = exchanges(&tree);
    report.detail(format!("main_line={}", tree.main_line().len()));
    report.detail(format!("exchanges={}", exchanges.len()));

    for (idx, exchange) in exchanges.iter().enumerate() {
        let text = if full {
            exchange.text.clone()
        } else {
            truncate_with_ellipsis(&exchange.text, PREVIEW_CHARS)
        };
        let short_id = exchange.id.get(..8).unwrap_or(&exchange.id);
        report.detail(format!(
            "#{} {} {short_id} line={}: {text}",
            idx + 1,
            exchange.role,
            exchange.line
        ));
    }
    Ok(report)
}
