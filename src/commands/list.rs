use anyhow::{Context, Result};
use std::env;

use crate::commands::CommandReport;
use crate::decant::paths::resolve_paths;
use crate::decant::sessions::{ProjectFilter, SessionInfo, cwd_project_dir_name, list_sessions};
use crate::decant::util::{format_bytes, prefix_chars, truncate_with_ellipsis};

const SUMMARY_CHARS: usize = 60;

fn describe(session: &SessionInfo) -> String {
    let summary = [&session.summary, &session.first_prompt]
        .into_iter()
        .find(|s| !s.trim().is_empty())
        .map_or_else(
            || "(no summary)".to_string(),
            |s| truncate_with_ellipsis(s, SUMMARY_CHARS),
        );
    let modified = if session.modified.is_empty() {
        "?"
    } else {
        prefix_chars(&session.modified, 10)
    };
    let project = if session.project_path.is_empty() {
        &session.project
    } else {
        &session.project_path
    };
    format!(
        "session={} size={} modified={modified} project={project} summary={summary}",
        session.session_id,
        format_bytes(session.size_bytes),
    )
}

pub fn run(all: bool, project: Option<&str>) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("list");
    report.detail(format!("projects_dir={}", paths.projects_dir.display()));

    let cwd_dir;
    let filter = match (all, project) {
        (_, Some(needle)) => ProjectFilter::Contains(needle),
        (true, None) => ProjectFilter::All,
        (false, None) => {
            let cwd = env::current_dir().context("failed to read current directory")?;
            cwd_dir = cwd_project_dir_name(&cwd);
            ProjectFilter::Dir(&cwd_dir)
        }
    };

    let sessions = list_sessions(&paths.projects_dir, filter)?;
    report.detail(format!("sessions={}", sessions.len()));
    if sessions.is_empty() && matches!(filter, ProjectFilter::Dir(_)) {
        report.detail("hint=no sessions for this directory; use `decant list --all`");
    }
    for session in &sessions {
        report.detail(describe(session));
    }
    Ok(report)
}
