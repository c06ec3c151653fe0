use anyhow::Result;

use crate::commands::{CommandReport, report_unknown_env};
use crate::decant::config::load_config;
use crate::decant::paths::resolve_paths;
use crate::oracle::providers::resolve_model;

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("decant_home={}", paths.decant_home.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!("config_file={}", paths.config_file.display()));
    report.detail(format!("projects_dir={}", paths.projects_dir.display()));

    match load_config(&paths) {
        Ok(cfg) => {
            report.detail(format!("oracle.model={}", cfg.oracle.model));
            report.detail(format!("oracle.timeout_secs={}", cfg.oracle.timeout_secs));
            report.detail(format!("oracle.max_retries={}", cfg.oracle.max_retries));
            report.detail(format!("oracle.backoff_ms={}", cfg.oracle.backoff_ms));
            report.detail(format!(
                "oracle.summary_max_tokens={}",
                cfg.oracle.summary_max_tokens
            ));
            report.detail(format!(
                "transcript.boundary_max_chars={}",
                cfg.transcript.boundary_max_chars
            ));
            report.detail(format!(
                "transcript.summary_max_chars={}",
                cfg.transcript.summary_max_chars
            ));
            report.detail(format!("write.backup={}", cfg.write.backup));
            if let Err(err) = resolve_model(&cfg.oracle.model) {
                report.issue(format!("default model is not usable: {err}"));
            }
        }
        Err(err) => report.issue(format!("config error: {err:#}")),
    }

    for key in report_unknown_env() {
        report.issue(format!("unknown env var {key}"));
    }
    if !paths.projects_dir.exists() {
        report.issue(format!(
            "missing projects dir ({}); set DECANT_PROJECTS_DIR or CLAUDE_CONFIG_DIR",
            paths.projects_dir.display()
        ));
    }

    Ok(report)
}
