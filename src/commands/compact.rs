use anyhow::{Context, Result};

use crate::commands::{CommandReport, report_unknown_env};
use crate::decant::audit;
use crate::decant::boundary::{self, Resolution};
use crate::decant::config::{DecantConfig, load_config};
use crate::decant::paths::{DecantPaths, resolve_paths};
use crate::decant::record::{LoadedLog, load_log};
use crate::decant::sessions::find_session;
use crate::decant::splice::{self, SplicePlan, SummarySeed};
use crate::decant::strip::strip_records;
use crate::decant::transcript::{self, exchange_text};
use crate::decant::tree::ConversationTree;
use crate::decant::util::{format_bytes, truncate_with_ellipsis};
use crate::decant::warn::{self, WarnEvent};
use crate::decant::writer;
use crate::oracle::{Oracle, SummaryQuery, build_oracle};

const DRY_RUN_SUMMARY: &str = "[dry run: summary not generated]";
const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone)]
pub enum Strategy {
    Topic(String),
    Last(usize),
}

impl Strategy {
    fn describe(&self) -> String {
        match self {
            Strategy::Topic(topic) => format!("topic:{topic}"),
            Strategy::Last(count) => format!("last:{count}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompactOptions {
    pub session: String,
    pub strategy: Strategy,
    pub model: Option<String>,
    pub strip: bool,
    pub dry_run: bool,
    pub no_backup: bool,
}

struct Run {
    cfg: DecantConfig,
    model: String,
    oracle: Option<Box<dyn Oracle>>,
    report: CommandReport,
}

impl Run {
    fn oracle(&mut self) -> Result<&dyn Oracle> {
        if self.oracle.is_none() {
            let oracle = build_oracle(&self.model, &self.cfg.oracle)?;
            self.report.detail(format!("oracle={}", oracle.label()));
            self.oracle = Some(oracle);
        }
        self.oracle
            .as_deref()
            .context("oracle was not initialised")
    }

    fn describe_plan(&mut self, tree: &ConversationTree, boundary: usize, plan: &SplicePlan) {
        let record = tree.record(boundary);
        self.report.detail(format!("boundary={}", tree.id(boundary)));
        self.report.detail(format!("boundary_line={}", record.line));
        if let Some(text) = exchange_text(record) {
            self.report.detail(format!(
                "boundary_preview=[{}] {}",
                record.kind.label(),
                truncate_with_ellipsis(&text, PREVIEW_CHARS)
            ));
        }
        if let Some(leaf) = &plan.head_leaf_id {
            self.report.detail(format!("head_leaf={leaf}"));
        }
        if let Some(summary_id) = &plan.summary_id {
            self.report.detail(format!("summary_id={summary_id}"));
        }
        let rewritten = plan.records.iter().filter(|r| r.is_modified()).count();
        self.report.detail(format!("rewritten_records={rewritten}"));
        let stats = &plan.stats;
        self.report.detail(format!("head_main_line={}", stats.head_main_line));
        self.report.detail(format!("dropped_branch={}", stats.dropped_branch));
        self.report.detail(format!("dropped_structural={}", stats.dropped_structural));
        self.report.detail(format!("kept_main_line={}", stats.kept_main_line));
        self.report.detail(format!("kept_branch={}", stats.kept_branch));
        self.report.detail(format!("kept_structural={}", stats.kept_structural));
        if stats.preserved_foreign > 0 {
            self.report
                .detail(format!("preserved_foreign={}", stats.preserved_foreign));
        }
    }
}

fn load(paths: &DecantPaths, opts: &CompactOptions, report: &mut CommandReport) -> Result<LoadedLog> {
    let path = find_session(&paths.projects_dir, &opts.session)?;
    let log = load_log(&path)?;
    report.detail(format!("session={}", path.display()));
    report.detail(format!("size={}", format_bytes(log.byte_len)));
    report.detail(format!("records={}", log.records.len()));
    Ok(log)
}

fn execute(paths: &DecantPaths, opts: &CompactOptions, report: CommandReport) -> Result<CommandReport> {
    let cfg = load_config(paths)?;
    let model = opts.model.clone().unwrap_or_else(|| cfg.oracle.model.clone());
    let mut run = Run {
        cfg,
        model,
        oracle: None,
        report,
    };
    run.report.detail(format!("model={}", run.model));
    run.report.detail(format!("strategy={}", opts.strategy.describe()));

    let log = load(paths, opts, &mut run.report)?;
    let mut records = log.records.clone();
    if opts.strip {
        let (stripped, stats) = strip_records(records);
        records = stripped;
        for (pass, saved) in &stats.breakdown {
            if *saved > 0 {
                run.report.detail(format!("strip.{pass}={}", format_bytes(*saved)));
            }
        }
        run.report.detail(format!(
            "strip_removed_records={}",
            stats.original_count - stats.final_count
        ));
        run.report
            .detail(format!("strip_saved={}", format_bytes(stats.saved_bytes)));
    }

    let tree = ConversationTree::build(records)?;
    let resolution = match &opts.strategy {
        Strategy::Last(count) => boundary::resolve_by_count(&tree, *count)?,
        Strategy::Topic(topic) => {
            let limits = run.cfg.transcript.clone();
            let oracle = run.oracle()?;
            boundary::resolve_by_topic(&tree, topic, oracle, &limits)?
        }
    };

    let boundary = match resolution {
        Resolution::Split { boundary } => boundary,
        Resolution::NoOp { reason } => {
            warn::emit(WarnEvent {
                code: "COMPACT_NO_OP",
                stage: "boundary",
                action: "skip-write",
                session: &opts.session,
                reason: &reason,
                err: "na",
            });
            run.report.detail("result=no-op");
            run.report.detail(format!("reason={reason}"));
            if !opts.dry_run {
                audit::record(paths, "compact", "no-op", &reason);
            }
            return Ok(run.report);
        }
    };

    if opts.dry_run {
        // Model and credential problems must fail the preview like the real run.
        run.oracle()?;
        let plan = splice::splice(&tree, boundary, &SummarySeed::new(DRY_RUN_SUMMARY))?;
        run.describe_plan(&tree, boundary, &plan);
        // Excludes the summary text, which is not generated on a dry run.
        let estimate = writer::render(&plan.records)?.len() - DRY_RUN_SUMMARY.len();
        run.report.detail(format!(
            "size_before={} size_after_estimate={}",
            format_bytes(log.byte_len),
            format_bytes(estimate as u64)
        ));
        run.report.detail("result=dry-run");
        return Ok(run.report);
    }

    let query = SummaryQuery {
        transcript: transcript::head_transcript(
            &tree,
            boundary,
            run.cfg.transcript.summary_max_chars,
        ),
        exchanges: transcript::head_exchanges(&tree, boundary),
        max_tokens: run.cfg.oracle.summary_max_tokens,
    };
    let summary = run.oracle()?.summarize(&query)?;
    run.report.detail(format!("summary_chars={}", summary.chars().count()));

    let plan = splice::splice(&tree, boundary, &SummarySeed::new(summary))?;
    run.describe_plan(&tree, boundary, &plan);

    let backup = run.cfg.write.backup && !opts.no_backup;
    let outcome = writer::commit(&log, &plan.records, backup)?;
    run.report.detail(format!(
        "size_before={} size_after={}",
        format_bytes(outcome.bytes_before),
        format_bytes(outcome.bytes_after)
    ));
    run.report
        .detail(format!("records_written={}", outcome.records_written));
    match &outcome.backup_path {
        Some(path) => run.report.detail(format!("backup={}", path.display())),
        None => run.report.detail("backup=skipped"),
    }
    run.report.detail("result=written");
    audit::record(
        paths,
        "compact",
        "written",
        &format!(
            "{} boundary={} kept={} dropped={}",
            outcome.path.display(),
            plan.boundary_id.as_deref().unwrap_or("-"),
            outcome.records_written,
            plan.stats.dropped()
        ),
    );
    Ok(run.report)
}

pub fn run(opts: &CompactOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    report_unknown_env();
    let result = execute(&paths, opts, CommandReport::new("compact"));
    if let Err(err) = &result
        && !opts.dry_run
    {
        audit::record(&paths, "compact", "failed", &format!("{err:#}"));
    }
    result
}
