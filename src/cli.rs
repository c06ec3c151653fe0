use anyhow::{Result, bail};
use clap::{ArgGroup, Parser, Subcommand};

use crate::commands::{self, CommandReport};
use crate::commands::compact::{CompactOptions, Strategy};

#[derive(Debug, Parser)]
#[command(name = "decant")]
#[command(about = "Compact a coding-agent session log: summarize the head, keep the tail")]
#[command(version)]
pub struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List sessions for the current directory (or every project).
    List {
        #[arg(long)]
        all: bool,

        /// Case-insensitive substring of the project directory name.
        #[arg(long)]
        project: Option<String>,
    },

    /// Print the main-line exchanges of a session.
    Show {
        /// Session id, unique id prefix, or path to a .jsonl file.
        session: String,

        #[arg(long)]
        full: bool,
    },

    /// Replace everything before a boundary with one summary record.
    #[command(group(ArgGroup::new("strategy").required(true).args(["topic", "last"])))]
    Compact {
        /// Session id, unique id prefix, or path to a .jsonl file.
        session: String,

        /// Keep everything from the first message about this topic.
        #[arg(short, long)]
        topic: Option<String>,

        /// Keep the last N user turns.
        #[arg(short, long)]
        last: Option<usize>,

        /// Oracle model: local, haiku, sonnet, opus, provider:model, or a model id.
        #[arg(short, long)]
        model: Option<String>,

        /// Drop progress ticks, thinking blocks, usage metadata and oversized tool output first.
        #[arg(short, long)]
        strip: bool,

        /// Resolve and splice in memory, write nothing.
        #[arg(short = 'n', long)]
        dry_run: bool,

        #[arg(long)]
        no_backup: bool,
    },

    /// Show resolved paths, configuration and environment problems.
    Status,
}

fn strategy(topic: Option<String>, last: Option<usize>) -> Result<Strategy> {
    match (topic, last) {
        (Some(topic), None) => Ok(Strategy::Topic(topic)),
        (None, Some(count)) => Ok(Strategy::Last(count)),
        _ => bail!("exactly one of --topic or --last is required"),
    }
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("command={}", report.command);
    println!("ok={}", report.ok);
    for line in &report.details {
        println!("{line}");
    }
    for issue in &report.issues {
        println!("issue={issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = match cli.command {
        Command::List { all, project } => commands::list::run(all, project.as_deref())?,
        Command::Show { session, full } => commands::show::run(&session, full)?,
        Command::Compact {
            session,
            topic,
            last,
            model,
            strip,
            dry_run,
            no_backup,
        } => commands::compact::run(&CompactOptions {
            session,
            strategy: strategy(topic, last)?,
            model,
            strip,
            dry_run,
            no_backup,
        })?,
        Command::Status => commands::status::run()?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::Parser;

    #[test]
    fn compact_requires_one_strategy() {
        assert!(Cli::try_parse_from(["decant", "compact", "abc"]).is_err());
        assert!(
            Cli::try_parse_from(["decant", "compact", "abc", "--topic", "x", "--last", "2"])
                .is_err()
        );
        let cli = Cli::try_parse_from(["decant", "--json", "compact", "abc", "-l", "2", "-n"])
            .expect("parse");
        assert!(cli.json);
        match cli.command {
            Command::Compact { last, dry_run, .. } => {
                assert_eq!(last, Some(2));
                assert!(dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
