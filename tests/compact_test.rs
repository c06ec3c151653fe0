use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

const SESSION_ID: &str = "5f0c2a9e-1111-4c3d-9e2f-0123456789ab";

fn row(id: &str, parent: Option<&str>, kind: &str, side: bool, text: &str) -> String {
    let parent = parent.map_or("null".to_string(), |p| format!("\"{p}\""));
    let message = if kind == "user" {
        format!("{{\"role\":\"user\",\"content\":\"{text}\"}}")
    } else {
        format!("{{\"role\":\"assistant\",\"content\":[{{\"type\":\"text\",\"text\":\"{text}\"}}]}}")
    };
    format!(
        "{{\"parentUuid\":{parent},\"isSidechain\":{side},\"sessionId\":\"{SESSION_ID}\",\"cwd\":\"/work\",\"version\":\"2.0.1\",\"gitBranch\":\"main\",\"userType\":\"external\",\"type\":\"{kind}\",\"message\":{message},\"uuid\":\"{id}\",\"timestamp\":\"2025-01-01T00:00:00.000Z\"}}\n"
    )
}

/// root→u1→a1→u2→a2→u3 with a side branch s1→s2 hanging from u2.
fn scenario_log() -> String {
    [
        row("root", None, "user", false, "set up the repo"),
        row("u1", Some("root"), "user", false, "add a config loader"),
        row("a1", Some("u1"), "assistant", false, "config loader added"),
        row("u2", Some("a1"), "user", false, "now fix the deploy script"),
        row("s1", Some("u2"), "assistant", true, "side task"),
        row("a2", Some("u2"), "assistant", false, "deploy script fixed"),
        row("s2", Some("s1"), "user", true, "side follow up"),
        row("u3", Some("a2"), "user", false, "ship it"),
    ]
    .concat()
}

struct Fixture {
    tmp: TempDir,
    session: PathBuf,
}

impl Fixture {
    fn new(log: &str) -> Self {
        let tmp = tempdir().expect("tempdir");
        let project = tmp.path().join("projects").join("-work");
        fs::create_dir_all(&project).expect("mkdir project");
        let session = project.join(format!("{SESSION_ID}.jsonl"));
        fs::write(&session, log).expect("write session");
        Self { tmp, session }
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("decant");
        cmd.current_dir(self.tmp.path())
            .env("DECANT_HOME", self.tmp.path().join("home"))
            .env("DECANT_PROJECTS_DIR", self.tmp.path().join("projects"))
            .env_remove("DECANT_MODEL")
            .env_remove("DECANT_BACKUP");
        cmd
    }

    fn backups(&self) -> Vec<PathBuf> {
        let dir = self.session.parent().expect("parent");
        fs::read_dir(dir)
            .expect("read project dir")
            .map(|e| e.expect("entry").path())
            .filter(|p| p.to_string_lossy().ends_with(".jsonl.bak"))
            .collect()
    }
}

fn lines(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .expect("read")
        .lines()
        .map(|l| serde_json::from_str(l).expect("valid json line"))
        .collect()
}

fn uuids(records: &[Value]) -> Vec<String> {
    records
        .iter()
        .map(|r| r["uuid"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn last_two_turns_rewrites_log_and_keeps_backup() {
    let fx = Fixture::new(&scenario_log());
    let original = fs::read(&fx.session).expect("read");

    fx.cmd()
        .args(["compact", SESSION_ID, "--last", "2", "--model", "local"])
        .assert()
        .success()
        .stdout(predicate::str::contains("result=written"))
        .stdout(predicate::str::contains("boundary=u2"));

    let records = lines(&fx.session);
    assert_eq!(records[0]["type"], "summary");
    assert!(records[0]["parentUuid"].is_null());
    assert_eq!(records[0]["leafUuid"], "a1");
    let summary_id = records[0]["uuid"].as_str().expect("summary uuid").to_string();

    let ids = uuids(&records[1..]);
    assert_eq!(ids, vec!["u2", "s1", "a2", "s2", "u3"]);
    assert_eq!(records[1]["parentUuid"], Value::String(summary_id));

    let backups = fx.backups();
    assert_eq!(backups.len(), 1);
    assert_eq!(fs::read(&backups[0]).expect("read backup"), original);

    let audit = fs::read_to_string(fx.tmp.path().join("home/logs/audit.log")).expect("audit");
    assert!(audit.contains("\"status\":\"written\""));
}

#[test]
fn untouched_records_keep_their_exact_bytes() {
    let fx = Fixture::new(&scenario_log());
    fx.cmd()
        .args(["compact", SESSION_ID, "--last", "2", "--model", "local"])
        .assert()
        .success();

    let written = fs::read_to_string(&fx.session).expect("read");
    let original = scenario_log();
    // Line 1 is the summary and line 2 the re-parented boundary.
    let kept: Vec<&str> = written.lines().skip(2).collect();
    assert_eq!(kept.len(), 4);
    for line in kept {
        assert!(original.lines().any(|l| l == line), "rewritten line: {line}");
    }
}

#[test]
fn no_backup_skips_the_copy_only() {
    let fx = Fixture::new(&scenario_log());
    fx.cmd()
        .args(["compact", SESSION_ID, "-l", "2", "-m", "local", "--no-backup"])
        .assert()
        .success()
        .stdout(predicate::str::contains("backup=skipped"));
    assert!(fx.backups().is_empty());
    assert_eq!(lines(&fx.session)[0]["type"], "summary");
}

#[test]
fn topic_resolves_with_local_oracle() {
    let fx = Fixture::new(&scenario_log());
    fx.cmd()
        .args(["compact", SESSION_ID, "--topic", "deploy script", "--model", "local"])
        .assert()
        .success()
        .stdout(predicate::str::contains("boundary=u2"));
}

#[test]
fn missing_topic_fails_without_touching_the_log() {
    let fx = Fixture::new(&scenario_log());
    let original = fs::read(&fx.session).expect("read");
    fx.cmd()
        .args(["compact", SESSION_ID, "--topic", "kubernetes", "--model", "local"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("E005_BOUNDARY_NOT_FOUND"));
    assert_eq!(fs::read(&fx.session).expect("read"), original);
    assert!(fx.backups().is_empty());
}

#[test]
fn dry_run_reports_plan_and_writes_nothing() {
    let fx = Fixture::new(&scenario_log());
    let original = fs::read(&fx.session).expect("read");
    fx.cmd()
        .args(["compact", SESSION_ID, "--last", "2", "--dry-run", "--model", "local"])
        .assert()
        .success()
        .stdout(predicate::str::contains("result=dry-run"))
        .stdout(predicate::str::contains("head_main_line=3"))
        .stdout(predicate::str::contains("kept_branch=2"))
        .stdout(predicate::str::contains("oracle=local"))
        .stdout(predicate::str::contains("summary_id="))
        .stdout(predicate::str::contains("rewritten_records="));
    assert_eq!(fs::read(&fx.session).expect("read"), original);
    assert!(fx.backups().is_empty());
    assert!(!fx.tmp.path().join("home/logs/audit.log").exists());
}

#[test]
fn too_many_turns_is_a_no_op_with_warning() {
    let fx = Fixture::new(&scenario_log());
    let original = fs::read(&fx.session).expect("read");
    fx.cmd()
        .args(["compact", SESSION_ID, "--last", "50", "--model", "local"])
        .assert()
        .success()
        .stdout(predicate::str::contains("result=no-op"))
        .stderr(predicate::str::contains("DECANT_WARN code=COMPACT_NO_OP"));
    assert_eq!(fs::read(&fx.session).expect("read"), original);
    assert!(fx.backups().is_empty());
}

#[test]
fn zero_turns_is_rejected() {
    let fx = Fixture::new(&scenario_log());
    fx.cmd()
        .args(["compact", SESSION_ID, "--last", "0", "--model", "local"])
        .assert()
        .code(5);
}

#[test]
fn malformed_line_aborts_before_any_write() {
    let mut log = String::new();
    let mut parent: Option<String> = None;
    for i in 1..=10 {
        if i == 4 {
            log.push_str("{\"type\":\"user\",\"uuid\":\n");
            continue;
        }
        let id = format!("m{i}");
        let kind = if i % 2 == 1 { "user" } else { "assistant" };
        log.push_str(&row(&id, parent.as_deref(), kind, false, &format!("turn {i}")));
        parent = Some(id);
    }
    let fx = Fixture::new(&log);
    let original = fs::read(&fx.session).expect("read");

    for extra in [None, Some("--dry-run")] {
        let mut cmd = fx.cmd();
        cmd.args(["compact", SESSION_ID, "--last", "2", "--model", "local"]);
        if let Some(flag) = extra {
            cmd.arg(flag);
        }
        cmd.assert()
            .code(3)
            .stderr(predicate::str::contains("line 4"));
    }
    assert_eq!(fs::read(&fx.session).expect("read"), original);
    assert!(fx.backups().is_empty());
}

#[test]
fn cyclic_links_are_reported_as_corrupt() {
    let log = [
        row("x", Some("y"), "user", false, "one"),
        row("y", Some("x"), "assistant", false, "two"),
    ]
    .concat();
    let fx = Fixture::new(&log);
    fx.cmd()
        .args(["compact", SESSION_ID, "--last", "1", "--dry-run", "--model", "local"])
        .assert()
        .code(4);
}

#[test]
fn compact_without_strategy_is_a_usage_error() {
    let fx = Fixture::new(&scenario_log());
    fx.cmd().args(["compact", SESSION_ID]).assert().code(2);
}

#[test]
fn session_can_be_named_by_prefix_or_path() {
    let fx = Fixture::new(&scenario_log());
    fx.cmd()
        .args(["compact", &SESSION_ID[..8], "--last", "2", "--dry-run", "-m", "local"])
        .assert()
        .success();
    fx.cmd()
        .arg("compact")
        .arg(&fx.session)
        .args(["--last", "2", "--dry-run", "-m", "local"])
        .assert()
        .success();
}

#[test]
fn dry_run_fails_like_the_real_run_when_the_oracle_cannot_be_built() {
    let fx = Fixture::new(&scenario_log());
    let original = fs::read(&fx.session).expect("read");

    for model in [None, Some("mystery-model")] {
        for dry_run in [true, false] {
            let mut cmd = fx.cmd();
            cmd.env_remove("ANTHROPIC_API_KEY")
                .env_remove("ANTHROPIC_AUTH_TOKEN")
                .args(["compact", SESSION_ID, "--last", "1"]);
            if let Some(model) = model {
                cmd.args(["--model", model]);
            }
            if dry_run {
                cmd.arg("--dry-run");
            }
            cmd.assert()
                .code(6)
                .stderr(predicate::str::contains("E006_ORACLE_UNAVAILABLE"));
        }
    }
    assert_eq!(fs::read(&fx.session).expect("read"), original);
    assert!(fx.backups().is_empty());
}

fn line(value: Value) -> String {
    format!("{value}\n")
}

fn noisy_log() -> String {
    let big_output = (0..300).map(|i| format!("output line {i}")).collect::<Vec<_>>().join("\n");
    let thinking = |id: &str, parent: &str, text: &str| {
        line(json!({
            "parentUuid": parent, "isSidechain": false, "type": "assistant", "uuid": id,
            "costUSD": 0.02,
            "message": {
                "role": "assistant",
                "content": [
                    {"type": "thinking", "thinking": "long private reasoning", "signature": "sig"},
                    {"type": "text", "text": text}
                ],
                "usage": {"input_tokens": 1200, "output_tokens": 80},
                "stop_reason": "end_turn"
            }
        }))
    };
    let tool_result = |id: &str, parent: &str| {
        line(json!({
            "parentUuid": parent, "isSidechain": false, "type": "user", "uuid": id,
            "message": {
                "role": "user",
                "content": [{"type": "tool_result", "tool_use_id": "t1", "content": big_output}]
            }
        }))
    };
    let progress = |id: &str, parent: &str| {
        line(json!({"parentUuid": parent, "isSidechain": false, "type": "progress", "uuid": id, "data": {"tick": id}}))
    };
    let prompt = |id: &str, parent: Option<&str>, text: &str| {
        line(json!({
            "parentUuid": parent, "isSidechain": false, "type": "user", "uuid": id,
            "message": {"role": "user", "content": text}
        }))
    };
    [
        prompt("u1", None, "first task"),
        thinking("a1", "u1", "working on it"),
        tool_result("r1", "a1"),
        progress("p1", "r1"),
        progress("p2", "r1"),
        progress("p3", "r1"),
        thinking("a2", "r1", "first task done"),
        prompt("u2", Some("a2"), "second task"),
        thinking("a3", "u2", "on it"),
        tool_result("r2", "a3"),
    ]
    .concat()
}

#[test]
fn strip_then_compact_keeps_links_and_backs_up_the_original() {
    let fx = Fixture::new(&noisy_log());
    let original = fs::read(&fx.session).expect("read");

    fx.cmd()
        .args(["compact", SESSION_ID, "--last", "1", "--strip", "--model", "local"])
        .assert()
        .success()
        .stdout(predicate::str::contains("boundary=u2"))
        .stdout(predicate::str::contains("strip_saved="))
        .stdout(predicate::str::contains("result=written"));

    let records = lines(&fx.session);
    assert_eq!(uuids(&records), vec![records[0]["uuid"].as_str().expect("id"), "u2", "a3", "r2"]);
    assert_eq!(records[0]["type"], "summary");
    assert_eq!(records[0]["leafUuid"], "a2");
    assert_eq!(records[1]["parentUuid"], records[0]["uuid"]);
    assert_eq!(records[2]["parentUuid"], "u2");
    assert_eq!(records[3]["parentUuid"], "a3");

    let reply = &records[2];
    assert_eq!(
        reply["message"]["content"],
        json!([{"type": "text", "text": "on it"}])
    );
    assert!(reply["message"].get("usage").is_none());
    assert!(reply.get("costUSD").is_none());

    let output = records[3]["message"]["content"][0]["content"]
        .as_str()
        .expect("tool output");
    assert!(output.contains("lines trimmed"));
    assert!(output.starts_with("output line 0\n"));
    assert!(output.ends_with("output line 299"));

    let backups = fx.backups();
    assert_eq!(backups.len(), 1);
    assert_eq!(fs::read(&backups[0]).expect("backup"), original);
}
