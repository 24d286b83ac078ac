#![allow(deprecated)]
use assert_cmd::Command;
use beacon_core::state::RunState;
use mockito::{Matcher, Mock, Server};
use predicates::prelude::*;
use serde_json::{json, Value};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const CI_ENV: &[&str] = &[
    "CIRCLE_WORKFLOW_ID",
    "CIRCLE_BRANCH",
    "CIRCLE_USERNAME",
    "CIRCLE_BUILD_URL",
    "CIRCLE_PROJECT_REPONAME",
    "CIRCLE_BUILD_NUM",
    "SLACK_ACCESS_TOKEN",
    "SLACK_CHANNEL",
    "SLACK_STORAGE_CHANNEL",
    "SLACK_API_URL",
    "BEACON_STATE_DIR",
    "BEACON_CONFIG",
    "BEACON_STORE",
];

fn beacon(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("beacon").unwrap();
    for var in CI_ENV {
        cmd.env_remove(var);
    }
    cmd.current_dir(dir.path())
        .env("BEACON_STATE_DIR", dir.path().join(".beacon"));
    cmd
}

/// `beacon notify` wired to a mock Slack server.
fn notify(
    dir: &TempDir,
    server: &Server,
    phase: &str,
    status: &str,
    step: &str,
    color: &str,
) -> Command {
    let mut cmd = beacon(dir);
    cmd.args([
        "notify",
        "--run-id",
        "wf-1",
        "--phase",
        phase,
        "--status",
        status,
        "--step",
        step,
        "--color",
        color,
        "--channel",
        "CPIPE",
        "--token",
        "xoxb-test",
        "--slack-api-url",
    ])
    .arg(server.url());
    cmd
}

fn post_ok(server: &mut Server, ts: &str) -> Mock {
    server
        .mock("POST", "/chat.postMessage")
        .match_body(Matcher::PartialJson(json!({ "channel": "CPIPE" })))
        .with_body(json!({ "ok": true, "ts": ts }).to_string())
        .create()
}

fn show_json(dir: &TempDir) -> Value {
    let output = beacon(dir)
        .args(["show", "--run-id", "wf-1", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).unwrap()
}

fn record_path(dir: &TempDir, run_id: &str) -> std::path::PathBuf {
    dir.path().join(".beacon/runs").join(format!("{run_id}.json"))
}

fn age_file(path: &std::path::Path, hours: u64) {
    let f = std::fs::File::options().write(true).open(path).unwrap();
    f.set_modified(SystemTime::now() - Duration::from_secs(hours * 3600))
        .unwrap();
}

// ---------------------------------------------------------------------------
// beacon notify
// ---------------------------------------------------------------------------

#[test]
fn first_notify_posts_message_and_records_it() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new();
    let post = post_ok(&mut server, "1700000000.000100");

    notify(&dir, &server, "build", "Building", "compile", "start")
        .assert()
        .success()
        .stdout(predicate::str::contains("posted"));

    post.assert();
    let state = show_json(&dir);
    assert_eq!(state["message_id"], "1700000000.000100");
    assert_eq!(state["phases"][0]["name"], "build");
    assert_eq!(state["phases"][0]["steps"], json!(["compile"]));
}

#[test]
fn second_notify_amends_the_same_message() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new();
    let post = post_ok(&mut server, "1700000000.000100");
    let update = server
        .mock("POST", "/chat.update")
        .match_body(Matcher::PartialJson(
            json!({ "channel": "CPIPE", "ts": "1700000000.000100" }),
        ))
        .with_body(r#"{"ok":true}"#)
        .expect(1)
        .create();

    notify(&dir, &server, "build", "Building", "compile", "start")
        .assert()
        .success();
    notify(&dir, &server, "deploy", "Deploying", "helm upgrade", "progress")
        .assert()
        .success()
        .stdout(predicate::str::contains("amended"));

    post.assert();
    update.assert();
    let state = show_json(&dir);
    assert_eq!(state["phases"].as_array().unwrap().len(), 2);
}

#[test]
fn failed_phase_stays_failed_across_retries() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new();
    post_ok(&mut server, "1700000000.000100");
    server
        .mock("POST", "/chat.update")
        .with_body(r#"{"ok":true}"#)
        .create();

    notify(&dir, &server, "build", "Building", "compile", "progress")
        .assert()
        .success();
    notify(&dir, &server, "build", "Build failed", "compile error", "failure")
        .assert()
        .success();
    notify(&dir, &server, "build", "Building", "retry", "progress")
        .assert()
        .success()
        .stdout(predicate::str::contains("kept failed"));

    let state = show_json(&dir);
    let build = &state["phases"][0];
    assert_eq!(build["color"], "failure");
    assert_eq!(build["status"], "Build failed");
    assert_eq!(build["steps"], json!(["compile", "compile error", "retry"]));
}

#[test]
fn deleted_message_is_reposted() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new();
    let first = post_ok(&mut server, "1700000000.000100");
    notify(&dir, &server, "build", "Building", "compile", "start")
        .assert()
        .success();
    first.remove();

    server
        .mock("POST", "/chat.update")
        .with_body(r#"{"ok":false,"error":"message_not_found"}"#)
        .create();
    let second = post_ok(&mut server, "1700000500.000200");

    notify(&dir, &server, "build", "Built", "done", "success")
        .assert()
        .success()
        .stdout(predicate::str::contains("re-posted"));

    second.assert();
    assert_eq!(show_json(&dir)["message_id"], "1700000500.000200");
}

#[test]
fn publish_failure_exits_nonzero_but_keeps_state() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new();
    server
        .mock("POST", "/chat.postMessage")
        .with_body(r#"{"ok":false,"error":"channel_not_found"}"#)
        .create();

    notify(&dir, &server, "build", "Building", "compile", "start")
        .assert()
        .failure()
        .stderr(predicate::str::contains("channel_not_found"));

    let state = show_json(&dir);
    assert_eq!(state["phases"][0]["name"], "build");
    assert!(state["message_id"].is_null());
}

#[test]
fn notify_json_output_has_expected_fields() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new();
    post_ok(&mut server, "1700000000.000100");

    let output = notify(&dir, &server, "build", "Building", "compile", "start")
        .arg("--json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let out: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(out["run_id"], "wf-1");
    assert_eq!(out["outcome"], "created");
    assert_eq!(out["action"], "created");
    assert_eq!(out["message_id"], "1700000000.000100");
    assert_eq!(out["revision"], 1);
}

#[test]
fn notify_without_token_fails() {
    let dir = TempDir::new().unwrap();
    beacon(&dir)
        .args([
            "notify", "--run-id", "wf-1", "--phase", "build", "--status", "s", "--step", "x",
            "--channel", "CPIPE",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("SLACK_ACCESS_TOKEN"));
}

#[test]
fn notify_rejects_unknown_color() {
    let dir = TempDir::new().unwrap();
    let server = Server::new();
    notify(&dir, &server, "build", "s", "x", "purple")
        .assert()
        .failure();
}

#[test]
fn notify_reads_run_id_from_ci_env() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new();
    post_ok(&mut server, "1700000000.000100");

    beacon(&dir)
        .env("CIRCLE_WORKFLOW_ID", "wf-env")
        .env("SLACK_ACCESS_TOKEN", "xoxb-test")
        .env("SLACK_CHANNEL", "CPIPE")
        .env("SLACK_API_URL", server.url())
        .args(["notify", "--phase", "build", "--status", "s", "--step", "x"])
        .assert()
        .success();

    assert!(record_path(&dir, "wf-env").exists());
}

// ---------------------------------------------------------------------------
// beacon show / render
// ---------------------------------------------------------------------------

#[test]
fn show_unknown_run_fails() {
    let dir = TempDir::new().unwrap();
    beacon(&dir)
        .args(["show", "--run-id", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no record for run 'nope'"));
}

#[test]
fn show_prints_phase_table() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new();
    post_ok(&mut server, "1700000000.000100");
    notify(&dir, &server, "build", "Building", "compile", "start")
        .assert()
        .success();

    beacon(&dir)
        .args(["show", "--run-id", "wf-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PHASE"))
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("1700000000.000100"));
}

#[test]
fn render_prints_attachments_without_posting() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::new();
    post_ok(&mut server, "1700000000.000100");
    notify(&dir, &server, "build", "Build failed", "compile error", "failure")
        .assert()
        .success();

    let output = beacon(&dir)
        .args([
            "render", "--run-id", "wf-1", "--repo", "infra", "--build-num", "42", "--title", "Deploy",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let out: Value = serde_json::from_slice(&output).unwrap();
    let attachments = out["attachments"].as_array().unwrap();
    assert_eq!(attachments.len(), 2);
    assert_eq!(
        attachments[0]["blocks"][1]["elements"][0]["text"],
        ":gear: `infra` | :hash: Build #42"
    );
    assert!(attachments[0]["blocks"][0]["text"]["text"]
        .as_str()
        .unwrap()
        .contains("*Deploy*"));
    assert_eq!(attachments[1]["color"], "#F44336");
    assert_eq!(out["text"], "Deploy: Build failed (build)");
}

// ---------------------------------------------------------------------------
// beacon sweep
// ---------------------------------------------------------------------------

fn seed_record(dir: &TempDir, run_id: &str) -> std::path::PathBuf {
    let path = record_path(dir, run_id);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut state = RunState::new(run_id, chrono::Utc::now());
    state.revision = 1;
    std::fs::write(&path, state.to_json().unwrap()).unwrap();
    path
}

#[test]
fn sweep_deletes_expired_records() {
    let dir = TempDir::new().unwrap();
    let stale = seed_record(&dir, "old-run");
    let fresh = seed_record(&dir, "new-run");
    age_file(&stale, 11);

    beacon(&dir)
        .arg("sweep")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 deleted"));

    assert!(!stale.exists());
    assert!(fresh.exists());
}

#[test]
fn sweep_dry_run_deletes_nothing() {
    let dir = TempDir::new().unwrap();
    let stale = seed_record(&dir, "old-run");
    age_file(&stale, 11);

    beacon(&dir)
        .args(["sweep", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("old-run"))
        .stdout(predicate::str::contains("expired"));

    assert!(stale.exists());
}

#[test]
fn sweep_respects_retention_override() {
    let dir = TempDir::new().unwrap();
    let path = seed_record(&dir, "run-a");
    age_file(&path, 3);

    beacon(&dir)
        .args(["sweep", "--retention-hours", "2", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"expired\""));

    assert!(!path.exists());
}

#[test]
fn sweep_with_enormous_retention_keeps_everything() {
    let dir = TempDir::new().unwrap();
    let path = seed_record(&dir, "run-a");
    age_file(&path, 30);

    for extra in [&["--dry-run"][..], &[][..]] {
        beacon(&dir)
            .args(["sweep", "--retention-hours", "10000000000"])
            .args(extra)
            .assert()
            .success()
            .stderr(predicate::str::contains("panicked").not());
    }

    assert!(path.exists());
}

#[test]
fn notify_sweeps_expired_records_first() {
    let dir = TempDir::new().unwrap();
    let stale = seed_record(&dir, "old-run");
    age_file(&stale, 11);
    let mut server = Server::new();
    post_ok(&mut server, "1700000000.000100");

    notify(&dir, &server, "build", "Building", "compile", "start")
        .assert()
        .success();

    assert!(!stale.exists());
}

// ---------------------------------------------------------------------------
// beacon config
// ---------------------------------------------------------------------------

#[test]
fn config_validate_defaults_clean() {
    let dir = TempDir::new().unwrap();
    beacon(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No warnings"));
}

#[test]
fn config_validate_reports_bad_palette() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join(".beacon")).unwrap();
    std::fs::write(
        dir.path().join(".beacon/config.yaml"),
        "palette:\n  failure: red\n",
    )
    .unwrap();

    beacon(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("palette.failure"));
}

#[test]
fn config_file_changes_step_policy() {
    let dir = TempDir::new().unwrap();
    let cfg = dir.path().join("beacon.yaml");
    std::fs::write(&cfg, "step_policy: skip_existing\nsweep_on_notify: false\n").unwrap();
    let mut server = Server::new();
    post_ok(&mut server, "1700000000.000100");
    server
        .mock("POST", "/chat.update")
        .with_body(r#"{"ok":true}"#)
        .create();

    for _ in 0..2 {
        notify(&dir, &server, "build", "Building", "compile", "progress")
            .arg("--config")
            .arg(&cfg)
            .assert()
            .success();
    }

    assert_eq!(show_json(&dir)["phases"][0]["steps"], json!(["compile"]));
}
