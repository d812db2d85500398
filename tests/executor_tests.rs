//! Integration tests for the job executor against scripted device sessions.

mod common;

use common::*;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::thread::ThreadId;

use template_ops::archive::{ArchiveSink, ArchiveSource};
use template_ops::config::Config;
use template_ops::executor::collector::{HeaderMode, Payload, ResultCollector, ResultRecord, NO_DIFF};
use template_ops::profile::{EphemeralTarget, JobMode, JobSpec};

const TIMESTAMP: &str = "20240101-101010";

const NAT_POOL_1: &str = "delete security nat source pool p1\n\
                          set security nat source pool p1 address 10.1.0.0/24\n\
                          set protocols bgp local-as 65001\n";

const NAT_POOL_1_STRIPPED: &str = "set security nat source pool p1 address 10.1.0.0/24\n\
                                   set protocols bgp local-as 65001\n";

fn job(template: &str, vars: &str, input: &str, target: Option<&str>, mode: JobMode) -> JobSpec {
    JobSpec::single(
        template,
        vars,
        input,
        target.map(String::from),
        mode,
        None,
        &Config::default().archive,
        TIMESTAMP,
    )
}

fn workspace() -> TestWorkspace {
    let ws = TestWorkspace::new();
    sample_templates(&ws);
    ws
}

async fn run_one(ws: &TestWorkspace, sessions: &MockSessionFactory, job: &JobSpec) -> Vec<ResultRecord> {
    run_with(ws.config(), sessions, job).await
}

async fn run_with(config: Config, sessions: &MockSessionFactory, job: &JobSpec) -> Vec<ResultRecord> {
    let executor = executor(config, SAMPLE_INVENTORY, sessions);
    let collector = ResultCollector::new();
    executor.run(job, &collector).await;
    collector.snapshot()
}

fn text_of(records: &[ResultRecord]) -> String {
    assert_eq!(records.len(), 1, "expected exactly one record: {:?}", records);
    records[0].payload.text().unwrap_or_default()
}

// ============================================================================
// Render failures
// ============================================================================

#[tokio::test]
async fn test_missing_template() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    let records = run_one(&ws, &sessions, &job("absent", "vsrx", "1", Some("vsrx-01"), JobMode::Commit)).await;

    assert_eq!(records[0].id, "vsrx-01");
    assert_eq!(
        text_of(&records),
        "Error opening template file absent, file doesn't exist"
    );
    assert!(sessions.calls().is_empty());
}

#[tokio::test]
async fn test_undefined_variable_is_render_error() {
    let ws = workspace();
    ws.template("broken", "set system host-name {{ hostname }}\n");
    let sessions = MockSessionFactory::new();
    let records = run_one(&ws, &sessions, &job("broken", "vsrx", "1", Some("vsrx-01"), JobMode::Commit)).await;

    assert_eq!(
        text_of(&records),
        "Error rendering template broken, use debug on/see log"
    );
    assert!(sessions.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_input_is_render_error() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    let records = run_one(&ws, &sessions, &job("nat_pool", "vsrx", "abc", Some("vsrx-01"), JobMode::Commit)).await;

    assert_eq!(
        text_of(&records),
        "Error rendering template nat_pool, use debug on/see log"
    );
}

// ============================================================================
// Preview
// ============================================================================

#[tokio::test]
async fn test_preview_without_target() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    let records = run_one(&ws, &sessions, &job("nat_pool", "vsrx", "1", None, JobMode::Commit)).await;

    assert_eq!(records[0].id, "N/A");
    assert_eq!(text_of(&records), NAT_POOL_1);
    assert!(sessions.calls().is_empty());
}

#[tokio::test]
async fn test_ineligible_vars_only_render() {
    let ws = workspace();
    ws.template("ptx_int", "set interfaces ge-0/0/{{ trust_int }} unit {{ seq_0x }}\n");
    let sessions = MockSessionFactory::new();
    let records = run_one(&ws, &sessions, &job("ptx_int", "ptx", "2", Some("vsrx-01"), JobMode::Commit)).await;

    assert_eq!(text_of(&records), "set interfaces ge-0/0/4 unit 02\n");
    assert!(sessions.calls().is_empty());
}

#[tokio::test]
async fn test_preview_api() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    let executor = executor(ws.config(), SAMPLE_INVENTORY, &sessions);
    let collector = ResultCollector::new();

    let job = job("nat_pool_v2", "vsrx", "4", None, JobMode::Commit);
    assert!(!executor.applies_to_device(&job));
    assert_eq!(
        executor.preview(&job, &collector).unwrap(),
        "set security nat source pool v2-4\n"
    );
    assert!(collector.is_empty());

    let missing = self::job("absent", "vsrx", "4", None, JobMode::Commit);
    assert!(executor.preview(&missing, &collector).is_err());
}

// ============================================================================
// Diff and commit
// ============================================================================

#[tokio::test]
async fn test_diff_rolls_back() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    sessions.set_diff("vsrx-01", "[edit security nat source]\n+   pool p1 { }");
    let records = run_one(&ws, &sessions, &job("nat_pool", "vsrx", "1", Some("vsrx-01"), JobMode::Diff)).await;

    assert_eq!(records.len(), 1);
    assert!(records[0].is_diff());
    assert_eq!(
        records[0].payload,
        Payload::Diff {
            text: Some("[edit security nat source]\n+   pool p1 { }".to_string()),
            stripped: false,
        }
    );
    assert_eq!(
        sessions.ops_for("vsrx-01"),
        vec![
            "open",
            "open_database",
            "load",
            "load_mode",
            "diff",
            "rollback",
            "close_database",
            "close"
        ]
    );
    assert!(ws.archived().is_empty());
}

#[tokio::test]
async fn test_diff_without_changes() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    let records = run_one(&ws, &sessions, &job("nat_pool", "vsrx", "1", Some("vsrx-01"), JobMode::Diff)).await;

    assert_eq!(text_of(&records), NO_DIFF);
}

#[tokio::test]
async fn test_second_diff_is_refused() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    let executor = executor(ws.config(), SAMPLE_INVENTORY, &sessions);
    let collector = ResultCollector::new();

    executor
        .run(&job("nat_pool", "vsrx", "1", Some("vsrx-01"), JobMode::Diff), &collector)
        .await;
    executor
        .run(&job("nat_pool", "vsrx", "2", Some("vsrx-02"), JobMode::Diff), &collector)
        .await;

    let records = collector.snapshot();
    assert_eq!(records.len(), 2);
    assert!(records[0].is_diff());
    assert_eq!(records[1].id, "vsrx-02");
    assert!(records[1]
        .payload
        .text()
        .unwrap()
        .contains("refusing diff from 'vsrx-02'"));
}

#[tokio::test]
async fn test_commit_archives() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    let records = run_one(&ws, &sessions, &job("nat_pool", "vsrx", "1", Some("vsrx-01"), JobMode::Commit)).await;

    assert_eq!(
        text_of(&records),
        "nat_pool template commit completed, j2+set-cmd archived"
    );
    assert_eq!(sessions.loads_for("vsrx-01"), vec![NAT_POOL_1]);
    let commit = sessions
        .calls_for("vsrx-01")
        .into_iter()
        .find(|c| c.op == "commit")
        .unwrap();
    assert_eq!(commit.detail, "30");

    assert_eq!(
        ws.archived(),
        vec![
            "20240101-101010__nat_pool__vsrx-01.j2",
            "20240101-101010__nat_pool__vsrx-01.set"
        ]
    );
    let saved =
        std::fs::read_to_string(ws.archive.join("20240101-101010__nat_pool__vsrx-01.set")).unwrap();
    assert_eq!(saved, NAT_POOL_1);
}

/// Sink that refuses every artifact and records the saving thread.
#[derive(Default)]
struct ReadOnlyArchive {
    threads: Mutex<Vec<ThreadId>>,
}

impl ArchiveSink for ReadOnlyArchive {
    fn save(&self, _source: ArchiveSource<'_>, destination: &Path) -> template_ops::Result<()> {
        self.threads.lock().push(std::thread::current().id());
        Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            format!("{} is read-only", destination.display()),
        )
        .into())
    }
}

#[tokio::test]
async fn test_commit_archive_failure_off_runtime_thread() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    let sink = Arc::new(ReadOnlyArchive::default());
    let executor = executor(ws.config(), SAMPLE_INVENTORY, &sessions).with_archive_sink(sink.clone());
    let collector = ResultCollector::new();
    executor
        .run(&job("nat_pool", "vsrx", "1", Some("vsrx-01"), JobMode::Commit), &collector)
        .await;

    assert_eq!(
        text_of(&collector.snapshot()),
        "nat_pool template commit completed, archive error, see log"
    );
    let threads = sink.threads.lock().clone();
    assert!(!threads.is_empty());
    assert!(threads.iter().all(|id| *id != std::thread::current().id()));
    assert!(ws.archived().is_empty());
}

#[tokio::test]
async fn test_commit_without_archival() {
    let ws = workspace();
    let mut config = ws.config();
    config.archive.commit_template = false;
    config.archive.commit_payload = false;
    let sessions = MockSessionFactory::new();

    let mut job = job("nat_pool", "vsrx", "1", Some("vsrx-01"), JobMode::Commit);
    job.archive = template_ops::profile::ArchiveFlags::resolve(&config.archive, None);
    let records = run_with(config, &sessions, &job).await;

    assert_eq!(text_of(&records), "nat_pool template commit completed");
    assert!(ws.archived().is_empty());
}

#[tokio::test]
async fn test_rejected_deletes_retry_stripped() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    sessions.reject_deletes("vsrx-01");
    let records = run_one(&ws, &sessions, &job("nat_pool", "vsrx", "1", Some("vsrx-01"), JobMode::Commit)).await;

    assert_eq!(
        text_of(&records),
        "nat_pool template commit completed (-del cmds), j2+set-cmd archived"
    );
    assert_eq!(
        sessions.loads_for("vsrx-01"),
        vec![NAT_POOL_1, NAT_POOL_1_STRIPPED]
    );
    assert_eq!(
        sessions.ops_for("vsrx-01"),
        vec![
            "open",
            "open_database",
            "load",
            "load_mode",
            "rollback",
            "close_database",
            "open_database",
            "load",
            "load_mode",
            "commit",
            "close_database",
            "close"
        ]
    );
    let saved =
        std::fs::read_to_string(ws.archive.join("20240101-101010__nat_pool__vsrx-01.set")).unwrap();
    assert_eq!(saved, NAT_POOL_1_STRIPPED);
}

#[tokio::test]
async fn test_diff_retry_reports_stripped() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    sessions.reject_deletes("vsrx-01");
    let records = run_one(&ws, &sessions, &job("nat_pool", "vsrx", "1", Some("vsrx-01"), JobMode::Diff)).await;

    assert_eq!(
        text_of(&records),
        format!("{} (after removing delete cmds)", NO_DIFF)
    );
}

#[tokio::test]
async fn test_rejected_load_after_retry() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    sessions.reject_loads("vsrx-01");
    let records = run_one(&ws, &sessions, &job("nat_pool", "vsrx", "1", Some("vsrx-01"), JobMode::Commit)).await;

    assert_eq!(
        text_of(&records),
        "error during template commit (-del cmds), rollback..., use debug on/see log"
    );
    assert_eq!(sessions.loads_for("vsrx-01").len(), 2);
    assert!(!sessions.ops_for("vsrx-01").contains(&"commit".to_string()));
    assert!(ws.archived().is_empty());
}

#[tokio::test]
async fn test_retry_disabled() {
    let ws = workspace();
    let mut config = ws.config();
    config.execution.strip_delete_retry = false;
    let sessions = MockSessionFactory::new();
    sessions.reject_deletes("vsrx-01");
    let records = run_with(
        config,
        &sessions,
        &job("nat_pool", "vsrx", "1", Some("vsrx-01"), JobMode::Diff),
    )
    .await;

    assert_eq!(
        text_of(&records),
        "error during template diff, rollback..., use debug on/see log"
    );
    assert_eq!(sessions.loads_for("vsrx-01").len(), 1);
}

#[tokio::test]
async fn test_ephemeral_json_overwrites() {
    let ws = workspace();
    ws.template("eph_json", r#"{"configuration": {"system": {"host-name": "r{{ seq }}"}}}"#);
    let sessions = MockSessionFactory::new();
    let mut job = job("eph_json", "vsrx", "5", Some("vsrx-01"), JobMode::Commit);
    job.ephemeral = Some("eph1:json".parse::<EphemeralTarget>().unwrap());
    run_one(&ws, &sessions, &job).await;

    let calls = sessions.calls_for("vsrx-01");
    let database = calls.iter().find(|c| c.op == "open_database").unwrap();
    assert_eq!(database.detail, "ephemeral:eph1");
    let mode = calls.iter().find(|c| c.op == "load_mode").unwrap();
    assert_eq!(mode.detail, "json:true");
}

// ============================================================================
// Session failures
// ============================================================================

#[tokio::test]
async fn test_unreachable_device() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    sessions.set_unreachable("vsrx-02");
    let records = run_one(&ws, &sessions, &job("nat_pool", "vsrx", "2", Some("vsrx-02"), JobMode::Commit)).await;

    assert_eq!(text_of(&records), "error connecting to the device");
    assert_eq!(sessions.ops_for("vsrx-02"), vec!["open"]);
}

#[tokio::test]
async fn test_missing_credentials() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    let records = run_one(&ws, &sessions, &job("nat_pool", "vsrx", "9", Some("vsrx-99"), JobMode::Commit)).await;

    assert_eq!(text_of(&records), "netconf config lookup error");
    assert!(sessions.calls().is_empty());
}

#[tokio::test]
async fn test_local_target_needs_no_credentials() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    let records = run_one(&ws, &sessions, &job("nat_pool", "vsrx", "1", Some("local"), JobMode::Commit)).await;

    assert_eq!(
        text_of(&records),
        "nat_pool template commit completed, j2+set-cmd archived"
    );
    assert_eq!(sessions.calls_for("local")[0].detail, "local");
}

// ============================================================================
// Execute mode
// ============================================================================

#[tokio::test]
async fn test_exec_cli_handler() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    sessions.set_command_output("show version", "Junos: 23.4R1\n");
    let executor = executor(ws.config(), SAMPLE_INVENTORY, &sessions);
    let collector = ResultCollector::new();

    executor
        .run(&job("version", "exec1", "", Some("vsrx-01"), JobMode::Execute), &collector)
        .await;

    let records = collector.snapshot();
    assert_eq!(records[0].payload, Payload::Text("Junos: 23.4R1".to_string()));
    assert_eq!(collector.header(), HeaderMode::Custom("version".to_string()));
    assert_eq!(
        ws.archived(),
        vec![
            "20240101-101010__version__vsrx-01.exec",
            "20240101-101010__version__vsrx-01.exec.j2"
        ]
    );
}

#[tokio::test]
async fn test_exec_json_handler_structured() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    let mut job = job("facts", "exec1", "", Some("vsrx-02"), JobMode::Execute);
    job.handler = Some("json".to_string());
    let records = run_one(&ws, &sessions, &job).await;

    assert_eq!(
        records[0],
        ResultRecord::new(
            "vsrx-02",
            Payload::Structured(json!({"device": "vsrx-02"})),
            Some(json!({"seq": 1})),
        )
    );
}

#[tokio::test]
async fn test_exec_disabled() {
    let ws = workspace();
    let mut config = ws.config();
    config.execution.exec_enabled = false;
    let sessions = MockSessionFactory::new();
    let records = run_with(
        config,
        &sessions,
        &job("version", "exec1", "", Some("vsrx-01"), JobMode::Execute),
    )
    .await;

    assert_eq!(text_of(&records), "template execution not enabled");
    assert!(!sessions.ops_for("vsrx-01").contains(&"command".to_string()));
}

#[tokio::test]
async fn test_exec_unknown_handler() {
    let ws = workspace();
    let sessions = MockSessionFactory::new();
    let mut job = job("version", "exec1", "", Some("vsrx-01"), JobMode::Execute);
    job.handler = Some("python".to_string());
    let records = run_one(&ws, &sessions, &job).await;

    assert_eq!(
        text_of(&records),
        "Error executing code version, use debug on/see log"
    );
    assert_eq!(sessions.ops_for("vsrx-01"), vec!["open", "close"]);
}
