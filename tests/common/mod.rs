//! Shared test utilities and fixtures for the template-ops test suite.
//!
//! This module provides:
//! - A scripted mock [`SessionFactory`] with a call log
//! - A temporary workspace with templates, archive directory and inventory
//! - Helpers building executors, coordinators and orchestrators
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tempfile::TempDir;

use template_ops::config::Config;
use template_ops::device::{
    Database, DeviceSession, SessionError, SessionFactory, SessionResult, Target,
};
use template_ops::executor::batch::BatchCoordinator;
use template_ops::executor::orchestrator::Orchestrator;
use template_ops::executor::JobExecutor;
use template_ops::profile::{LoadFormat, ProfileRegistry};

// ============================================================================
// Mock Session Implementation
// ============================================================================

/// One recorded session operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Target device name
    pub device: String,
    /// Operation name (`open`, `load`, `diff`, `commit`, ...)
    pub op: String,
    /// Operation argument, payload for `load`
    pub detail: String,
}

/// Scripted device behaviour shared by every session of a factory.
#[derive(Debug, Default)]
struct Script {
    unreachable: HashSet<String>,
    reject_deletes: HashSet<String>,
    reject_loads: HashSet<String>,
    diffs: HashMap<String, String>,
    command_outputs: HashMap<String, String>,
    connect_delay: HashMap<String, Duration>,
}

/// A mock session factory for testing purposes.
///
/// Every session appends to one shared call log so tests can check the order
/// of operations across devices.
///
/// # Example
///
/// ```rust,ignore
/// let sessions = MockSessionFactory::new();
/// sessions.set_diff("vsrx-01", "[edit]\n+  set system host-name r1");
/// sessions.reject_deletes("vsrx-02");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockSessionFactory {
    calls: Arc<Mutex<Vec<Call>>>,
    script: Arc<RwLock<Script>>,
}

impl MockSessionFactory {
    /// Create a factory where every device accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail session setup for `device`.
    pub fn set_unreachable(&self, device: &str) {
        self.script.write().unreachable.insert(device.to_string());
    }

    /// Reject any load for `device` whose payload contains delete statements.
    pub fn reject_deletes(&self, device: &str) {
        self.script.write().reject_deletes.insert(device.to_string());
    }

    /// Reject every load for `device`.
    pub fn reject_loads(&self, device: &str) {
        self.script.write().reject_loads.insert(device.to_string());
    }

    /// Diff text returned for `device`; devices without one report no diff.
    pub fn set_diff(&self, device: &str, diff: &str) {
        self.script
            .write()
            .diffs
            .insert(device.to_string(), diff.to_string());
    }

    /// Output of an operational command, echoed back when unset.
    pub fn set_command_output(&self, command: &str, output: &str) {
        self.script
            .write()
            .command_outputs
            .insert(command.to_string(), output.to_string());
    }

    /// Delay session setup for `device`.
    pub fn set_connect_delay(&self, device: &str, delay: Duration) {
        self.script
            .write()
            .connect_delay
            .insert(device.to_string(), delay);
    }

    /// All recorded calls in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Recorded calls for one device.
    pub fn calls_for(&self, device: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.device == device)
            .cloned()
            .collect()
    }

    /// Operation names recorded for one device.
    pub fn ops_for(&self, device: &str) -> Vec<String> {
        self.calls_for(device).into_iter().map(|c| c.op).collect()
    }

    /// Payloads loaded on one device.
    pub fn loads_for(&self, device: &str) -> Vec<String> {
        self.calls_for(device)
            .into_iter()
            .filter(|c| c.op == "load")
            .map(|c| c.detail)
            .collect()
    }

    fn record(&self, device: &str, op: &str, detail: impl Into<String>) {
        self.calls.lock().push(Call {
            device: device.to_string(),
            op: op.to_string(),
            detail: detail.into(),
        });
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn open(&self, target: &Target) -> SessionResult<Box<dyn DeviceSession>> {
        let device = target.name().to_string();
        let delay = self.script.read().connect_delay.get(&device).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(&device, "open", target.to_string());

        if self.script.read().unreachable.contains(&device) {
            return Err(SessionError::Transport(format!("{} unreachable", device)));
        }

        Ok(Box::new(MockSession {
            device,
            factory: self.clone(),
        }))
    }
}

/// Session handed out by [`MockSessionFactory`].
struct MockSession {
    device: String,
    factory: MockSessionFactory,
}

#[async_trait]
impl DeviceSession for MockSession {
    async fn open_database(&mut self, database: &Database) -> SessionResult<()> {
        let detail = match database {
            Database::Candidate => "candidate".to_string(),
            Database::Ephemeral(instance) => format!("ephemeral:{}", instance),
        };
        self.factory.record(&self.device, "open_database", detail);
        Ok(())
    }

    async fn load(&mut self, payload: &str, format: LoadFormat, overwrite: bool) -> SessionResult<()> {
        self.factory.record(&self.device, "load", payload);
        self.factory.record(
            &self.device,
            "load_mode",
            format!("{}:{}", format, overwrite),
        );
        let script = self.factory.script.read();
        if script.reject_loads.contains(&self.device) {
            return Err(SessionError::ConfigLoad("syntax error".to_string()));
        }
        if script.reject_deletes.contains(&self.device) && payload.contains("delete ") {
            return Err(SessionError::ConfigLoad(
                "statement not found".to_string(),
            ));
        }
        Ok(())
    }

    async fn diff(&mut self) -> SessionResult<Option<String>> {
        self.factory.record(&self.device, "diff", "");
        Ok(self.factory.script.read().diffs.get(&self.device).cloned())
    }

    async fn commit(&mut self, timeout: Duration) -> SessionResult<()> {
        self.factory
            .record(&self.device, "commit", timeout.as_secs().to_string());
        Ok(())
    }

    async fn rollback(&mut self) -> SessionResult<()> {
        self.factory.record(&self.device, "rollback", "");
        Ok(())
    }

    async fn close_database(&mut self) -> SessionResult<()> {
        self.factory.record(&self.device, "close_database", "");
        Ok(())
    }

    async fn command(&mut self, command: &str) -> SessionResult<String> {
        self.factory.record(&self.device, "command", command);
        let output = self
            .factory
            .script
            .read()
            .command_outputs
            .get(command)
            .cloned()
            .unwrap_or_else(|| format!("{}: {}", self.device, command));
        Ok(output)
    }

    async fn close(&mut self) -> SessionResult<()> {
        self.factory.record(&self.device, "close", "");
        Ok(())
    }
}

// ============================================================================
// Test Workspace
// ============================================================================

/// Temporary workspace holding templates and the archive directory.
pub struct TestWorkspace {
    /// Keeps the directory alive
    pub dir: TempDir,
    /// Template search root
    pub templates: PathBuf,
    /// Archive directory
    pub archive: PathBuf,
}

impl TestWorkspace {
    /// Create an empty workspace.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let templates = dir.path().join("xtemplate");
        let archive = dir.path().join("xarchive");
        std::fs::create_dir_all(&templates).expect("template dir");
        Self {
            dir,
            templates,
            archive,
        }
    }

    /// Write `<name>.j2` under the template root.
    pub fn template(&self, name: &str, content: &str) -> &Self {
        std::fs::write(self.templates.join(format!("{}.j2", name)), content)
            .expect("write template");
        self
    }

    /// Write an inventory file and return its path.
    pub fn inventory(&self, yaml: &str) -> PathBuf {
        let path = self.dir.path().join("profiles.yml");
        std::fs::write(&path, yaml).expect("write inventory");
        path
    }

    /// Default config pointed at this workspace.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.paths.templates = self.templates.clone();
        config.paths.archive = self.archive.clone();
        config.paths.inventory = self.dir.path().join("profiles.yml");
        config
    }

    /// Files written to the archive directory, sorted.
    pub fn archived(&self) -> Vec<String> {
        list_files(&self.archive)
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

fn list_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

// ============================================================================
// Builders
// ============================================================================

/// Inventory with credentials for vsrx-01..vsrx-03 and a few profiles.
pub const SAMPLE_INVENTORY: &str = r#"
auth:
  default: { user: lab, port: 830 }
  vsrx-01: { host: 10.0.0.11 }
  vsrx-02: { host: 10.0.0.12 }
  vsrx-03: { host: 10.0.0.13 }
groups:
  vsrx: [vsrx-01, vsrx-02, vsrx-03]
profiles:
  nat:
    comment: source nat pools
    groups: [vsrx]
    devices:
      default: { template_vars: vsrx, template: nat_pool, input: "1" }
      vsrx-02: { input: "2" }
      vsrx-03: { input: "3", template: nat_pool_v2 }
  version:
    comment: show versions
    groups: [vsrx]
    devices:
      default: { template_vars: exec1, template: version, input: "", exec: true }
  facts:
    comment: structured device facts
    groups: [vsrx]
    devices:
      default: { template_vars: exec1, template: facts, input: "", exec: true, handler: json }
  summary:
    comment: summarize prior stage
    devices:
      vsrx-01: { template_vars: exec1, template: summary, input: "", exec: true, handler: json }
multi_profiles:
  rollout:
    comment: nat then versions
    stages:
      - { profile: nat }
      - { profile: version }
  broken:
    comment: second stage missing
    stages:
      - { profile: nat }
      - { profile: missing }
      - { profile: version }
  report:
    comment: facts then summary
    stages:
      - { profile: facts }
      - { profile: summary }
"#;

/// Templates referenced by [`SAMPLE_INVENTORY`].
pub fn sample_templates(ws: &TestWorkspace) {
    ws.template(
        "nat_pool",
        "delete security nat source pool p{{ seq }}\n\
         set security nat source pool p{{ seq }} address 10.{{ seq }}.0.0/24\n\
         set protocols bgp local-as {{ aut_sys }}\n",
    )
    .template("nat_pool_v2", "set security nat source pool v2-{{ seq }}\n")
    .template("version", "#!header version\nshow version\n")
    .template(
        "facts",
        r#"{"result": {"device": "{{ device }}"}, "result_adv": {"seq": 1}}"#,
    )
    .template(
        "summary",
        r#"{"result": "{{ prior_results | length }} devices", "header": "summary"}"#,
    );
}

/// Parse an inventory for tests.
pub fn registry(yaml: &str) -> ProfileRegistry {
    ProfileRegistry::parse(yaml).expect("valid inventory")
}

/// Executor backed by the mock factory.
pub fn executor(config: Config, yaml: &str, sessions: &MockSessionFactory) -> JobExecutor {
    JobExecutor::new(
        Arc::new(config),
        Arc::new(registry(yaml)),
        Arc::new(sessions.clone()),
    )
    .expect("executor")
}

/// Orchestrator backed by the mock factory.
pub fn orchestrator(config: Config, yaml: &str, sessions: &MockSessionFactory) -> Orchestrator {
    Orchestrator::new(BatchCoordinator::new(executor(config, yaml, sessions)))
}
