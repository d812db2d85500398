//! Execution engine for template-ops
//!
//! This module provides:
//! - [`JobExecutor`]: renders one device job and applies it
//! - [`batch::BatchCoordinator`]: runs every device of one profile concurrently
//! - [`orchestrator::Orchestrator`]: runs profile stages in order
//! - [`collector::ResultCollector`]: the shared result buffer
//! - [`handler`]: execute-mode result handlers

pub mod batch;
pub mod collector;
pub mod handler;
pub mod orchestrator;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveSink, Archiver, FsArchive, ARCHIVE_ERROR_SUFFIX};
use crate::config::Config;
use crate::device::{Database, DeviceSession, SessionFactory, SessionResult, Target};
use crate::error::{Error, Result};
use crate::profile::{JobMode, JobSpec, LoadFormat, ProfileRegistry};
use crate::template::{file_md5, TemplateRenderer};
use crate::vars::VarRegistry;

use collector::{Payload, ResultCollector, ResultRecord};
use handler::{HandlerContext, HandlerRegistry};

/// Timestamp format shared by every job of a stage.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Matches delete statements up to and including their newline.
static DELETE_COMMANDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"delete .*\n").expect("valid delete pattern"));

/// Removes every delete statement from a set-command payload.
///
/// Only statements followed by a newline are removed.
pub fn strip_delete_commands(payload: &str) -> String {
    DELETE_COMMANDS.replace_all(payload, "").into_owned()
}

/// Current time formatted with [`TIMESTAMP_FORMAT`]
pub fn stage_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// MD5 of a template file, read on the blocking pool.
async fn template_md5(path: PathBuf) -> String {
    match tokio::task::spawn_blocking(move || file_md5(&path)).await {
        Ok(Ok(digest)) => digest,
        _ => "error calculating md5".to_string(),
    }
}

/// Result of one job before it is appended to the collector.
enum Outcome {
    Record(ResultRecord),
    Diff { text: Option<String>, stripped: bool },
}

impl Outcome {
    fn text(device: &str, text: impl Into<String>) -> Self {
        Outcome::Record(ResultRecord::text(device, text))
    }
}

/// Renders and applies device jobs.
///
/// Cheap to clone; every spawned device task owns a clone.
#[derive(Clone)]
pub struct JobExecutor {
    config: Arc<Config>,
    registry: Arc<ProfileRegistry>,
    vars: Arc<VarRegistry>,
    templates: Arc<TemplateRenderer>,
    sessions: Arc<dyn SessionFactory>,
    handlers: Arc<HandlerRegistry>,
    archiver: Archiver,
}

impl JobExecutor {
    /// Create an executor with built-in generators, handlers and filesystem archival
    pub fn new(
        config: Arc<Config>,
        registry: Arc<ProfileRegistry>,
        sessions: Arc<dyn SessionFactory>,
    ) -> Result<Self> {
        let vars = VarRegistry::from_config(&config.generators)?;
        let templates = TemplateRenderer::new(&config.paths.templates);
        let archiver = Archiver::new(
            Arc::new(FsArchive),
            config.commit_archive_dir().to_path_buf(),
            config.exec_archive_dir().to_path_buf(),
        );
        Ok(Self {
            config,
            registry,
            vars: Arc::new(vars),
            templates: Arc::new(templates),
            sessions,
            handlers: Arc::new(HandlerRegistry::with_builtins()),
            archiver,
        })
    }

    /// Replace the handler registry
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    /// Replace the archive sink
    pub fn with_archive_sink(mut self, sink: Arc<dyn ArchiveSink>) -> Self {
        self.archiver = Archiver::new(
            sink,
            self.config.commit_archive_dir().to_path_buf(),
            self.config.exec_archive_dir().to_path_buf(),
        );
        self
    }

    /// Process configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Profile registry
    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    /// Template renderer
    pub fn templates(&self) -> &TemplateRenderer {
        &self.templates
    }

    /// Whether `job` would be applied to a device rather than only rendered
    pub fn applies_to_device(&self, job: &JobSpec) -> bool {
        job.target.is_some() && self.config.execution.is_eligible(&job.template_vars)
    }

    /// Render `job` without touching any device
    pub fn preview(&self, job: &JobSpec, collector: &ResultCollector) -> Result<String> {
        if !self.templates.exists(&job.template) {
            return Err(Error::TemplateNotFound(job.template.clone()));
        }
        self.render(job, collector)
    }

    /// Run `job`, appending exactly one record to `collector`
    pub async fn run(&self, job: &JobSpec, collector: &ResultCollector) {
        match self.execute(job, collector).await {
            Outcome::Record(record) => collector.push(record),
            Outcome::Diff { text, stripped } => {
                if let Err(e) = collector.push_diff(&job.device, text, stripped) {
                    warn!(device = %job.device, error = %e, "Diff result refused");
                    collector.push(ResultRecord::text(&job.device, e.to_string()));
                }
            }
        }
    }

    fn render(&self, job: &JobSpec, collector: &ResultCollector) -> Result<String> {
        let mut vars = self.vars.generate(&job.template_vars, &job.input)?;
        vars.insert("template_ops".to_string(), Value::Bool(true));
        vars.insert("device".to_string(), Value::String(job.device.clone()));
        vars.insert("prior_results".to_string(), collector.prior_results());
        self.templates.render(&job.template, &vars)
    }

    fn target(&self, name: &str) -> Result<Target> {
        if Target::is_local_name(name) {
            return Ok(Target::Local {
                name: name.to_string(),
            });
        }
        let credentials = self.registry.credentials(name)?;
        Ok(Target::Remote {
            name: name.to_string(),
            credentials,
        })
    }

    async fn execute(&self, job: &JobSpec, collector: &ResultCollector) -> Outcome {
        let device = job.device.as_str();

        if !self.templates.exists(&job.template) {
            let status = Error::TemplateNotFound(job.template.clone()).to_string();
            warn!(device = %device, template = %job.template, "{}", status);
            return Outcome::text(device, status);
        }

        let template_path = self.templates.path(&job.template);
        let md5 = template_md5(template_path.clone()).await;

        let rendered = match self.render(job, collector) {
            Ok(rendered) => rendered,
            Err(e) => {
                error!(
                    device = %device,
                    template = %template_path.display(),
                    error = %e,
                    "Error rendering template"
                );
                return Outcome::text(
                    device,
                    format!("Error rendering template {}, use debug on/see log", job.template),
                );
            }
        };

        if !self.applies_to_device(job) {
            debug!(device = %device, template_vars = %job.template_vars, "Render only");
            return Outcome::Record(ResultRecord::text(device, rendered));
        }
        let target_name = job.target.as_deref().unwrap_or(device);

        let target = match self.target(target_name) {
            Ok(target) => target,
            Err(e) => {
                error!(device = %device, template = %template_path.display(), error = %e, "netconf config lookup error");
                return Outcome::text(device, "netconf config lookup error");
            }
        };

        let mut session = match self.sessions.open(&target).await {
            Ok(session) => session,
            Err(e) => {
                error!(device = %device, target = %target, error = %e, "Error connecting to the device");
                return Outcome::text(device, "error connecting to the device");
            }
        };

        let outcome = match job.mode {
            JobMode::Diff | JobMode::Commit => {
                self.apply_config(job, &mut session, &rendered, &template_path, &md5)
                    .await
            }
            JobMode::Execute => {
                self.apply_handler(job, &mut session, &rendered, &template_path, &md5, collector)
                    .await
            }
        };

        if let Err(e) = session.close().await {
            warn!(device = %device, md5 = %md5, error = %e, "Error closing device");
        }
        outcome
    }

    /// Run an archival step on the blocking pool, returning its status suffix
    async fn archive<F>(&self, step: F) -> String
    where
        F: FnOnce(&Archiver) -> String + Send + 'static,
    {
        let archiver = self.archiver.clone();
        tokio::task::spawn_blocking(move || step(&archiver))
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "Archive task aborted");
                ARCHIVE_ERROR_SUFFIX.to_string()
            })
    }

    fn load_mode(job: &JobSpec) -> (Database, LoadFormat, bool) {
        match &job.ephemeral {
            Some(eph) => {
                let (format, overwrite) = eph.load_mode();
                (Database::Ephemeral(eph.instance.clone()), format, overwrite)
            }
            None => (Database::Candidate, LoadFormat::Set, false),
        }
    }

    async fn apply_config(
        &self,
        job: &JobSpec,
        session: &mut Box<dyn DeviceSession>,
        rendered: &str,
        template_path: &Path,
        md5: &str,
    ) -> Outcome {
        let device = job.device.as_str();
        let diff_only = job.mode == JobMode::Diff;
        let operation = if diff_only { "diff" } else { "commit" };
        info!(
            device = %device,
            template = %template_path.display(),
            md5 = %md5,
            "template {} start",
            if diff_only { "diff" } else { "push" }
        );

        let (database, format, overwrite) = Self::load_mode(job);
        let first = self
            .apply_once(session, &database, rendered, format, overwrite, diff_only)
            .await;

        let (result, stripped, payload) = match first {
            Ok(diff) => (Ok(diff), false, rendered.to_string()),
            Err(e) if e.is_config_error() && self.config.execution.strip_delete_retry => {
                warn!(
                    device = %device,
                    template = %template_path.display(),
                    error = %e,
                    "template {} rejected, retrying without delete cmds",
                    operation
                );
                let payload = strip_delete_commands(rendered);
                let retry = self
                    .apply_once(session, &database, &payload, format, overwrite, diff_only)
                    .await;
                (retry, true, payload)
            }
            Err(e) => (Err(e), false, rendered.to_string()),
        };

        let del_suffix = if stripped { " (-del cmds)" } else { "" };

        match result {
            Err(e) => {
                error!(
                    device = %device,
                    template = %template_path.display(),
                    md5 = %md5,
                    error = %e,
                    "error during template {}{}, rollback...",
                    operation,
                    del_suffix
                );
                Outcome::text(
                    device,
                    format!(
                        "error during template {}{}, rollback..., use debug on/see log",
                        operation, del_suffix
                    ),
                )
            }
            Ok(text) if diff_only => {
                info!(
                    device = %device,
                    template = %template_path.display(),
                    md5 = %md5,
                    stripped,
                    "{}",
                    if text.is_some() {
                        "diff exist between candidate and current config"
                    } else {
                        "no diff between candidate and current config"
                    }
                );
                Outcome::Diff { text, stripped }
            }
            Ok(_) => {
                let archive_msg = {
                    let (job, path) = (job.clone(), template_path.to_path_buf());
                    self.archive(move |archiver| archiver.archive_commit(&job, &path, &payload))
                        .await
                };
                info!(
                    device = %device,
                    template = %template_path.display(),
                    md5 = %md5,
                    "commit completed{}",
                    del_suffix
                );
                Outcome::text(
                    device,
                    format!(
                        "{} template commit completed{}{}",
                        job.template, del_suffix, archive_msg
                    ),
                )
            }
        }
    }

    /// One load plus diff-and-rollback or commit inside an opened database.
    ///
    /// Failed attempts are rolled back; the database is always closed.
    async fn apply_once(
        &self,
        session: &mut Box<dyn DeviceSession>,
        database: &Database,
        payload: &str,
        format: LoadFormat,
        overwrite: bool,
        diff_only: bool,
    ) -> SessionResult<Option<String>> {
        session.open_database(database).await?;

        let result = self
            .load_and_finish(session, payload, format, overwrite, diff_only)
            .await;

        if result.is_err() {
            if let Err(e) = session.rollback().await {
                warn!(error = %e, "Rollback after failed load failed");
            }
        }
        if let Err(e) = session.close_database().await {
            warn!(error = %e, "Error closing configuration database");
        }
        result
    }

    async fn load_and_finish(
        &self,
        session: &mut Box<dyn DeviceSession>,
        payload: &str,
        format: LoadFormat,
        overwrite: bool,
        diff_only: bool,
    ) -> SessionResult<Option<String>> {
        session.load(payload, format, overwrite).await?;
        if diff_only {
            let diff = session.diff().await?;
            session.rollback().await?;
            Ok(diff)
        } else {
            session.commit(self.config.execution.commit_timeout()).await?;
            Ok(None)
        }
    }

    async fn apply_handler(
        &self,
        job: &JobSpec,
        session: &mut Box<dyn DeviceSession>,
        rendered: &str,
        template_path: &Path,
        md5: &str,
        collector: &ResultCollector,
    ) -> Outcome {
        let device = job.device.as_str();

        if !self.config.execution.exec_enabled {
            info!(device = %device, "template execution not enabled");
            return Outcome::text(device, Error::ExecDisabled.to_string());
        }

        info!(
            device = %device,
            template = %template_path.display(),
            md5 = %md5,
            "code execution start"
        );

        let failure = || {
            Outcome::text(
                device,
                format!("Error executing code {}, use debug on/see log", job.template),
            )
        };

        let handler_name = job
            .handler
            .as_deref()
            .unwrap_or(&self.config.execution.default_handler);
        let Some(handler) = self.handlers.get(handler_name) else {
            error!(device = %device, handler = %handler_name, "Unknown execute handler");
            return failure();
        };

        let mut ctx = HandlerContext {
            device,
            template: &job.template,
            session,
        };

        match handler.produce_result(rendered, &mut ctx).await {
            Ok(output) => {
                if let Some(header) = output.header {
                    collector.set_header(header);
                }
                let archive_msg = {
                    let (job, path) = (job.clone(), template_path.to_path_buf());
                    let code = rendered.to_string();
                    self.archive(move |archiver| archiver.archive_exec(&job, &path, &code))
                        .await
                };
                if !archive_msg.is_empty() {
                    info!(device = %device, "template {}{}", job.template, archive_msg);
                }
                Outcome::Record(ResultRecord::new(
                    device,
                    Payload::from_value(output.result),
                    output.result_adv,
                ))
            }
            Err(e) => {
                error!(
                    device = %device,
                    template = %template_path.display(),
                    handler = %handler_name,
                    error = %e,
                    "Error executing code"
                );
                failure()
            }
        }
    }
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("templates", &self.templates.root())
            .field("vars", &self.vars)
            .field("handlers", &self.handlers)
            .finish()
    }
}
