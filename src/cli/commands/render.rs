//! Render command - single device operation
//!
//! Renders one template and, depending on the target flag, prints it,
//! diffs it against the device, commits it or executes it.

use anyhow::Result;
use clap::{ArgGroup, Parser};
use tracing::info;

use super::{CommandContext, Runnable};
use template_ops::executor::collector::ResultCollector;
use template_ops::executor::stage_timestamp;
use template_ops::profile::{EphemeralTarget, JobMode, JobSpec};
use template_ops::report;

/// Arguments for the render command
#[derive(Parser, Debug, Clone)]
#[command(group(ArgGroup::new("target").args(["diff_target", "push_target", "exec_target"])))]
pub struct RenderArgs {
    /// Template variable generator selector
    #[arg(long = "template-vars")]
    pub template_vars: String,

    /// Template name (without .j2)
    #[arg(long)]
    pub template: String,

    /// Generator input
    #[arg(long)]
    pub input: String,

    /// Load the rendered configuration, print the diff and roll back
    #[arg(long = "diff-target")]
    pub diff_target: Option<String>,

    /// Load and commit the rendered configuration
    #[arg(long = "push-target")]
    pub push_target: Option<String>,

    /// Execute the rendered output with the default handler
    #[arg(long = "exec-target")]
    pub exec_target: Option<String>,

    /// Ephemeral database as instance[:format]
    #[arg(long = "eph-instance", conflicts_with_all = ["diff_target", "exec_target"])]
    pub eph_instance: Option<EphemeralTarget>,
}

impl RenderArgs {
    /// Target device and apply mode selected by the flags
    pub fn target(&self) -> (Option<String>, JobMode) {
        if let Some(target) = &self.diff_target {
            (Some(target.clone()), JobMode::Diff)
        } else if let Some(target) = &self.push_target {
            (Some(target.clone()), JobMode::Commit)
        } else if let Some(target) = &self.exec_target {
            (Some(target.clone()), JobMode::Execute)
        } else {
            (None, JobMode::Commit)
        }
    }
}

#[async_trait::async_trait]
impl Runnable for RenderArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let (target, mode) = self.target();
        let registry = if target.is_some() {
            ctx.registry_or_empty()?
        } else {
            Default::default()
        };
        let executor = ctx.executor(registry)?;

        let job = JobSpec::single(
            &self.template,
            &self.template_vars,
            &self.input,
            target,
            mode,
            self.eph_instance.clone(),
            &ctx.config.archive,
            stage_timestamp(),
        );
        info!(
            device = %job.device,
            template = %job.template,
            mode = ?job.mode,
            applies = executor.applies_to_device(&job),
            "Single device operation"
        );

        let collector = ResultCollector::new();
        if !executor.applies_to_device(&job) {
            // previews print verbatim, failures fall through to the result table
            if let Ok(rendered) = executor.preview(&job, &collector) {
                print!("{}", rendered);
                return Ok(0);
            }
        }
        executor.run(&job, &collector).await;
        print!("{}", report::render_results(&collector.snapshot(), &collector.header()));

        Ok(0)
    }
}
