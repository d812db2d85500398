//! Profile commands - multi device operations
//!
//! This module implements the `profile` and `mprofile` subcommands.

use anyhow::Result;
use clap::Parser;

use super::{CommandContext, Runnable};
use template_ops::executor::batch::{BatchCoordinator, StageReport};
use template_ops::executor::orchestrator::Orchestrator;

/// Arguments for the profile command
#[derive(Parser, Debug, Clone)]
pub struct ProfileArgs {
    /// Profile name or 1-based index
    pub profile: String,

    /// Override the input of every device
    #[arg(long)]
    pub input: Option<String>,
}

/// Arguments for the mprofile command
#[derive(Parser, Debug, Clone)]
pub struct MultiProfileArgs {
    /// Multi-profile name or 1-based index
    pub mprofile: String,

    /// Override the input of every device in every stage
    #[arg(long)]
    pub input: Option<String>,
}

fn print_report(report: &StageReport) {
    print!("{}", report.output);
}

fn orchestrator(ctx: &CommandContext) -> Result<Orchestrator> {
    let executor = ctx.executor(ctx.registry()?)?;
    Ok(Orchestrator::new(BatchCoordinator::new(executor)))
}

#[async_trait::async_trait]
impl Runnable for ProfileArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let orchestrator = orchestrator(ctx)?;
        orchestrator
            .run_profile(&self.profile, self.input.as_deref(), print_report)
            .await?;
        Ok(0)
    }
}

#[async_trait::async_trait]
impl Runnable for MultiProfileArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let orchestrator = orchestrator(ctx)?;
        orchestrator
            .run_multi_profile(&self.mprofile, self.input.as_deref(), print_report)
            .await?;
        Ok(0)
    }
}
