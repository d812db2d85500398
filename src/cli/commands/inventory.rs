//! Inventory commands - list and show profiles and templates
//!
//! This module implements the `list` and `show` subcommands.

use anyhow::Result;
use clap::{Parser, ValueEnum};

use super::{CommandContext, Runnable};
use template_ops::report;
use template_ops::template::TemplateRenderer;

/// What `list` prints
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListKind {
    /// Profiles with their comments
    Profiles,
    /// Multi-profiles with their comments
    Mprofiles,
    /// Templates with their md5 digests
    Templates,
}

/// What `show` prints
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShowKind {
    /// Device settings of a profile
    Profile,
    /// Stages of a multi-profile
    Mprofile,
    /// Template source
    Template,
}

/// Arguments for the list command
#[derive(Parser, Debug, Clone)]
pub struct ListArgs {
    /// Item kind to list
    #[arg(value_enum)]
    pub kind: ListKind,
}

/// Arguments for the show command
#[derive(Parser, Debug, Clone)]
pub struct ShowArgs {
    /// Item kind to show
    #[arg(value_enum)]
    pub kind: ShowKind,

    /// Name, 1-based index, or `all` for profiles and multi-profiles
    pub key: String,
}

#[async_trait::async_trait]
impl Runnable for ListArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let output = match self.kind {
            ListKind::Profiles => report::list_profiles(&ctx.registry()?),
            ListKind::Mprofiles => report::list_multi_profiles(&ctx.registry()?),
            ListKind::Templates => {
                let templates = TemplateRenderer::new(&ctx.config.paths.templates);
                let entries = templates.list()?;
                report::list_templates(&templates.root().display().to_string(), &entries)
            }
        };
        print!("{}", output);
        Ok(0)
    }
}

#[async_trait::async_trait]
impl Runnable for ShowArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let output = match self.kind {
            ShowKind::Profile => report::show_profiles(&ctx.registry()?, &self.key)?,
            ShowKind::Mprofile => report::show_multi_profiles(&ctx.registry()?, &self.key)?,
            ShowKind::Template => {
                let source = TemplateRenderer::new(&ctx.config.paths.templates).show(&self.key)?;
                format!("{}\n", source)
            }
        };
        print!("{}", output);
        Ok(0)
    }
}
