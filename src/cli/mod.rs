//! CLI module for template-ops
//!
//! This module provides the command-line interface for template-ops,
//! including argument parsing and subcommand handling.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// template-ops - Jinja2 templates applied to device fleets
///
/// Renders templates into device configuration and diffs, commits or
/// executes them on single devices, profiles and multi-profiles.
#[derive(Parser, Debug, Clone)]
#[command(name = "template-ops")]
#[command(author = "template-ops Contributors")]
#[command(version)]
#[command(about = "Render and apply configuration templates to device fleets", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print full error details instead of the summary line
    #[arg(long, global = true)]
    pub debug: bool,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "TEMPLATE_OPS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the profile inventory file
    #[arg(short = 'i', long, global = true)]
    pub inventory: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Render a template, optionally diffing, pushing or executing it on one device
    Render(commands::render::RenderArgs),

    /// Run every device of a profile
    Profile(commands::profile::ProfileArgs),

    /// Run the stages of a multi-profile in order
    #[command(name = "mprofile")]
    MultiProfile(commands::profile::MultiProfileArgs),

    /// List profiles, multi-profiles or templates
    List(commands::inventory::ListArgs),

    /// Show profile, multi-profile or template details
    Show(commands::inventory::ShowArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Whether colored output is disabled by flag or environment
    pub fn color_disabled(&self) -> bool {
        self.no_color || env::no_color()
    }
}

/// Environment variable helper functions
pub mod env {
    use std::env;

    /// Check if colors should be disabled
    pub fn no_color() -> bool {
        env::var_os("NO_COLOR").is_some()
    }
}
