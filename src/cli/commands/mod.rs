//! Subcommands module for the template-ops CLI
//!
//! This module contains all the subcommand implementations.

pub mod inventory;
pub mod profile;
pub mod render;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use template_ops::config::Config;
use template_ops::device::NetconfSessionFactory;
use template_ops::executor::JobExecutor;
use template_ops::profile::ProfileRegistry;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Arc<Config>,
    /// Profile inventory path
    pub inventory_path: PathBuf,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        let inventory_path = cli
            .inventory
            .clone()
            .unwrap_or_else(|| config.paths.inventory.clone());

        Self {
            config: Arc::new(config),
            inventory_path,
        }
    }

    /// Load the profile registry, failing when the inventory file is missing
    pub fn registry(&self) -> Result<ProfileRegistry> {
        ProfileRegistry::from_file(&self.inventory_path).with_context(|| {
            format!(
                "Failed to load profile inventory: {}",
                self.inventory_path.display()
            )
        })
    }

    /// Load the profile registry, or an empty one when no inventory exists
    pub fn registry_or_empty(&self) -> Result<ProfileRegistry> {
        if self.inventory_path.exists() {
            self.registry()
        } else {
            debug!(path = %self.inventory_path.display(), "No profile inventory, using empty registry");
            Ok(ProfileRegistry::default())
        }
    }

    /// Build a job executor backed by NETCONF sessions
    pub fn executor(&self, registry: ProfileRegistry) -> Result<JobExecutor> {
        let sessions = Arc::new(NetconfSessionFactory::new(self.config.netconf.clone()));
        let executor = JobExecutor::new(Arc::clone(&self.config), Arc::new(registry), sessions)?;
        Ok(executor)
    }
}

/// Trait for runnable commands
#[async_trait::async_trait]
pub trait Runnable {
    /// Execute the command, returning the process exit code
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32>;
}
