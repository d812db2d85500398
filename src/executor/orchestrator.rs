//! Multi-profile orchestrator.
//!
//! Stages run strictly in order: a stage starts only after the previous one
//! joined all of its device jobs and slept its post-delay. A stage failing
//! its pre-flight checks aborts the remaining stages; reports of completed
//! stages have already been delivered.

use tracing::{error, info};

use super::batch::{BatchCoordinator, StageReport};
use crate::error::Result;
use crate::profile::Stage;

/// Runs single profiles and multi-profiles.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    batch: BatchCoordinator,
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(batch: BatchCoordinator) -> Self {
        Self { batch }
    }

    /// Batch coordinator
    pub fn batch(&self) -> &BatchCoordinator {
        &self.batch
    }

    /// Run one profile by name or 1-based index
    pub async fn run_profile<F>(&self, key: &str, input: Option<&str>, mut on_report: F) -> Result<()>
    where
        F: FnMut(&StageReport),
    {
        let report = self.batch.run_stage(&Stage::immediate(key), input).await?;
        on_report(&report);
        Ok(())
    }

    /// Run every stage of a multi-profile, returning the number of stages run
    pub async fn run_multi_profile<F>(
        &self,
        key: &str,
        input: Option<&str>,
        mut on_report: F,
    ) -> Result<usize>
    where
        F: FnMut(&StageReport),
    {
        let (name, multi) = self.batch.executor().registry().multi_profile(key)?;
        let name = name.to_string();
        let stages = multi.stages.clone();
        info!(multi_profile = %name, stages = stages.len(), "Starting multi profile");

        for (index, stage) in stages.iter().enumerate() {
            match self.batch.run_stage(stage, input).await {
                Ok(report) => on_report(&report),
                Err(e) => {
                    error!(
                        multi_profile = %name,
                        stage = index + 1,
                        profile = %stage.profile,
                        error = %e,
                        "Stage failed, skipping remaining stages"
                    );
                    return Err(e);
                }
            }
        }

        Ok(stages.len())
    }
}
