//! Batch coordinator: one profile stage.
//!
//! A stage resolves the profile, checks the fan-out guard, sleeps the
//! pre-delay, spawns one task per device, joins them all, sleeps the
//! post-delay, renders the report and clears the text results.

use futures::future::join_all;
use std::time::Instant;
use tracing::{error, info};

use super::collector::{ResultCollector, ResultRecord};
use super::{stage_timestamp, JobExecutor};
use crate::error::{Error, Result};
use crate::profile::Stage;
use crate::report;

/// Status recorded for a device whose settings could not be resolved.
pub const PROFILE_READ_ERROR: &str = "Error reading device profile, use debug on/see log";

/// Status recorded for a device task that did not finish.
pub const JOB_ABORTED: &str = "device job aborted, see log";

/// Outcome of one completed stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    /// Resolved profile name
    pub profile: String,
    /// Number of device jobs launched
    pub devices: usize,
    /// Rendered result table
    pub output: String,
}

/// Runs profile stages against a shared result collector.
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    executor: JobExecutor,
    collector: ResultCollector,
}

impl BatchCoordinator {
    /// Create a coordinator with an empty collector
    pub fn new(executor: JobExecutor) -> Self {
        Self {
            executor,
            collector: ResultCollector::new(),
        }
    }

    /// Shared result collector
    pub fn collector(&self) -> &ResultCollector {
        &self.collector
    }

    /// Job executor
    pub fn executor(&self) -> &JobExecutor {
        &self.executor
    }

    /// Run one stage.
    ///
    /// Fails only before any device job started: unknown profile or fan-out
    /// guard exceeded. Device failures end up in the report.
    pub async fn run_stage(&self, stage: &Stage, input_override: Option<&str>) -> Result<StageReport> {
        let config = self.executor.config();
        let registry = self.executor.registry();

        let (name, profile) = registry.profile(&stage.profile)?;
        let devices: Vec<String> = profile.device_names().map(str::to_string).collect();

        let max = config.execution.max_profile_devices;
        if devices.len() > max {
            let err = Error::FanOutExceeded {
                profile: name.to_string(),
                devices: devices.len(),
                max,
            };
            error!(profile = %name, "{}", err);
            return Err(err);
        }

        if stage.pre_delay > 0 {
            info!(profile = %name, seconds = stage.pre_delay, "Pre-delay");
            tokio::time::sleep(stage.pre_delay()).await;
        }

        let timestamp = stage_timestamp();
        let start = Instant::now();
        info!(profile = %name, devices = devices.len(), "Starting profile stage");

        let handles: Vec<_> = devices
            .iter()
            .map(|device| {
                let job = crate::profile::resolve(
                    name,
                    &profile.devices,
                    device,
                    input_override,
                    &config.archive,
                    &timestamp,
                );
                let executor = self.executor.clone();
                let collector = self.collector.clone();
                let device = device.clone();

                tokio::spawn(async move {
                    match job {
                        Ok(job) => executor.run(&job, &collector).await,
                        Err(e) => {
                            error!(device = %device, error = %e, "Error reading device profile");
                            collector.push(ResultRecord::text(&device, PROFILE_READ_ERROR));
                        }
                    }
                })
            })
            .collect();

        let results = join_all(handles).await;

        for (device, result) in devices.iter().zip(results) {
            if let Err(e) = result {
                error!(device = %device, error = %e, "Device job aborted");
                self.collector.push(ResultRecord::text(device, JOB_ABORTED));
            }
        }

        info!(
            profile = %name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Profile stage completed"
        );

        if stage.post_delay > 0 {
            info!(profile = %name, seconds = stage.post_delay, "Post-delay");
            tokio::time::sleep(stage.post_delay()).await;
        }

        let output = report::render_results(&self.collector.snapshot(), &self.collector.header());
        self.collector.clear_text();

        Ok(StageReport {
            profile: name.to_string(),
            devices: devices.len(),
            output,
        })
    }
}
