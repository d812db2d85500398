//! Per-device settings records and the settings resolver.
//!
//! A profile maps device names to sparse [`DeviceSettings`] records. The
//! resolver overlays a device record on the profile's `default` record and
//! fills the remaining gaps from process-wide defaults, producing a
//! [`JobSpec`] owned by exactly one job executor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::ArchiveConfig;
use crate::error::{Error, Result};
use crate::merge::{self, pick, Overlay};

/// Payload format used when loading configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadFormat {
    /// `set`/`delete` statements
    #[default]
    Set,
    /// JSON configuration
    Json,
    /// XML configuration
    Xml,
    /// Curly-brace text configuration
    Text,
}

impl LoadFormat {
    /// Format name as used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadFormat::Set => "set",
            LoadFormat::Json => "json",
            LoadFormat::Xml => "xml",
            LoadFormat::Text => "text",
        }
    }
}

impl fmt::Display for LoadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "set" => Ok(LoadFormat::Set),
            "json" => Ok(LoadFormat::Json),
            "xml" => Ok(LoadFormat::Xml),
            "text" => Ok(LoadFormat::Text),
            other => Err(Error::InvalidConfig {
                key: "eph_inst".to_string(),
                message: format!("invalid format '{}', valid formats: set, json, xml, text", other),
            }),
        }
    }
}

/// Ephemeral configuration database target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EphemeralSpec")]
pub struct EphemeralTarget {
    /// Ephemeral instance name
    pub instance: String,
    /// Payload format, `set` when absent
    pub format: Option<LoadFormat>,
}

/// Accepted spellings of an ephemeral target in profile files.
#[derive(Deserialize)]
#[serde(untagged)]
enum EphemeralSpec {
    Short(String),
    Full {
        instance: String,
        #[serde(default)]
        format: Option<LoadFormat>,
    },
}

impl TryFrom<EphemeralSpec> for EphemeralTarget {
    type Error = Error;

    fn try_from(spec: EphemeralSpec) -> Result<Self> {
        match spec {
            EphemeralSpec::Short(s) => s.parse(),
            EphemeralSpec::Full { instance, format } => Ok(Self { instance, format }),
        }
    }
}

impl FromStr for EphemeralTarget {
    type Err = Error;

    /// Parses `instance` or `instance:format` (also `instance,format`).
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(2, [':', ',']);
        let instance = parts.next().unwrap_or_default().trim();
        if instance.is_empty() {
            return Err(Error::InvalidConfig {
                key: "eph_inst".to_string(),
                message: "ephemeral instance name is empty".to_string(),
            });
        }
        let format = parts.next().map(|f| f.trim().parse()).transpose()?;
        Ok(Self {
            instance: instance.to_string(),
            format,
        })
    }
}

impl EphemeralTarget {
    /// Load format and overwrite flag for this target.
    ///
    /// `json`/`xml`/`text` payloads replace the ephemeral contents because
    /// incremental deletes against the ephemeral store are too slow; `set`
    /// payloads are loaded incrementally.
    pub fn load_mode(&self) -> (LoadFormat, bool) {
        match self.format {
            Some(format @ (LoadFormat::Json | LoadFormat::Xml | LoadFormat::Text)) => (format, true),
            _ => (LoadFormat::Set, false),
        }
    }
}

impl fmt::Display for EphemeralTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instance, self.format.unwrap_or_default())
    }
}

/// Archival override carried by a profile record.
///
/// Applies to both the commit and execute archival pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveOverride {
    /// Archive the rendered payload
    pub rendered: bool,
    /// Archive the template source
    pub template: bool,
}

/// Sparse settings record for one device (or the profile `default`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceSettings {
    /// Template name (without `.j2`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Template variable generator selector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_vars: Option<String>,
    /// Generator input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Execute rendered output through a handler instead of loading it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec: Option<bool>,
    /// Execute-mode handler name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    /// Ephemeral database target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eph_inst: Option<EphemeralTarget>,
    /// Archival override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveOverride>,
}

impl Overlay for DeviceSettings {
    fn overlay(&self, over: &Self) -> Self {
        Self {
            template: pick(&self.template, &over.template),
            template_vars: pick(&self.template_vars, &over.template_vars),
            input: pick(&self.input, &over.input),
            exec: pick(&self.exec, &over.exec),
            handler: pick(&self.handler, &over.handler),
            eph_inst: pick(&self.eph_inst, &over.eph_inst),
            archive: pick(&self.archive, &over.archive),
        }
    }
}

/// How a job applies its rendered output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    /// Load, compute the diff, always roll back
    Diff,
    /// Load and commit
    Commit,
    /// Run the rendered output through an execute-mode handler
    Execute,
}

/// Resolved archival switches for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveFlags {
    /// Archive the template after commit
    pub commit_template: bool,
    /// Archive the rendered payload after commit
    pub commit_payload: bool,
    /// Archive the template after execution
    pub exec_template: bool,
    /// Archive the rendered code after execution
    pub exec_payload: bool,
}

impl ArchiveFlags {
    /// Process-wide defaults with an optional profile override applied.
    pub fn resolve(defaults: &ArchiveConfig, over: Option<ArchiveOverride>) -> Self {
        match over {
            Some(o) => Self {
                commit_template: o.template,
                commit_payload: o.rendered,
                exec_template: o.template,
                exec_payload: o.rendered,
            },
            None => Self {
                commit_template: defaults.commit_template,
                commit_payload: defaults.commit_payload,
                exec_template: defaults.exec_template,
                exec_payload: defaults.exec_payload,
            },
        }
    }
}

/// Fully resolved work item for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Identifier used for result records and logs
    pub device: String,
    /// Device to apply to, `None` for a render-only preview
    pub target: Option<String>,
    /// Template name (without `.j2`)
    pub template: String,
    /// Template variable generator selector
    pub template_vars: String,
    /// Generator input
    pub input: String,
    /// Apply mode
    pub mode: JobMode,
    /// Execute-mode handler, process default when `None`
    pub handler: Option<String>,
    /// Ephemeral database target
    pub ephemeral: Option<EphemeralTarget>,
    /// Archival switches
    pub archive: ArchiveFlags,
    /// Stage timestamp used in archive file names
    pub timestamp: String,
}

impl JobSpec {
    /// Builds a job for an ad-hoc single-device invocation.
    #[allow(clippy::too_many_arguments)]
    pub fn single(
        template: impl Into<String>,
        template_vars: impl Into<String>,
        input: impl Into<String>,
        target: Option<String>,
        mode: JobMode,
        ephemeral: Option<EphemeralTarget>,
        archive: &ArchiveConfig,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            device: target.clone().unwrap_or_else(|| "N/A".to_string()),
            target,
            template: template.into(),
            template_vars: template_vars.into(),
            input: input.into(),
            mode,
            handler: None,
            ephemeral,
            archive: ArchiveFlags::resolve(archive, None),
            timestamp: timestamp.into(),
        }
    }

    /// Template file name under the search root
    pub fn template_file(&self) -> String {
        format!("{}.j2", self.template)
    }
}

/// Resolves the job spec for `device` of profile `profile`.
///
/// `devices` is the profile's record map including the optional `default`
/// entry. `input_override` replaces the merged input when given.
pub fn resolve(
    profile: &str,
    devices: &indexmap::IndexMap<String, DeviceSettings>,
    device: &str,
    input_override: Option<&str>,
    archive_defaults: &ArchiveConfig,
    timestamp: &str,
) -> Result<JobSpec> {
    let merged = merge::resolve(devices, device).ok_or_else(|| Error::Config(format!(
        "device '{}' is not part of profile '{}'",
        device, profile
    )))?;

    let missing = |field| Error::MissingSetting {
        profile: profile.to_string(),
        device: device.to_string(),
        field,
    };

    let template = merged.template.clone().ok_or_else(|| missing("template"))?;
    let template_vars = merged
        .template_vars
        .clone()
        .ok_or_else(|| missing("template_vars"))?;
    let input = input_override
        .map(str::to_string)
        .or(merged.input.clone())
        .unwrap_or_default();

    let mode = if merged.exec.unwrap_or(false) {
        JobMode::Execute
    } else {
        JobMode::Commit
    };

    Ok(JobSpec {
        device: device.to_string(),
        target: Some(device.to_string()),
        template,
        template_vars,
        input,
        mode,
        handler: merged.handler,
        ephemeral: merged.eph_inst,
        archive: ArchiveFlags::resolve(archive_defaults, merged.archive),
        timestamp: timestamp.to_string(),
    })
}
