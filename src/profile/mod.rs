//! Profile registry.
//!
//! The registry is loaded once from the inventory file and is read-only at
//! run time. It holds:
//!
//! - **profiles**: named device sets, each device carrying a sparse
//!   [`DeviceSettings`] record with an optional `default` record
//! - **multi_profiles**: named ordered lists of profile stages with pacing delays
//! - **auth**: per-device connection credentials, again with a `default` record
//! - **groups**: reusable device lists that profiles can pull in
//!
//! # Example
//!
//! ```yaml
//! auth:
//!   default: { user: template-ops, port: 830, ssh_key: ~/.ssh/id_rsa }
//!   vsrx-01: { host: 10.0.0.11 }
//! groups:
//!   vsrx: [vsrx-01, vsrx-02]
//! profiles:
//!   version:
//!     comment: show Junos versions
//!     groups: [vsrx]
//!     devices:
//!       default: { template_vars: exec1, template: version, input: "", exec: true }
//! multi_profiles:
//!   status:
//!     comment: alarm and version info
//!     stages:
//!       - { profile: version, pre_delay: 1 }
//!       - { profile: alarm }
//! ```

pub mod settings;

pub use settings::{
    resolve, ArchiveFlags, ArchiveOverride, DeviceSettings, EphemeralTarget, JobMode, JobSpec,
    LoadFormat,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::device::Credentials;
use crate::error::{Error, Result};
use crate::merge::{self, pick, Overlay, DEFAULT_KEY};

/// Default NETCONF port when the auth profile does not set one.
pub const DEFAULT_NETCONF_PORT: u16 = 830;

/// A named device set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    /// Human readable description
    pub comment: String,
    /// Groups whose members join this profile with empty settings records
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    /// Device name -> settings record, may include `default`
    pub devices: IndexMap<String, DeviceSettings>,
}

impl Profile {
    /// Device names excluding `default`, in declaration order
    pub fn device_names(&self) -> impl Iterator<Item = &str> {
        merge::member_names(&self.devices)
    }

    /// Number of devices excluding `default`
    pub fn device_count(&self) -> usize {
        self.device_names().count()
    }

    /// Merged settings of one device
    pub fn settings(&self, device: &str) -> Option<DeviceSettings> {
        merge::resolve(&self.devices, device)
    }
}

/// One stage of a multi-profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Profile to run
    pub profile: String,
    /// Seconds to sleep before launching the stage
    #[serde(default, alias = "pre-delay")]
    pub pre_delay: u64,
    /// Seconds to sleep after every device job of the stage completed
    #[serde(default, alias = "post-delay")]
    pub post_delay: u64,
}

impl Stage {
    /// A stage without pacing delays
    pub fn immediate(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            pre_delay: 0,
            post_delay: 0,
        }
    }

    /// Pre-delay as a duration
    pub fn pre_delay(&self) -> Duration {
        Duration::from_secs(self.pre_delay)
    }

    /// Post-delay as a duration
    pub fn post_delay(&self) -> Duration {
        Duration::from_secs(self.post_delay)
    }
}

/// A named, ordered sequence of profile stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiProfile {
    /// Human readable description
    pub comment: String,
    /// Stages in execution order, repeats allowed
    pub stages: Vec<Stage>,
}

/// Sparse connection record for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthRecord {
    /// Management address
    pub host: Option<String>,
    /// Login user
    pub user: Option<String>,
    /// NETCONF port
    pub port: Option<u16>,
    /// SSH private key file
    pub ssh_key: Option<String>,
}

impl Overlay for AuthRecord {
    fn overlay(&self, over: &Self) -> Self {
        Self {
            host: pick(&self.host, &over.host),
            user: pick(&self.user, &over.user),
            port: pick(&self.port, &over.port),
            ssh_key: pick(&self.ssh_key, &over.ssh_key),
        }
    }
}

/// Static registry of profiles, multi-profiles and auth records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileRegistry {
    /// Device name -> auth record, may include `default`
    pub auth: IndexMap<String, AuthRecord>,
    /// Group name -> device names
    pub groups: IndexMap<String, Vec<String>>,
    /// Profile name -> profile
    pub profiles: IndexMap<String, Profile>,
    /// Multi-profile name -> multi-profile
    pub multi_profiles: IndexMap<String, MultiProfile>,
}

impl ProfileRegistry {
    /// Load the registry from a YAML inventory file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(PathBuf::from(path)));
        }
        let content = std::fs::read_to_string(path)?;
        let registry = Self::parse(&content)?;
        debug!(
            path = %path.display(),
            profiles = registry.profiles.len(),
            multi_profiles = registry.multi_profiles.len(),
            "Loaded profile registry"
        );
        Ok(registry)
    }

    /// Parse a registry from YAML text and expand group references
    pub fn parse(content: &str) -> Result<Self> {
        let mut registry: ProfileRegistry = serde_yaml::from_str(content)?;
        registry.expand_groups()?;
        registry.validate()?;
        Ok(registry)
    }

    fn expand_groups(&mut self) -> Result<()> {
        for (name, profile) in self.profiles.iter_mut() {
            for group in &profile.groups {
                let members = self.groups.get(group).ok_or_else(|| {
                    Error::Config(format!("profile '{}' references unknown group '{}'", name, group))
                })?;
                for member in members {
                    profile.devices.entry(member.clone()).or_default();
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (name, multi) in &self.multi_profiles {
            if let Some(stage) = multi
                .stages
                .iter()
                .find(|s| !self.profiles.contains_key(&s.profile))
            {
                tracing::warn!(
                    multi_profile = %name,
                    profile = %stage.profile,
                    "Multi-profile stage references unknown profile"
                );
            }
        }
        Ok(())
    }

    /// Look up a profile by name or 1-based index
    pub fn profile(&self, key: &str) -> Result<(&str, &Profile)> {
        lookup(&self.profiles, key).ok_or_else(|| Error::ProfileNotFound(key.to_string()))
    }

    /// Look up a multi-profile by name or 1-based index
    pub fn multi_profile(&self, key: &str) -> Result<(&str, &MultiProfile)> {
        lookup(&self.multi_profiles, key)
            .ok_or_else(|| Error::MultiProfileNotFound(key.to_string()))
    }

    /// Connection credentials for a remote device
    pub fn credentials(&self, device: &str) -> Result<Credentials> {
        let record = merge::resolve(&self.auth, device)
            .filter(|_| device != DEFAULT_KEY)
            .ok_or_else(|| Error::AuthNotFound(device.to_string()))?;

        let host = record
            .host
            .ok_or_else(|| Error::AuthNotFound(device.to_string()))?;

        Ok(Credentials {
            host,
            user: record.user,
            port: record.port.unwrap_or(DEFAULT_NETCONF_PORT),
            ssh_key: record
                .ssh_key
                .map(|k| PathBuf::from(shellexpand::tilde(&k).into_owned())),
        })
    }
}

/// Resolves `key` as a name first, then as a 1-based declaration index.
fn lookup<'a, T>(map: &'a IndexMap<String, T>, key: &str) -> Option<(&'a str, &'a T)> {
    if let Some((name, value)) = map.get_key_value(key) {
        return Some((name.as_str(), value));
    }
    let index: usize = key.parse().ok()?;
    if index == 0 {
        return None;
    }
    map.get_index(index - 1).map(|(name, value)| (name.as_str(), value))
}
