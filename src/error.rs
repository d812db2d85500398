//! Error types for template-ops.
//!
//! Errors fall into three families which decide how far a failure travels:
//!
//! - **Configuration errors** (unknown profile, fan-out guard, unknown
//!   generator) abort a whole stage before any device job starts.
//! - **Per-device errors** (missing template, render failure, session and
//!   commit failures) are converted into a result record by the job executor
//!   and never leave the worker.
//! - **Archival errors** are logged and otherwise ignored.

use std::path::PathBuf;
use thiserror::Error;

use crate::device::SessionError;

/// Result type alias for template-ops operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for template-ops.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Profile not found in the registry.
    #[error("No matching profile {0}")]
    ProfileNotFound(String),

    /// Multi-profile not found in the registry.
    #[error("No matching multi profile {0}")]
    MultiProfileNotFound(String),

    /// Profile has more devices than the configured fan-out allows.
    #[error("{profile} profile number of targets ({devices}) > max profile devices ({max}) setting")]
    FanOutExceeded {
        /// Profile name
        profile: String,
        /// Device count excluding the default record
        devices: usize,
        /// Configured maximum
        max: usize,
    },

    /// Template variable generator selector is not registered.
    #[error("Unknown template vars selector '{0}'")]
    UnknownGenerator(String),

    /// Generator input could not be interpreted.
    #[error("Invalid input '{input}' for template vars '{selector}': {message}")]
    InvalidInput {
        /// Generator selector
        selector: String,
        /// Raw input string
        input: String,
        /// Error message
        message: String,
    },

    /// Device settings are missing a required field.
    #[error("Device '{device}' in profile '{profile}' has no '{field}' setting")]
    MissingSetting {
        /// Profile name
        profile: String,
        /// Device name
        device: String,
        /// Missing field name
        field: &'static str,
    },

    /// No auth profile entry for a remote device.
    #[error("No auth profile for device '{0}'")]
    AuthNotFound(String),

    /// A second diff result was produced in one stage.
    #[error("Diff result already recorded for this stage, refusing diff from '{0}'")]
    DuplicateDiff(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Template Errors
    // ========================================================================
    /// Template file does not exist under the search root.
    #[error("Error opening template file {0}, file doesn't exist")]
    TemplateNotFound(String),

    /// Template rendering error.
    #[error("Template rendering failed for '{template}': {message}")]
    TemplateRender {
        /// Template name
        template: String,
        /// Error message
        message: String,
    },

    /// Template engine error.
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    // ========================================================================
    // Device Errors
    // ========================================================================
    /// Device session error.
    #[error(transparent)]
    Session(#[from] SessionError),

    // ========================================================================
    // Execute Mode Errors
    // ========================================================================
    /// Execute-mode handler failed or is unknown.
    #[error("Handler '{handler}' failed: {message}")]
    Handler {
        /// Handler name
        handler: String,
        /// Error message
        message: String,
    },

    /// Execute mode requested while disabled for the process.
    #[error("template execution not enabled")]
    ExecDisabled,

    // ========================================================================
    // IO Errors
    // ========================================================================
    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ========================================================================
    // Serialization Errors
    // ========================================================================
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl Error {
    /// Creates a new template render error.
    pub fn template_render(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TemplateRender {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Creates a new handler error.
    pub fn handler(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            handler: handler.into(),
            message: message.into(),
        }
    }

    /// Creates a new invalid input error.
    pub fn invalid_input(
        selector: impl Into<String>,
        input: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidInput {
            selector: selector.into(),
            input: input.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error aborts a whole stage before any device work.
    pub fn is_stage_fatal(&self) -> bool {
        matches!(
            self,
            Error::ProfileNotFound(_)
                | Error::MultiProfileNotFound(_)
                | Error::FanOutExceeded { .. }
                | Error::Config(_)
                | Error::InvalidConfig { .. }
        )
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ProfileNotFound(_) | Error::MultiProfileNotFound(_) => 2,
            Error::FanOutExceeded { .. } => 3,
            Error::Config(_)
            | Error::InvalidConfig { .. }
            | Error::YamlParse(_)
            | Error::TomlParse(_)
            | Error::JsonParse(_) => 4,
            Error::TemplateNotFound(_) | Error::TemplateRender { .. } | Error::Template(_) => 5,
            _ => 1,
        }
    }
}
