//! # template-ops - Template-driven configuration for device fleets
//!
//! template-ops renders Jinja2 templates into device configuration (set
//! commands, JSON, XML or text) and applies them to one device or to a whole
//! profile of devices in parallel. A job either previews the rendered output,
//! computes the configuration diff and rolls back, commits, or runs the output
//! as operational code through an execute-mode handler.
//!
//! ## Core Concepts
//!
//! - **Profiles**: named device sets with sparse per-device settings and a `default` record
//! - **Multi-profiles**: ordered profile stages with pre/post delays
//! - **Variable generators**: derive template variables from a single input string
//! - **Device sessions**: NETCONF sessions to remote devices or the local box
//! - **Result collector**: shared per-stage buffer rendered as one table
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                              │
//! │                    (clap-based command parsing)                      │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │               Orchestrator  ->  Batch Coordinator                    │
//! │           (stages in order, devices concurrently via tokio)          │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!          ┌─────────────────────────┼─────────────────────────┐
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │ Profile Registry│   │    Job Executor     │   │   Template Engine   │
//! │  (settings      │   │  (diff / commit /   │   │   (Jinja2-compat    │
//! │   resolver)     │   │   execute)          │   │    via minijinja)   │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Device Sessions                              │
//! │                 (NETCONF over ssh or on-box cli)                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use template_ops::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Arc::new(Config::load(None)?);
//!     let registry = Arc::new(ProfileRegistry::from_file(&config.paths.inventory)?);
//!     let sessions = Arc::new(NetconfSessionFactory::new(config.netconf.clone()));
//!
//!     let executor = JobExecutor::new(config, registry, sessions)?;
//!     let orchestrator = Orchestrator::new(BatchCoordinator::new(executor));
//!
//!     orchestrator
//!         .run_multi_profile("status", None, |report| println!("{}", report.output))
//!         .await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    // Configuration
    pub use crate::config::Config;

    // Device sessions
    pub use crate::device::{
        Credentials, Database, DeviceSession, NetconfSessionFactory, SessionError, SessionFactory,
        SessionResult, Target,
    };

    // Error handling
    pub use crate::error::{Error, Result};

    // Execution engine
    pub use crate::executor::batch::{BatchCoordinator, StageReport};
    pub use crate::executor::collector::{HeaderMode, Payload, ResultCollector, ResultRecord};
    pub use crate::executor::handler::{
        HandlerContext, HandlerOutput, HandlerRegistry, ResultHandler,
    };
    pub use crate::executor::orchestrator::Orchestrator;
    pub use crate::executor::JobExecutor;

    // Profiles
    pub use crate::profile::{
        DeviceSettings, EphemeralTarget, JobMode, JobSpec, LoadFormat, MultiProfile, Profile,
        ProfileRegistry, Stage,
    };

    // Templates and variables
    pub use crate::template::TemplateRenderer;
    pub use crate::vars::{VarGenerator, VarRegistry, Vars};
}

// ============================================================================
// Core Modules
// ============================================================================

pub use error::{Error, Result};

/// Error types and result aliases.
///
/// [`Error::is_stage_fatal`](error::Error::is_stage_fatal) separates errors
/// that abort a stage from per-device failures, which are reported as
/// result records instead.
pub mod error;

/// Process-wide configuration loaded from YAML, TOML or JSON files plus
/// environment overrides.
pub mod config;

/// Base-plus-override merging shared by profile and auth records.
pub mod merge;

// ============================================================================
// Inventory
// ============================================================================

/// Profile registry and settings resolver.
pub mod profile;

/// Template variable generators.
pub mod vars;

/// Template rendering with minijinja.
pub mod template;

// ============================================================================
// Execution
// ============================================================================

/// Device session traits and the NETCONF implementation.
pub mod device;

/// Job executor, batch coordinator and multi-profile orchestrator.
pub mod executor;

/// Archival of templates and applied payloads.
pub mod archive;

// ============================================================================
// Output
// ============================================================================

/// Result tables and inventory listings.
pub mod report;

// ============================================================================
// Version Information
// ============================================================================

/// Returns the current version of template-ops.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
