//! Device session layer.
//!
//! The job executor talks to devices only through the [`SessionFactory`] and
//! [`DeviceSession`] traits. The production implementation lives in
//! [`netconf`]; tests plug in scripted sessions.
//!
//! A session follows the Junos configuration life cycle:
//!
//! ```text
//! open -> open_database -> load -> (diff | commit) -> [rollback] -> close_database -> close
//! ```

pub mod netconf;

pub use netconf::{NetconfSession, NetconfSessionFactory};

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::profile::LoadFormat;

/// Device names that select the on-box session instead of a remote one.
pub const LOCAL_TARGETS: [&str; 2] = ["local", "localhost"];

/// Errors raised by device sessions.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Session could not be established or was lost.
    #[error("Connection failed: {0}")]
    Transport(String),

    /// The device rejected the loaded configuration.
    #[error("Configuration load failed: {0}")]
    ConfigLoad(String),

    /// The device rejected the commit.
    #[error("Commit failed: {0}")]
    Commit(String),

    /// Any other RPC error reply.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// No reply within the allowed time.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// I/O error on the session channel.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Returns true for load and commit rejections, the only errors worth a retry
    pub fn is_config_error(&self) -> bool {
        matches!(self, SessionError::ConfigLoad(_) | SessionError::Commit(_))
    }
}

/// Result type for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Connection parameters for a remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Management address
    pub host: String,
    /// Login user, SSH default when `None`
    pub user: Option<String>,
    /// NETCONF port
    pub port: u16,
    /// SSH private key file
    pub ssh_key: Option<PathBuf>,
}

/// Where a session is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// On-box session, no credentials
    Local {
        /// Device name as given (`local` or `localhost`)
        name: String,
    },
    /// Remote session over SSH
    Remote {
        /// Device name
        name: String,
        /// Resolved credentials
        credentials: Credentials,
    },
}

impl Target {
    /// Whether `name` selects the on-box session
    pub fn is_local_name(name: &str) -> bool {
        LOCAL_TARGETS.contains(&name)
    }

    /// Device name
    pub fn name(&self) -> &str {
        match self {
            Target::Local { name } | Target::Remote { name, .. } => name,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Local { name } => write!(f, "{}", name),
            Target::Remote { name, credentials } => {
                write!(f, "{} ({}:{})", name, credentials.host, credentials.port)
            }
        }
    }
}

/// Configuration database a session loads into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Database {
    /// Shared candidate configuration
    Candidate,
    /// Named ephemeral instance
    Ephemeral(String),
}

/// An open management session on one device.
#[async_trait]
pub trait DeviceSession: Send {
    /// Open the configuration database for editing
    async fn open_database(&mut self, database: &Database) -> SessionResult<()>;

    /// Load `payload` in `format`, replacing the database contents when `overwrite`
    async fn load(&mut self, payload: &str, format: LoadFormat, overwrite: bool) -> SessionResult<()>;

    /// Difference between the edited and the active configuration, `None` when equal
    async fn diff(&mut self) -> SessionResult<Option<String>>;

    /// Commit the edited configuration
    async fn commit(&mut self, timeout: Duration) -> SessionResult<()>;

    /// Discard uncommitted changes
    async fn rollback(&mut self) -> SessionResult<()>;

    /// Close the database opened by [`open_database`](Self::open_database)
    async fn close_database(&mut self) -> SessionResult<()>;

    /// Run an operational command and return its text output
    async fn command(&mut self, command: &str) -> SessionResult<String>;

    /// Close the session
    async fn close(&mut self) -> SessionResult<()>;
}

/// Opens device sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a session to `target`
    async fn open(&self, target: &Target) -> SessionResult<Box<dyn DeviceSession>>;
}
