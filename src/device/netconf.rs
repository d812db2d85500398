//! NETCONF session over a child process.
//!
//! Remote devices are reached through the `netconf` SSH subsystem
//! (`ssh -p PORT -i KEY user@host -s netconf`), on-box sessions through the
//! configured local command. Both speak NETCONF 1.0 with `]]>]]>` framing on
//! the child's stdin/stdout.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, trace, warn};

use super::{Database, DeviceSession, SessionError, SessionFactory, SessionResult, Target};
use crate::config::NetconfConfig;
use crate::profile::LoadFormat;

// ============================================================================
// NETCONF Constants
// ============================================================================

/// NETCONF 1.0 message delimiter
const NETCONF_1_0_DELIMITER: &str = "]]>]]>";

/// NETCONF SSH subsystem name
const NETCONF_SUBSYSTEM: &str = "netconf";

/// NETCONF base namespace (RFC 6241)
const NETCONF_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// Reply timeout for RPCs other than commit
const RPC_TIMEOUT: Duration = Duration::from_secs(120);

/// Message ID counter for NETCONF RPC operations
static MESSAGE_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

fn next_message_id() -> u32 {
    MESSAGE_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

// ============================================================================
// RPC Builders
// ============================================================================

/// `<load-configuration>` request for `payload`.
///
/// Overwrite maps to `action="override"`, set payloads to `action="set"`,
/// everything else merges.
pub fn load_configuration_rpc(payload: &str, format: LoadFormat, overwrite: bool) -> String {
    let action = if overwrite {
        "override"
    } else if format == LoadFormat::Set {
        "set"
    } else {
        "merge"
    };

    match format {
        LoadFormat::Set => format!(
            r#"<load-configuration action="{}" format="text"><configuration-set>{}</configuration-set></load-configuration>"#,
            action,
            escape_xml(payload)
        ),
        LoadFormat::Text => format!(
            r#"<load-configuration action="{}" format="text"><configuration-text>{}</configuration-text></load-configuration>"#,
            action,
            escape_xml(payload)
        ),
        LoadFormat::Json => format!(
            r#"<load-configuration action="{}" format="json"><configuration-json>{}</configuration-json></load-configuration>"#,
            action,
            escape_xml(payload)
        ),
        LoadFormat::Xml => format!(
            r#"<load-configuration action="{}" format="xml">{}</load-configuration>"#,
            action,
            payload.trim()
        ),
    }
}

/// `<open-configuration>` request, `None` for the shared candidate.
pub fn open_configuration_rpc(database: &Database) -> Option<String> {
    match database {
        Database::Candidate => None,
        Database::Ephemeral(instance) => Some(format!(
            "<open-configuration><ephemeral-instance>{}</ephemeral-instance></open-configuration>",
            escape_xml(instance)
        )),
    }
}

/// Candidate versus active configuration diff request.
pub const DIFF_RPC: &str =
    r#"<get-configuration compare="rollback" rollback="0" format="text"/>"#;

/// Commit request.
pub const COMMIT_RPC: &str = "<commit-configuration/>";

/// Discard uncommitted changes.
pub const ROLLBACK_RPC: &str = r#"<load-configuration rollback="0"/>"#;

/// Close an opened private or ephemeral database.
pub const CLOSE_CONFIGURATION_RPC: &str = "<close-configuration/>";

/// Close the session.
pub const CLOSE_SESSION_RPC: &str = "<close-session/>";

/// Operational command request.
pub fn command_rpc(command: &str) -> String {
    format!(r#"<command format="text">{}</command>"#, escape_xml(command))
}

fn client_hello() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<hello xmlns="{}">
  <capabilities>
    <capability>urn:ietf:params:netconf:base:1.0</capability>
    <capability>urn:ietf:params:netconf:capability:candidate:1.0</capability>
  </capabilities>
</hello>{}"#,
        NETCONF_NS, NETCONF_1_0_DELIMITER
    )
}

fn wrap_rpc(message_id: u32, operation: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rpc xmlns="{}" message-id="{}">
{}
</rpc>{}"#,
        NETCONF_NS, message_id, operation, NETCONF_1_0_DELIMITER
    )
}

// ============================================================================
// NETCONF Response
// ============================================================================

/// Parsed NETCONF RPC reply
#[derive(Debug, Clone, Default)]
pub struct NetconfResponse {
    /// Whether the operation succeeded
    pub ok: bool,
    /// Errors and warnings reported by the device
    pub errors: Vec<NetconfError>,
    /// Body of the reply
    pub data: Option<String>,
}

impl NetconfResponse {
    /// Parse a NETCONF RPC reply.
    ///
    /// Any `<rpc-error>`, warnings included, fails the reply.
    pub fn parse(reply: &str) -> Self {
        let reply = reply.trim().trim_end_matches(NETCONF_1_0_DELIMITER).trim();

        if reply.contains("<rpc-error>") {
            return NetconfResponse {
                ok: false,
                errors: Self::parse_errors(reply),
                data: None,
            };
        }

        if reply.contains("<ok/>") || reply.contains("<ok />") {
            return NetconfResponse {
                ok: true,
                errors: Vec::new(),
                data: None,
            };
        }

        let data = reply
            .find("<rpc-reply")
            .and_then(|start| reply[start..].find('>').map(|end| start + end + 1))
            .and_then(|body_start| {
                reply
                    .rfind("</rpc-reply>")
                    .map(|body_end| reply[body_start..body_end].trim().to_string())
            })
            .unwrap_or_else(|| reply.to_string());

        NetconfResponse {
            ok: true,
            errors: Vec::new(),
            data: Some(data),
        }
    }

    fn parse_errors(reply: &str) -> Vec<NetconfError> {
        let mut errors = Vec::new();
        let mut search_start = 0;

        while let Some(start) = reply[search_start..].find("<rpc-error>") {
            let abs_start = search_start + start;
            match reply[abs_start..].find("</rpc-error>") {
                Some(end) => {
                    let error_xml = &reply[abs_start..abs_start + end + "</rpc-error>".len()];
                    errors.push(NetconfError::parse(error_xml));
                    search_start = abs_start + end + "</rpc-error>".len();
                }
                None => break,
            }
        }

        errors
    }

    /// All error messages joined for logging
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Text of the first `element` in the reply body
    pub fn element_text(&self, element: &str) -> Option<String> {
        self.data
            .as_deref()
            .and_then(|data| extract_element(data, element))
            .map(|text| unescape_xml(&text))
    }
}

/// NETCONF RPC error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetconfError {
    /// Error severity (error, warning)
    pub severity: String,
    /// Error message
    pub message: Option<String>,
    /// Offending statement, if reported
    pub statement: Option<String>,
}

impl NetconfError {
    fn parse(xml: &str) -> Self {
        NetconfError {
            severity: extract_element(xml, "error-severity").unwrap_or_else(|| "error".to_string()),
            message: extract_element(xml, "error-message").map(|m| unescape_xml(&m)),
            statement: extract_element(xml, "bad-element").map(|m| unescape_xml(&m)),
        }
    }
}

impl std::fmt::Display for NetconfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            self.severity,
            self.message.as_deref().unwrap_or("unknown error")
        )?;
        if let Some(ref statement) = self.statement {
            write!(f, " ({})", statement)?;
        }
        Ok(())
    }
}

fn extract_element(xml: &str, element: &str) -> Option<String> {
    let open = format!("<{}", element);
    let close = format!("</{}>", element);

    let start = xml.find(&open)?;
    let tag_end = start + xml[start..].find('>')?;
    if xml[..=tag_end].ends_with("/>") {
        return Some(String::new());
    }
    let content_start = tag_end + 1;
    let end = xml[content_start..].find(&close)?;
    Some(xml[content_start..content_start + end].trim().to_string())
}

// ============================================================================
// Session
// ============================================================================

/// NETCONF session on a spawned transport process
pub struct NetconfSession {
    device: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    session_id: Option<u32>,
    database_open: bool,
    closed: bool,
}

impl NetconfSession {
    /// Spawn `command` and exchange hello messages
    pub async fn spawn(
        device: impl Into<String>,
        mut command: Command,
        hello_timeout: Duration,
    ) -> SessionResult<Self> {
        let device = device.into();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| SessionError::Transport(format!("failed to spawn transport: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Transport("transport stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Transport("transport stdout unavailable".to_string()))?;

        let mut session = NetconfSession {
            device,
            child,
            stdin,
            stdout: BufReader::new(stdout),
            session_id: None,
            database_open: false,
            closed: false,
        };

        let server_hello = tokio::time::timeout(hello_timeout, session.read_message())
            .await
            .map_err(|_| SessionError::Timeout(hello_timeout.as_secs()))??;
        session.session_id = extract_element(&server_hello, "session-id").and_then(|s| s.parse().ok());
        session.write_message(&client_hello()).await?;

        debug!(
            device = %session.device,
            session_id = ?session.session_id,
            "NETCONF session established"
        );
        Ok(session)
    }

    async fn write_message(&mut self, message: &str) -> SessionResult<()> {
        self.stdin.write_all(message.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_message(&mut self) -> SessionResult<String> {
        let mut buf = Vec::new();
        loop {
            let read = self.stdout.read_until(b'>', &mut buf).await?;
            if read == 0 {
                return Err(SessionError::Transport(format!(
                    "{} closed the NETCONF session",
                    self.device
                )));
            }
            if buf.ends_with(NETCONF_1_0_DELIMITER.as_bytes()) {
                buf.truncate(buf.len() - NETCONF_1_0_DELIMITER.len());
                return Ok(String::from_utf8_lossy(&buf).into_owned());
            }
        }
    }

    /// Send `operation` and wait for its reply
    pub async fn rpc(&mut self, operation: &str, timeout: Duration) -> SessionResult<NetconfResponse> {
        let message_id = next_message_id();
        trace!(device = %self.device, message_id, "Sending RPC");
        self.write_message(&wrap_rpc(message_id, operation)).await?;
        let reply = tokio::time::timeout(timeout, self.read_message())
            .await
            .map_err(|_| SessionError::Timeout(timeout.as_secs()))??;
        Ok(NetconfResponse::parse(&reply))
    }

    async fn checked_rpc(
        &mut self,
        operation: &str,
        timeout: Duration,
        to_error: fn(String) -> SessionError,
    ) -> SessionResult<NetconfResponse> {
        let response = self.rpc(operation, timeout).await?;
        if response.ok {
            Ok(response)
        } else {
            Err(to_error(response.error_summary()))
        }
    }
}

#[async_trait]
impl DeviceSession for NetconfSession {
    async fn open_database(&mut self, database: &Database) -> SessionResult<()> {
        if let Some(rpc) = open_configuration_rpc(database) {
            self.checked_rpc(&rpc, RPC_TIMEOUT, SessionError::Rpc).await?;
            self.database_open = true;
        }
        Ok(())
    }

    async fn load(&mut self, payload: &str, format: LoadFormat, overwrite: bool) -> SessionResult<()> {
        let rpc = load_configuration_rpc(payload, format, overwrite);
        self.checked_rpc(&rpc, RPC_TIMEOUT, SessionError::ConfigLoad)
            .await
            .map(|_| ())
    }

    async fn diff(&mut self) -> SessionResult<Option<String>> {
        let response = self.checked_rpc(DIFF_RPC, RPC_TIMEOUT, SessionError::Rpc).await?;
        let diff = response
            .element_text("configuration-output")
            .filter(|text| !text.trim().is_empty());
        Ok(diff)
    }

    async fn commit(&mut self, timeout: Duration) -> SessionResult<()> {
        self.checked_rpc(COMMIT_RPC, timeout, SessionError::Commit)
            .await
            .map(|_| ())
    }

    async fn rollback(&mut self) -> SessionResult<()> {
        self.checked_rpc(ROLLBACK_RPC, RPC_TIMEOUT, SessionError::Rpc)
            .await
            .map(|_| ())
    }

    async fn close_database(&mut self) -> SessionResult<()> {
        if !self.database_open {
            return Ok(());
        }
        self.database_open = false;
        self.checked_rpc(CLOSE_CONFIGURATION_RPC, RPC_TIMEOUT, SessionError::Rpc)
            .await
            .map(|_| ())
    }

    async fn command(&mut self, command: &str) -> SessionResult<String> {
        let response = self
            .checked_rpc(&command_rpc(command), RPC_TIMEOUT, SessionError::Rpc)
            .await?;
        Ok(response
            .element_text("output")
            .or_else(|| response.data.clone())
            .unwrap_or_default())
    }

    async fn close(&mut self) -> SessionResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self.rpc(CLOSE_SESSION_RPC, Duration::from_secs(5)).await {
            warn!(device = %self.device, error = %e, "close-session RPC failed");
        }
        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(status) => {
                status?;
            }
            Err(_) => self.child.kill().await?,
        }
        Ok(())
    }
}

/// Opens [`NetconfSession`]s from the NETCONF configuration section
#[derive(Debug, Clone)]
pub struct NetconfSessionFactory {
    config: NetconfConfig,
}

impl NetconfSessionFactory {
    /// Create a factory
    pub fn new(config: NetconfConfig) -> Self {
        Self { config }
    }

    /// Transport command for `target`
    pub fn command(&self, target: &Target) -> SessionResult<Command> {
        match target {
            Target::Local { .. } => {
                let (program, args) = self.config.local_command.split_first().ok_or_else(|| {
                    SessionError::Transport("netconf.local_command is empty".to_string())
                })?;
                let mut cmd = Command::new(program);
                cmd.args(args);
                Ok(cmd)
            }
            Target::Remote { credentials, .. } => {
                let mut cmd = Command::new(&self.config.ssh_executable);
                cmd.arg("-p").arg(credentials.port.to_string());
                if let Some(ref key) = credentials.ssh_key {
                    cmd.arg("-i").arg(key);
                }
                cmd.arg("-o")
                    .arg(format!("ConnectTimeout={}", self.config.connect_timeout));
                cmd.args(&self.config.ssh_args);
                let destination = match credentials.user {
                    Some(ref user) => format!("{}@{}", user, credentials.host),
                    None => credentials.host.clone(),
                };
                cmd.arg(destination).arg("-s").arg(NETCONF_SUBSYSTEM);
                Ok(cmd)
            }
        }
    }
}

#[async_trait]
impl SessionFactory for NetconfSessionFactory {
    async fn open(&self, target: &Target) -> SessionResult<Box<dyn DeviceSession>> {
        let command = self.command(target)?;
        // the remote probe covers SSH setup, local sessions get a fixed window
        let hello_timeout = match target {
            Target::Remote { .. } => Duration::from_secs(self.config.connect_timeout.max(1) + 30),
            Target::Local { .. } => Duration::from_secs(30),
        };
        let session = NetconfSession::spawn(target.name(), command, hello_timeout).await?;
        Ok(Box::new(session))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Escape special XML characters in text content
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Credentials;
    use std::path::PathBuf;

    #[test]
    fn test_load_rpc_actions() {
        let set = load_configuration_rpc("set system host-name r1\n", LoadFormat::Set, false);
        assert!(set.contains(r#"action="set" format="text""#));
        assert!(set.contains("<configuration-set>set system host-name r1\n</configuration-set>"));

        let json = load_configuration_rpc("{}", LoadFormat::Json, true);
        assert!(json.contains(r#"action="override" format="json""#));

        let text = load_configuration_rpc("system { host-name <r1>; }", LoadFormat::Text, false);
        assert!(text.contains(r#"action="merge""#));
        assert!(text.contains("&lt;r1&gt;"));
    }

    #[test]
    fn test_open_configuration_rpc() {
        assert!(open_configuration_rpc(&Database::Candidate).is_none());
        assert_eq!(
            open_configuration_rpc(&Database::Ephemeral("pl".into())).unwrap(),
            "<open-configuration><ephemeral-instance>pl</ephemeral-instance></open-configuration>"
        );
    }

    #[test]
    fn test_parse_ok_reply() {
        let reply = r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="3">
<load-configuration-results><ok/></load-configuration-results>
</rpc-reply>"#;
        assert!(NetconfResponse::parse(reply).ok);
    }

    #[test]
    fn test_parse_warning_fails() {
        let reply = r#"<rpc-reply message-id="4">
<load-configuration-results>
<rpc-error>
<error-severity>warning</error-severity>
<error-message>statement not found</error-message>
</rpc-error>
<ok/>
</load-configuration-results>
</rpc-reply>"#;
        let response = NetconfResponse::parse(reply);
        assert!(!response.ok);
        assert_eq!(response.error_summary(), "warning: statement not found");
    }

    #[test]
    fn test_parse_diff_output() {
        let reply = r#"<rpc-reply message-id="5">
<configuration-information>
<configuration-output>
[edit system]
-  host-name r1;
+  host-name r2;
</configuration-output>
</configuration-information>
</rpc-reply>"#;
        let response = NetconfResponse::parse(reply);
        let diff = response.element_text("configuration-output").unwrap();
        assert!(diff.starts_with("[edit system]"));
    }

    #[test]
    fn test_remote_command_line() {
        let factory = NetconfSessionFactory::new(NetconfConfig::default());
        let target = Target::Remote {
            name: "vsrx-01".into(),
            credentials: Credentials {
                host: "10.0.0.11".into(),
                user: Some("ops".into()),
                port: 830,
                ssh_key: Some(PathBuf::from("/keys/id")),
            },
        };
        let cmd = factory.command(&target).unwrap();
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(&args[..4], &["-p", "830", "-i", "/keys/id"]);
        assert_eq!(&args[args.len() - 3..], &["ops@10.0.0.11", "-s", "netconf"]);
    }

    #[test]
    fn test_escape_roundtrip_entities() {
        assert_eq!(escape_xml("a<b>&'\""), "a&lt;b&gt;&amp;&apos;&quot;");
        assert_eq!(unescape_xml("a&lt;b&gt;&amp;"), "a<b>&");
    }
}
