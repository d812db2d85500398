//! Execute-mode result handlers.
//!
//! In execute mode the rendered template is not loaded as configuration.
//! It is handed to a registered [`ResultHandler`] which produces the device
//! result, optional auxiliary data for later stages, and an optional report
//! header.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::collector::HeaderMode;
use crate::device::DeviceSession;
use crate::error::{Error, Result};

/// Directive prefix recognised by the `cli` handler.
const HEADER_DIRECTIVE: &str = "#!header";

/// What a handler produced for one device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutput {
    /// Primary result
    pub result: Value,
    /// Auxiliary result passed to later stages
    pub result_adv: Option<Value>,
    /// Report header change, unchanged when `None`
    pub header: Option<HeaderMode>,
}

/// Per-job context handed to a handler.
pub struct HandlerContext<'a> {
    /// Device name
    pub device: &'a str,
    /// Template name
    pub template: &'a str,
    /// Open device session
    pub session: &'a mut Box<dyn DeviceSession>,
}

/// Turns rendered execute-mode output into a result.
#[async_trait]
pub trait ResultHandler: Send + Sync {
    /// Handler name as referenced by settings records
    fn name(&self) -> &'static str;

    /// Produce the result for `rendered`
    async fn produce_result(
        &self,
        rendered: &str,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutput>;
}

/// Runs each rendered line as an operational command.
///
/// Blank lines and `#` comments are skipped. `#!header <text>` sets the
/// report header, `#!header none` suppresses it and `#!header default`
/// restores the built-in one.
#[derive(Debug, Default)]
pub struct CliHandler;

impl CliHandler {
    fn parse_header(value: &str) -> HeaderMode {
        match value.trim() {
            "none" | "None" => HeaderMode::Suppressed,
            "default" | "" => HeaderMode::Default,
            custom => HeaderMode::Custom(custom.to_string()),
        }
    }
}

#[async_trait]
impl ResultHandler for CliHandler {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn produce_result(
        &self,
        rendered: &str,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutput> {
        let mut output = HandlerOutput::default();
        let mut sections = Vec::new();

        for line in rendered.lines().map(str::trim) {
            if let Some(header) = line.strip_prefix(HEADER_DIRECTIVE) {
                output.header = Some(Self::parse_header(header));
                continue;
            }
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            debug!(device = %ctx.device, command = %line, "Running operational command");
            let text = ctx.session.command(line).await?;
            sections.push(text.trim_end().to_string());
        }

        if !sections.is_empty() {
            output.result = Value::String(sections.join("\n"));
        }
        Ok(output)
    }
}

/// Parses the rendered text as `{"result": .., "result_adv": .., "header": ..}`.
///
/// A `null` header suppresses the header row, an absent one leaves it alone.
#[derive(Debug, Default)]
pub struct JsonHandler;

#[async_trait]
impl ResultHandler for JsonHandler {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn produce_result(
        &self,
        rendered: &str,
        _ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutput> {
        let value: Value = serde_json::from_str(rendered)
            .map_err(|e| Error::handler(self.name(), e.to_string()))?;
        let Value::Object(mut map) = value else {
            return Err(Error::handler(self.name(), "expected a JSON object"));
        };

        let header = match map.remove("header") {
            None => None,
            Some(Value::Null) => Some(HeaderMode::Suppressed),
            Some(Value::String(s)) if s == "default" => Some(HeaderMode::Default),
            Some(Value::String(s)) => Some(HeaderMode::Custom(s)),
            Some(other) => {
                return Err(Error::handler(
                    self.name(),
                    format!("header must be a string or null, got {}", other),
                ))
            }
        };

        Ok(HandlerOutput {
            result: map.remove("result").unwrap_or(Value::Null),
            result_adv: map.remove("result_adv").filter(|v| !v.is_null()),
            header,
        })
    }
}

/// Registry of execute-mode handlers
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ResultHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Create a registry with the built-in handlers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CliHandler));
        registry.register(Arc::new(JsonHandler));
        registry
    }

    /// Register a handler under its own name
    pub fn register(&mut self, handler: Arc<dyn ResultHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    /// Get a handler by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ResultHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered handler names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Database, SessionError, SessionResult};
    use crate::profile::LoadFormat;
    use serde_json::json;
    use std::time::Duration;

    struct EchoSession;

    #[async_trait]
    impl DeviceSession for EchoSession {
        async fn open_database(&mut self, _database: &Database) -> SessionResult<()> {
            Ok(())
        }
        async fn load(&mut self, _: &str, _: LoadFormat, _: bool) -> SessionResult<()> {
            Ok(())
        }
        async fn diff(&mut self) -> SessionResult<Option<String>> {
            Ok(None)
        }
        async fn commit(&mut self, _timeout: Duration) -> SessionResult<()> {
            Ok(())
        }
        async fn rollback(&mut self) -> SessionResult<()> {
            Ok(())
        }
        async fn close_database(&mut self) -> SessionResult<()> {
            Ok(())
        }
        async fn command(&mut self, command: &str) -> SessionResult<String> {
            if command.starts_with("request") {
                return Err(SessionError::Rpc("permission denied".to_string()));
            }
            Ok(format!("out: {}\n", command))
        }
        async fn close(&mut self) -> SessionResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cli_handler_runs_commands() {
        let mut session: Box<dyn DeviceSession> = Box::new(EchoSession);
        let mut ctx = HandlerContext {
            device: "vsrx-01",
            template: "alarm",
            session: &mut session,
        };
        let rendered = "#!header alarm count\n# comment\nshow system alarms\n\nshow chassis alarms\n";
        let out = CliHandler.produce_result(rendered, &mut ctx).await.unwrap();
        assert_eq!(
            out.result,
            json!("out: show system alarms\nout: show chassis alarms")
        );
        assert_eq!(out.header, Some(HeaderMode::Custom("alarm count".into())));
    }

    #[tokio::test]
    async fn test_cli_handler_session_error() {
        let mut session: Box<dyn DeviceSession> = Box::new(EchoSession);
        let mut ctx = HandlerContext {
            device: "vsrx-01",
            template: "reboot",
            session: &mut session,
        };
        let err = CliHandler
            .produce_result("show version
request system reboot
", &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::Rpc(_))));
    }

    #[tokio::test]
    async fn test_json_handler_fields() {
        let mut session: Box<dyn DeviceSession> = Box::new(EchoSession);
        let mut ctx = HandlerContext {
            device: "vsrx-01",
            template: "load",
            session: &mut session,
        };
        let out = JsonHandler
            .produce_result(
                r#"{"result": "12%", "result_adv": {"cpu": 12}, "header": null}"#,
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(out.result, json!("12%"));
        assert_eq!(out.result_adv, Some(json!({"cpu": 12})));
        assert_eq!(out.header, Some(HeaderMode::Suppressed));

        assert!(JsonHandler.produce_result("[1]", &mut ctx).await.is_err());
    }

    #[test]
    fn test_registry_builtins() {
        let registry = HandlerRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["cli", "json"]);
        assert!(registry.get("python").is_none());
    }
}
