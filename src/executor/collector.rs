//! Shared result collector.
//!
//! Every device job appends exactly one [`ResultRecord`]. Workers only append;
//! the batch coordinator reads and clears after all workers of a stage joined.
//! The mutex makes the append path safe regardless of that discipline.

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Reserved record identifier for diff output.
pub const DIFF_ID: &str = "diff";

/// Shown when a diff-mode job found no difference.
pub const NO_DIFF: &str = "No diff between candidate and current config";

/// Primary payload of a result record.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Status line or multi-line text
    Text(String),
    /// Diff output, `None` when candidate and active configuration match
    Diff {
        /// Diff text
        text: Option<String>,
        /// Whether delete statements were removed before the diff
        stripped: bool,
    },
    /// Structured data kept across stages, never tabulated
    Structured(Value),
    /// Nothing to show
    Empty,
}

impl Payload {
    /// Converts a handler result value into a payload
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Payload::Empty,
            Value::String(s) if s.is_empty() => Payload::Empty,
            Value::String(s) => Payload::Text(s),
            Value::Bool(_) | Value::Number(_) => Payload::Text(value.to_string()),
            other => Payload::Structured(other),
        }
    }

    /// Scalar text of the payload, `None` for structured and empty payloads
    pub fn text(&self) -> Option<String> {
        match self {
            Payload::Text(s) => Some(s.clone()),
            Payload::Diff { text: Some(t), .. } => Some(t.clone()),
            Payload::Diff {
                text: None,
                stripped: false,
            } => Some(NO_DIFF.to_string()),
            Payload::Diff {
                text: None,
                stripped: true,
            } => Some(format!("{} (after removing delete cmds)", NO_DIFF)),
            Payload::Structured(_) | Payload::Empty => None,
        }
    }

    /// Whether the payload survives a stage clear
    pub fn is_structured(&self) -> bool {
        matches!(self, Payload::Structured(_))
    }
}

/// One entry of the shared result buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    /// Device name or [`DIFF_ID`]
    pub id: String,
    /// Primary payload
    pub payload: Payload,
    /// Auxiliary data from execute-mode handlers
    pub secondary: Option<Value>,
}

impl ResultRecord {
    /// Text status record
    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: Payload::Text(text.into()),
            secondary: None,
        }
    }

    /// Record with an explicit payload and optional secondary data
    pub fn new(id: impl Into<String>, payload: Payload, secondary: Option<Value>) -> Self {
        Self {
            id: id.into(),
            payload,
            secondary,
        }
    }

    /// Whether this is the diff record
    pub fn is_diff(&self) -> bool {
        self.id == DIFF_ID
    }
}

/// Report header requested by execute-mode handlers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HeaderMode {
    /// Built-in value column label
    #[default]
    Default,
    /// Custom value column label
    Custom(String),
    /// No header row
    Suppressed,
}

#[derive(Debug, Default)]
struct CollectorState {
    records: Vec<ResultRecord>,
    header: HeaderMode,
}

/// Thread-safe append-only result buffer shared by the jobs of a run.
#[derive(Debug, Clone, Default)]
pub struct ResultCollector {
    inner: Arc<Mutex<CollectorState>>,
}

impl ResultCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record
    pub fn push(&self, record: ResultRecord) {
        self.inner.lock().records.push(record);
    }

    /// Append the diff record of `device`.
    ///
    /// Only one diff record may exist at a time; a second one is refused.
    pub fn push_diff(&self, device: &str, text: Option<String>, stripped: bool) -> Result<()> {
        let mut state = self.inner.lock();
        if state.records.iter().any(ResultRecord::is_diff) {
            return Err(Error::DuplicateDiff(device.to_string()));
        }
        state.records.push(ResultRecord::new(
            DIFF_ID,
            Payload::Diff { text, stripped },
            None,
        ));
        Ok(())
    }

    /// Set the report header
    pub fn set_header(&self, header: HeaderMode) {
        self.inner.lock().header = header;
    }

    /// Current report header
    pub fn header(&self) -> HeaderMode {
        self.inner.lock().header.clone()
    }

    /// Copy of all records in append order
    pub fn snapshot(&self) -> Vec<ResultRecord> {
        self.inner.lock().records.clone()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    /// Clear text and diff payloads after a stage was reported.
    ///
    /// Structured payloads and secondary data stay for later stages; records
    /// left with nothing are dropped.
    pub fn clear_text(&self) {
        let mut state = self.inner.lock();
        for record in state.records.iter_mut() {
            if !record.payload.is_structured() {
                record.payload = Payload::Empty;
            }
        }
        state
            .records
            .retain(|r| r.payload != Payload::Empty || r.secondary.is_some());
    }

    /// Structured data left by earlier stages, keyed by device.
    ///
    /// Each entry is `{"result": .., "result_adv": ..}`.
    pub fn prior_results(&self) -> Value {
        let state = self.inner.lock();
        let mut map = Map::new();
        for record in &state.records {
            let result = match &record.payload {
                Payload::Structured(v) => v.clone(),
                _ => Value::Null,
            };
            if result.is_null() && record.secondary.is_none() {
                continue;
            }
            map.insert(
                record.id.clone(),
                json!({
                    "result": result,
                    "result_adv": record.secondary.clone().unwrap_or(Value::Null),
                }),
            );
        }
        Value::Object(map)
    }
}
