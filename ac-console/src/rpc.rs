use std::fmt;

use rpc_abi::{EVENT_DEBUG_MESSAGE, is_debug_event};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Opaque token returned by `debug_script`, echoed by every event of that run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub command: String,
    pub to: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSummary {
    pub name: String,
    #[serde(rename = "lastexecution", default)]
    pub last_execution: Option<i64>,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModuleConfig {
    #[serde(default)]
    pub scripts: Vec<ScriptSummary>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptContent {
    #[serde(default, alias = "visual")]
    pub editor: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub header: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub code: String,
}

/// Optional event the backend feeds to the script for a debug run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DebugTrigger {
    pub event_name: String,
    #[serde(default)]
    pub event_values: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DebugRunAccepted {
    pub correlation_id: CorrelationId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadTicket {
    pub filepath: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollRegistration {
    #[serde(rename = "pollKey")]
    pub poll_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventPollRequest {
    #[serde(rename = "pollKey")]
    pub poll_key: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventPollResponse {
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub message: Option<String>,
    /// Raw bus events; each one is decoded on its own by `EventEnvelope::decode`.
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub params: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    Output {
        correlation_id: CorrelationId,
        payload: Value,
    },
    End {
        correlation_id: CorrelationId,
    },
}

impl Notification {
    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            Notification::Output { correlation_id, .. } | Notification::End { correlation_id } => {
                correlation_id
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeSkip {
    NotDebugEvent,
    MissingCorrelation,
    Malformed,
}

impl EventEnvelope {
    /// Foreign events are skipped without being decoded.
    pub fn decode(value: Value) -> Result<Notification, EnvelopeSkip> {
        let is_debug = value
            .get("event")
            .and_then(Value::as_str)
            .is_some_and(is_debug_event);
        if !is_debug {
            return Err(EnvelopeSkip::NotDebugEvent);
        }
        serde_json::from_value::<EventEnvelope>(value)
            .map_err(|_| EnvelopeSkip::Malformed)?
            .into_notification()
    }

    pub fn into_notification(self) -> Result<Notification, EnvelopeSkip> {
        if !is_debug_event(&self.event) {
            return Err(EnvelopeSkip::NotDebugEvent);
        }
        let is_output = self.event == EVENT_DEBUG_MESSAGE;
        let correlation_id = self
            .correlation_id
            .filter(|id| !id.as_str().trim().is_empty())
            .ok_or(EnvelopeSkip::MissingCorrelation)?;
        if is_output {
            Ok(Notification::Output {
                correlation_id,
                payload: self.params,
            })
        } else {
            Ok(Notification::End { correlation_id })
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebugLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Exception,
}

impl DebugLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            DebugLevel::Debug => "DEBUG",
            DebugLevel::Info => "INFO",
            DebugLevel::Warning => "WARNING",
            DebugLevel::Error => "ERROR",
            DebugLevel::Critical => "CRITICAL",
            DebugLevel::Exception => "EXCEPTION",
        }
    }
}

/// The payload shape emitted by the backend's debug logger. Other shapes stay opaque.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugOutput {
    pub message: String,
    pub level: DebugLevel,
    #[serde(default)]
    pub timestamp: i64,
}

impl DebugOutput {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}
