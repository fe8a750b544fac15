use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Token set handed to callers whenever the session acquires new tokens.
///
/// Persisting it is up to the caller; the session keeps tokens in memory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// When the token request was sent
    pub requested: DateTime<Utc>,
    /// `requested` plus the lifetime reported by the server
    pub expires: DateTime<Utc>,
}

impl TokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires
    }
}

/// Raw reply of the token endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenErrorResponse {
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl TokenErrorResponse {
    pub fn message(&self) -> Option<String> {
        match (&self.error, &self.error_description) {
            (Some(error), Some(description)) => Some(format!("{} ({})", error, description)),
            (Some(error), None) => Some(error.clone()),
            (None, Some(description)) => Some(description.clone()),
            (None, None) => None,
        }
    }
}

/// Descriptive fields of an appliance as reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplianceDetails {
    pub name: Option<String>,
    pub brand: Option<String>,
    #[serde(rename = "type")]
    pub appliance_type: Option<String>,
    /// Model code
    pub vib: Option<String>,
    pub enumber: Option<String>,
    #[serde(default)]
    pub connected: bool,
    /// Fields not covered above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Event names carried by the appliance event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum EventKind {
    Connected,
    Disconnected,
    Status,
    Event,
    Notify,
    KeepAlive,
}

impl EventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "CONNECTED" => Some(EventKind::Connected),
            "DISCONNECTED" => Some(EventKind::Disconnected),
            "STATUS" => Some(EventKind::Status),
            "EVENT" => Some(EventKind::Event),
            "NOTIFY" => Some(EventKind::Notify),
            "KEEP-ALIVE" => Some(EventKind::KeepAlive),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Connected => "CONNECTED",
            EventKind::Disconnected => "DISCONNECTED",
            EventKind::Status => "STATUS",
            EventKind::Event => "EVENT",
            EventKind::Notify => "NOTIFY",
            EventKind::KeepAlive => "KEEP-ALIVE",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `STATUS`, `EVENT` and `NOTIFY` frames.
#[derive(Debug, Deserialize)]
pub(crate) struct EventPayload {
    #[serde(default)]
    pub items: Vec<EventItem>,
}

/// One item of an event frame, as sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventItem {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Seconds since the epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventItem {
    /// Short human readable form, e.g. `DoorState=Open` or
    /// `RemainingProgramTime=00:02:05`.
    pub fn summary(&self) -> String {
        let name = last_segment(&self.key);
        let value = match self.unit.as_deref() {
            Some("seconds") => match self
                .value
                .as_i64()
                .or_else(|| self.value.as_f64().map(|seconds| seconds as i64))
            {
                Some(seconds) => format_duration(seconds),
                None => format!("{}seconds", render(&self.value)),
            },
            Some(unit) => format!("{}{}", render(&self.value), unit),
            None => match &self.value {
                Value::String(s) => last_segment(s).to_string(),
                other => render(other),
            },
        };
        format!("{}={}", name, value)
    }
}

fn last_segment(dotted: &str) -> &str {
    dotted.rsplit('.').next().unwrap_or(dotted)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render seconds as a time of day, wrapping after 24 hours.
fn format_duration(seconds: i64) -> String {
    match DateTime::from_timestamp(seconds, 0) {
        Some(time) => time.format("%H:%M:%S").to_string(),
        None => seconds.to_string(),
    }
}

/// An event item enriched with its kind, decoded timestamp and summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub date: Option<DateTime<Utc>>,
    pub summary: String,
    #[serde(flatten)]
    pub item: EventItem,
}

impl EventRecord {
    pub fn new(kind: EventKind, item: EventItem) -> Self {
        Self {
            kind,
            date: item
                .timestamp
                .and_then(|timestamp| DateTime::from_timestamp(timestamp, 0)),
            summary: item.summary(),
            item,
        }
    }
}

/// Program to select or start, optionally with options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ProgramOption>,
}

impl Program {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            options: Vec::new(),
        }
    }

    pub fn with_option(mut self, option: ProgramOption) -> Self {
        self.options.push(option);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramOption {
    pub key: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ProgramOption {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}
