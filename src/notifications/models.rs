//! Notification data models

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub const DEFAULT_TEMPLATE: &str = "Removed {service} queue item id={id} title={title} reason={reason}";

/// Webhook flavor, which decides the body shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationType {
    Discord,
    Slack,
    Generic,
}

impl DestinationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationType::Discord => "discord",
            DestinationType::Slack => "slack",
            DestinationType::Generic => "generic",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "discord" => Some(DestinationType::Discord),
            "slack" => Some(DestinationType::Slack),
            "generic" => Some(DestinationType::Generic),
            _ => None,
        }
    }

    /// JSON field carrying the text for non-raw payloads.
    pub fn text_field(&self) -> &'static str {
        match self {
            DestinationType::Discord => "content",
            DestinationType::Slack => "text",
            DestinationType::Generic => "message",
        }
    }

    /// Largest text body the webhook reliably accepts.
    pub fn max_payload_chars(&self) -> usize {
        match self {
            DestinationType::Discord => 1900,
            DestinationType::Slack => 38000,
            DestinationType::Generic => 60000,
        }
    }
}

/// Which decision reasons a destination wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasonFilter {
    Any,
    Only(HashSet<String>),
}

impl ReasonFilter {
    /// Build from a configured list. Empty or containing `*` matches anything.
    pub fn from_list(reasons: &[String]) -> Self {
        if reasons.is_empty() || reasons.iter().any(|r| r.trim() == "*") {
            ReasonFilter::Any
        } else {
            ReasonFilter::Only(reasons.iter().map(|r| r.trim().to_string()).collect())
        }
    }

    pub fn matches(&self, reason: &str) -> bool {
        match self {
            ReasonFilter::Any => true,
            ReasonFilter::Only(set) => set.contains(reason),
        }
    }
}

/// A configured webhook destination. Immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub name: String,
    pub kind: DestinationType,
    pub url: String,
    pub template: String,
    pub reasons: ReasonFilter,
    pub batch: bool,
    /// Generic only: the rendered template is a JSON document.
    pub raw_json: bool,
    pub headers: BTreeMap<String, String>,
}

impl Destination {
    pub fn new(name: impl Into<String>, kind: DestinationType, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            url: url.into(),
            template: DEFAULT_TEMPLATE.to_string(),
            reasons: ReasonFilter::Any,
            batch: false,
            raw_json: false,
            headers: BTreeMap::new(),
        }
    }

    pub fn is_raw_json(&self) -> bool {
        self.raw_json && self.kind == DestinationType::Generic
    }

    /// Substitute `{service}`, `{id}`, `{title}` and `{reason}` literally.
    pub fn render(&self, event: &NotificationEvent) -> String {
        self.template
            .replace("{service}", &event.service)
            .replace("{id}", &event.id.to_string())
            .replace("{title}", &event.title)
            .replace("{reason}", &event.reason)
    }
}

/// What happened to a queue item, as seen by notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationEvent {
    pub service: String,
    pub id: i64,
    pub title: String,
    pub reason: String,
}

/// A fully formatted webhook call.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub destination: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: serde_json::Value,
}
