//! Reason routing, batching and dry-run annotation.
//!
//! The router never performs I/O. `route` and `flush` return the messages to
//! hand to a transport, so the runner decides when delivery happens.

use super::models::*;
use serde_json::{json, Map, Value};
use tracing::debug;

const DRY_RUN_PREFIX: &str = "[DRY RUN]";
const TRUNCATION_MARKER: &str = "\n...";
const RAW_BATCH_OVERHEAD: usize = 32;

pub struct NotificationRouter {
    destinations: Vec<Destination>,
    /// Pending lines per destination, same order as `destinations`.
    buffers: Vec<Vec<String>>,
    dry_run: bool,
}

impl NotificationRouter {
    pub fn new(destinations: Vec<Destination>, dry_run: bool) -> Self {
        let buffers = vec![Vec::new(); destinations.len()];
        Self {
            destinations,
            buffers,
            dry_run,
        }
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    /// Lines waiting in batch buffers.
    pub fn pending(&self) -> usize {
        self.buffers.iter().map(Vec::len).sum()
    }

    /// Route one event. Returns immediate messages plus any batch that had to
    /// be flushed early to stay under the destination's payload limit.
    pub fn route(&mut self, event: &NotificationEvent) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        for idx in 0..self.destinations.len() {
            let dest = &self.destinations[idx];
            if !dest.reasons.matches(&event.reason) {
                continue;
            }
            let line = dest.render(event);
            if !dest.batch {
                out.push(self.immediate(dest, &line));
                continue;
            }

            let buffer = &self.buffers[idx];
            if !buffer.is_empty()
                && self.batch_len(dest, buffer, Some(&line)) > dest.kind.max_payload_chars()
            {
                debug!(
                    "Flushing {} buffered notifications for {} before size limit",
                    buffer.len(),
                    dest.name
                );
                let lines = std::mem::take(&mut self.buffers[idx]);
                out.push(self.batch_message(&self.destinations[idx], &lines));
            }
            self.buffers[idx].push(line);
        }
        out
    }

    /// Drain every batch buffer. Called once at the end of a cycle.
    pub fn flush(&mut self) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        for idx in 0..self.destinations.len() {
            if self.buffers[idx].is_empty() {
                continue;
            }
            let lines = std::mem::take(&mut self.buffers[idx]);
            out.push(self.batch_message(&self.destinations[idx], &lines));
        }
        out
    }

    fn message(dest: &Destination, body: Value) -> OutboundMessage {
        OutboundMessage {
            destination: dest.name.clone(),
            url: dest.url.clone(),
            headers: dest.headers.clone(),
            body,
        }
    }

    fn immediate(&self, dest: &Destination, line: &str) -> OutboundMessage {
        if dest.is_raw_json() {
            let mut doc = parse_json_object(line);
            if self.dry_run {
                doc.entry("dryRun").or_insert(Value::Bool(true));
            }
            return Self::message(dest, Value::Object(doc));
        }

        let text = if self.dry_run {
            format!("{} {}", DRY_RUN_PREFIX, line)
        } else {
            line.to_string()
        };
        let text = truncate(&text, dest.kind.max_payload_chars());
        Self::message(dest, json!({ dest.kind.text_field(): text }))
    }

    fn batch_message(&self, dest: &Destination, lines: &[String]) -> OutboundMessage {
        if dest.is_raw_json() {
            let events: Vec<Value> = lines
                .iter()
                .map(|l| Value::Object(parse_json_object(l)))
                .collect();
            let mut body = json!({ "events": events });
            if self.dry_run {
                body["dryRun"] = Value::Bool(true);
            }
            return Self::message(dest, body);
        }

        let mut text = lines.join("\n");
        if self.dry_run {
            text = format!("{}\n{}", DRY_RUN_PREFIX, text);
        }
        let text = truncate(&text, dest.kind.max_payload_chars());
        Self::message(dest, json!({ dest.kind.text_field(): text }))
    }

    /// Size of the batch body for `lines`, optionally with one more line.
    fn batch_len(&self, dest: &Destination, lines: &[String], extra: Option<&str>) -> usize {
        let count = lines.len() + usize::from(extra.is_some());
        let chars: usize = lines
            .iter()
            .map(|l| l.chars().count())
            .chain(extra.map(|l| l.chars().count()))
            .sum();
        if dest.is_raw_json() {
            return chars + count + RAW_BATCH_OVERHEAD;
        }
        let prefix = if self.dry_run {
            DRY_RUN_PREFIX.len() + 1
        } else {
            0
        };
        prefix + chars + count.saturating_sub(1)
    }
}

/// Parse a rendered raw-JSON template. Anything that is not a JSON object is
/// wrapped as `{"message": ...}`.
fn parse_json_object(line: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = Map::new();
            map.insert("message".to_string(), Value::String(line.to_string()));
            map
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(TRUNCATION_MARKER.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}
