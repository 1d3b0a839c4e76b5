use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

// ===================================================================
// Raw entry — one line of a conversation JSONL transcript
// ===================================================================

/// A single raw line of a conversation transcript.
///
/// Every field is optional and extraction is best-effort: a missing or
/// off-type sub-field contributes nothing to the normalized output instead
/// of rejecting the line. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntry {
    /// Record kind. `"summary"` entries are discarded outright.
    #[serde(default, rename = "type", deserialize_with = "string_or_none")]
    pub kind: Option<String>,
    /// The message object; anything that isn't a mapping counts as absent.
    #[serde(default, deserialize_with = "message_or_none")]
    pub message: Option<RawMessage>,
    #[serde(default, deserialize_with = "string_or_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub tool_use_result: RawToolResult,
}

#[derive(Debug, Deserialize)]
pub struct RawMessage {
    #[serde(default, deserialize_with = "string_or_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<RawContent>,
}

/// Accept a string value, degrading any other JSON type to an absent field.
fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_str().map(String::from))
}

/// Accept a message object, degrading any non-mapping value to an absent
/// message (no role, no text).
fn message_or_none<'de, D>(deserializer: D) -> Result<Option<RawMessage>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        value @ Value::Object(_) => serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

/// `message.content` is either a plain string (old transcript format) or an
/// array of content objects (newer format). Anything else carries no text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawContent {
    Text(String),
    Items(Vec<Value>),
    Other(Value),
}

/// The `toolUseResult` field, which varies by tool and transcript version.
///
/// `Absent` (the field missing entirely) and `Null` (`"toolUseResult": null`)
/// are distinct: the former means no tool ran, the latter marks an execution
/// that produced no payload.
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
pub enum RawToolResult {
    #[default]
    #[serde(skip)]
    Absent,
    Null,
    Text(String),
    Items(Vec<Value>),
    Structured(Map<String, Value>),
    /// Unrecognized type (bool, number, ...) — treated as an empty execution.
    Other(Value),
}

// ===================================================================
// Normalized / output record
// ===================================================================

/// The literal value of the `tools` field on an empty-execution marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutedTag {
    Executed,
}

/// Tool activity on a record. A closed enum so a record can never carry
/// both `tools` and `tools_collapsed`, or a marker alongside real output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolTrace {
    /// `"tools": "executed"` — a tool ran but its result had no text.
    Marker { tools: ExecutedTag },
    /// `"tools_collapsed": N` — N consecutive markers merged into one.
    /// Always ≥ 2; a run of one keeps its plain marker.
    Collapsed { tools_collapsed: usize },
    /// `"tool_output": "..."` — the textual result of a tool execution.
    Output { tool_output: String },
}

impl ToolTrace {
    pub fn marker() -> Self {
        Self::Marker {
            tools: ExecutedTag::Executed,
        }
    }
}

/// A collapsed slash-command invocation: the marker's parsed name/args plus
/// the expanded prompt text from the record that followed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandMarker {
    pub name: String,
    pub args: String,
    pub template: String,
}

/// A normalized transcript record, as emitted (one JSON object per line).
///
/// All fields are sparse: absent options serialize to nothing, so the output
/// carries only the fields a record actually has.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Record {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub tool: Option<ToolTrace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_marker: Option<CommandMarker>,
    /// Content-derived identifier; see [`Record::content_id`].
    #[serde(rename = "_id")]
    pub id: String,
}

impl Record {
    /// Whether this record is an empty tool-execution marker.
    pub fn is_tool_marker(&self) -> bool {
        matches!(self.tool, Some(ToolTrace::Marker { .. }))
    }

    /// The textual tool output, if this record carries one.
    pub fn tool_output(&self) -> Option<&str> {
        match &self.tool {
            Some(ToolTrace::Output { tool_output }) => Some(tool_output),
            _ => None,
        }
    }

    /// Compute the stable identity hash for this record's content.
    ///
    /// Covers exactly `role`, `text`, `tool_output`, and `command_marker`
    /// (each defaulted when absent) and nothing else — `timestamp`, the
    /// tool markers, and `_id` itself are excluded, so the id survives
    /// re-extraction and run collapsing. Two records with identical content
    /// share an id by design.
    pub fn content_id(&self) -> String {
        let marker = match &self.command_marker {
            Some(m) => serde_json::json!({
                "args": m.args,
                "name": m.name,
                "template": m.template,
            }),
            None => serde_json::json!({}),
        };
        // serde_json maps are BTreeMaps, so keys serialize in sorted order
        // and the canonical form is insertion-order independent.
        let canonical = serde_json::json!({
            "command_marker": marker,
            "role": self.role.as_deref().unwrap_or(""),
            "text": self.text.as_deref().unwrap_or(""),
            "tool_output": self.tool_output().unwrap_or(""),
        });
        let digest = Sha256::digest(canonical.to_string());
        digest[..6].iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Recompute `_id` from the current content. Called after any mutation
    /// that could change a hashed field.
    pub fn refresh_id(&mut self) {
        self.id = self.content_id();
    }
}

// ===================================================================
// Normalization — raw entry → record
// ===================================================================

impl RawEntry {
    /// Normalize this raw entry into a [`Record`], or `None` for summary
    /// entries, which never reach the output in any form.
    pub fn normalize(self) -> Option<Record> {
        if self.kind.as_deref() == Some("summary") {
            return None;
        }

        let mut record = Record::default();

        if let Some(message) = self.message {
            record.role = Some(message.role.unwrap_or_else(|| "unknown".to_string()));
            record.text = message.content.and_then(extract_text);
        }

        record.timestamp = self.timestamp;
        record.tool = classify_tool_result(self.tool_use_result);
        record.refresh_id();
        Some(record)
    }
}

/// Extract plain text from message content. Array content contributes the
/// `text` field of each object item, joined with newlines; the result is
/// kept whenever at least one item had a text field.
fn extract_text(content: RawContent) -> Option<String> {
    match content {
        RawContent::Text(text) if !text.is_empty() => Some(text),
        RawContent::Items(items) => join_text_items(&items),
        _ => None,
    }
}

/// Classify a `toolUseResult` into marker / output, or nothing when the
/// field was absent.
fn classify_tool_result(result: RawToolResult) -> Option<ToolTrace> {
    match result {
        RawToolResult::Absent => None,
        RawToolResult::Null => Some(ToolTrace::marker()),
        RawToolResult::Text(tool_output) => Some(ToolTrace::Output { tool_output }),
        RawToolResult::Items(items) => match join_text_items(&items) {
            Some(tool_output) => Some(ToolTrace::Output { tool_output }),
            // Empty list or no textual items: same as an empty execution.
            None => Some(ToolTrace::marker()),
        },
        RawToolResult::Structured(map) => match serde_json::to_string_pretty(&map) {
            Ok(tool_output) => Some(ToolTrace::Output { tool_output }),
            Err(_) => Some(ToolTrace::marker()),
        },
        RawToolResult::Other(_) => Some(ToolTrace::marker()),
    }
}

/// Join the `text` fields of object items with newlines. Returns `None`
/// when no item contributed one.
fn join_text_items(items: &[Value]) -> Option<String> {
    let texts: Vec<&str> = items
        .iter()
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}
