//! Strict extraction of the mandatory JSON trailer from agent output.
//!
//! The authoritative parse accepts exactly two shapes: a fenced ```json
//! block with nothing after the closing fence, or a bare JSON object as
//! the entire message. Everything else is rejected. A separate tolerant
//! decoder exists for helper and interrogation responses, where JSON may
//! sit anywhere in the output; it is never used for the authoritative
//! parse.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Why the authoritative parse rejected the output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed output: {0}")]
    MalformedOutput(String),

    #[error("trailing content after the JSON block")]
    TrailingText,

    #[error("missing required key: {0}")]
    MissingRequiredKey(String),
}

impl ParseError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedOutput(_) => "MALFORMED_OUTPUT",
            Self::TrailingText => "TRAILING_TEXT",
            Self::MissingRequiredKey(_) => "MISSING_REQUIRED_KEY",
        }
    }
}

/// Declared status inside the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailerStatus {
    Completed,
    Failed,
}

/// The mandatory JSON trailer every agent response must end with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTrailer {
    pub status: TrailerStatus,
    pub files_created: Vec<String>,
    pub files_updated: Vec<String>,
    pub changes: Vec<String>,
    #[serde(rename = "neededChanges")]
    pub needed_changes: bool,
    pub summary: String,
}

impl AgentTrailer {
    /// Every file path the trailer mentions, in declaration order.
    pub fn mentioned_files(&self) -> Vec<&str> {
        self.files_created
            .iter()
            .chain(self.files_updated.iter())
            .chain(self.changes.iter())
            .map(String::as_str)
            .collect()
    }
}

const REQUIRED_KEYS: &[&str] = &[
    "status",
    "files_created",
    "files_updated",
    "changes",
    "neededChanges",
    "summary",
];

/// Strict parser for the authoritative trailer.
pub struct OutputParser;

impl OutputParser {
    /// Extract and validate the trailer from raw agent output.
    pub fn parse(raw: &str) -> Result<AgentTrailer, ParseError> {
        let body = Self::extract_json_body(raw)?;

        let value: Value = serde_json::from_str(body)
            .map_err(|e| ParseError::MalformedOutput(e.to_string()))?;

        let obj = value.as_object().ok_or_else(|| {
            ParseError::MalformedOutput("trailer root must be a JSON object".to_string())
        })?;

        for key in REQUIRED_KEYS {
            if !obj.contains_key(*key) {
                return Err(ParseError::MissingRequiredKey((*key).to_string()));
            }
        }

        serde_json::from_value(value).map_err(|e| ParseError::MalformedOutput(e.to_string()))
    }

    /// Locate the JSON body: fenced block (nothing after the closing
    /// fence) or the whole trimmed message.
    fn extract_json_body(raw: &str) -> Result<&str, ParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::MalformedOutput("empty output".to_string()));
        }

        if let Some(fence_start) = trimmed.find("```json") {
            let after_fence = &trimmed[fence_start + "```json".len()..];
            let close = after_fence
                .find("```")
                .ok_or_else(|| ParseError::MalformedOutput("unterminated fence".to_string()))?;
            let body = &after_fence[..close];
            let trailing = &after_fence[close + "```".len()..];
            if !trailing.trim().is_empty() {
                return Err(ParseError::TrailingText);
            }
            return Ok(body.trim());
        }

        // Bare object: the entire message, no prefix or suffix.
        if !trimmed.starts_with('{') {
            return Err(ParseError::MalformedOutput(
                "output is neither a fenced json block nor a bare object".to_string(),
            ));
        }
        match Self::balanced_object_end(trimmed) {
            Some(end) if trimmed[end..].trim().is_empty() => Ok(&trimmed[..end]),
            Some(_) => Err(ParseError::TrailingText),
            None => Err(ParseError::MalformedOutput(
                "unbalanced JSON object".to_string(),
            )),
        }
    }

    /// Byte offset one past the end of the object starting at byte 0, or
    /// None when braces never balance. String-aware.
    fn balanced_object_end(s: &str) -> Option<usize> {
        let bytes = s.as_bytes();
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (i, &b) in bytes.iter().enumerate() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth = depth.checked_sub(1)?;
                    if depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Tolerant decoder: the first balanced JSON object anywhere in the
    /// output that parses. For helper-agent and interrogation responses
    /// only.
    pub fn tolerant_object(raw: &str) -> Option<Value> {
        let mut search_from = 0;
        while let Some(offset) = raw[search_from..].find('{') {
            let start = search_from + offset;
            if let Some(len) = Self::balanced_object_end(&raw[start..]) {
                if let Ok(value) = serde_json::from_str::<Value>(&raw[start..start + len]) {
                    if value.is_object() {
                        return Some(value);
                    }
                }
            }
            search_from = start + 1;
        }
        None
    }
}
