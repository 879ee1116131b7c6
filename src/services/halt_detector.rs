//! Classification of provider results into halt reasons.
//!
//! The detector never mutates state; it reports a reason and whether that
//! reason halts the loop outright or flows into retry/clarification.

use regex::Regex;
use std::sync::OnceLock;

use crate::domain::models::{HaltReason, InvocationStatus, ProviderErrorKind, ProviderResult};

/// Words that mark a hedged, ambiguous response.
const AMBIGUITY_VOCABULARY: &[&str] = &[
    "maybe",
    "could",
    "suggest",
    "recommend",
    "alternative",
    "option",
];

/// Tokens that mark an explicit blocked declaration.
const BLOCKED_TOKENS: &[&str] = &[
    "\"status\":\"blocked\"",
    "\"status\": \"blocked\"",
    "status: blocked",
];

fn ambiguity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let words = AMBIGUITY_VOCABULARY.join("|");
        Regex::new(&format!(r"(?i)\b(?:{words})\b")).expect("static ambiguity pattern")
    })
}

fn blocked_word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Standalone status token, not the word inside prose like "unblocked".
    RE.get_or_init(|| Regex::new(r"(?im)^\s*blocked\s*$").expect("static blocked pattern"))
}

/// What the detector concluded about one provider result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaltClassification {
    pub reason: HaltReason,
    pub details: String,
    /// Whether the loop must halt rather than retry.
    pub critical: bool,
}

pub struct HaltDetector;

impl HaltDetector {
    /// Classify a provider result.
    ///
    /// `classified_error` is the dispatcher's provider-specific error
    /// classification; `parse_failed` reports the authoritative trailer
    /// parse; `circuit_broken` is set when every provider in the chain was
    /// skipped by an open breaker.
    pub fn classify(
        result: &ProviderResult,
        classified_error: Option<ProviderErrorKind>,
        parse_failed: Option<&str>,
        circuit_broken: bool,
    ) -> Option<HaltClassification> {
        if circuit_broken {
            return Some(HaltClassification {
                reason: HaltReason::ProviderCircuitBroken,
                details: "every provider in the priority chain has an open breaker".to_string(),
                critical: true,
            });
        }

        if classified_error == Some(ProviderErrorKind::ResourceExhausted) {
            return Some(HaltClassification {
                reason: HaltReason::ResourceExhausted,
                details: format!("provider '{}' reported exhaustion", result.provider),
                critical: false,
            });
        }

        let combined = result.combined_output();

        // Exec failure: non-zero exit with empty output is critical; a
        // timeout or non-zero exit with output remains retryable.
        let nonzero_exit = matches!(result.exit_code, Some(code) if code != 0);
        if nonzero_exit && result.is_empty_output() {
            return Some(HaltClassification {
                reason: HaltReason::CursorExecFailure,
                details: format!(
                    "provider '{}' exited {} with no output",
                    result.provider,
                    result.exit_code.unwrap_or(-1)
                ),
                critical: true,
            });
        }
        if result.status == InvocationStatus::TimedOut {
            return Some(HaltClassification {
                reason: HaltReason::CursorExecFailure,
                details: result.stderr.clone(),
                critical: false,
            });
        }
        // A synthetic failure (spawn failed on every provider) never ran a
        // child; it flows into the normal validation-failure path.
        if result.status == InvocationStatus::Failed && result.exit_code.is_none() {
            return Some(HaltClassification {
                reason: HaltReason::CursorExecFailure,
                details: result.stderr.clone(),
                critical: false,
            });
        }

        if BLOCKED_TOKENS
            .iter()
            .any(|t| combined.to_lowercase().contains(t))
            || blocked_word_regex().is_match(&combined)
        {
            return Some(HaltClassification {
                reason: HaltReason::Blocked,
                details: "agent declared itself blocked".to_string(),
                critical: true,
            });
        }

        if let Some(parse_error) = parse_failed {
            return Some(HaltClassification {
                reason: HaltReason::OutputFormatInvalid,
                details: parse_error.to_string(),
                critical: true,
            });
        }

        if combined.contains('?') {
            return Some(HaltClassification {
                reason: HaltReason::AskedQuestion,
                details: "agent asked a clarifying question".to_string(),
                critical: false,
            });
        }

        if let Some(m) = ambiguity_regex().find(&combined) {
            return Some(HaltClassification {
                reason: HaltReason::Ambiguity,
                details: format!("ambiguity vocabulary present: '{}'", m.as_str()),
                critical: false,
            });
        }

        None
    }
}
