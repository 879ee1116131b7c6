//! Halt reason classification.

use serde::{Deserialize, Serialize};

/// Fixed set of reasons the halt detector can classify an agent result into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HaltReason {
    /// Provider child failed to execute meaningfully.
    CursorExecFailure,
    /// The agent declared itself blocked.
    Blocked,
    /// The mandatory JSON trailer was absent or malformed.
    OutputFormatInvalid,
    /// Every provider in the priority chain has an open breaker.
    ProviderCircuitBroken,
    /// The agent asked a clarifying question.
    AskedQuestion,
    /// The agent hedged with ambiguity vocabulary.
    Ambiguity,
    /// The provider signalled quota/connection exhaustion.
    ResourceExhausted,
}

impl HaltReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CursorExecFailure => "CURSOR_EXEC_FAILURE",
            Self::Blocked => "BLOCKED",
            Self::OutputFormatInvalid => "OUTPUT_FORMAT_INVALID",
            Self::ProviderCircuitBroken => "PROVIDER_CIRCUIT_BROKEN",
            Self::AskedQuestion => "ASKED_QUESTION",
            Self::Ambiguity => "AMBIGUITY",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
        }
    }

    /// Reasons that halt the loop unconditionally.
    ///
    /// Exec failure is critical only in the empty-output, non-zero-exit
    /// case; the detector decides that at classification time, so it is not
    /// part of this set.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::Blocked | Self::OutputFormatInvalid | Self::ProviderCircuitBroken
        )
    }

    /// Reasons that flow into clarification prompting rather than fixes.
    pub fn wants_clarification(&self) -> bool {
        matches!(self, Self::AskedQuestion | Self::Ambiguity)
    }
}
