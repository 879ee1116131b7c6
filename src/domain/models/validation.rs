//! Validation outcome model.
//!
//! A validation run accumulates passed/failed rule names and grades each
//! acceptance criterion on a match-quality lattice; overall confidence is
//! the minimum quality across criteria.

use serde::{Deserialize, Serialize};

/// Graded outcome of matching one acceptance criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchQuality {
    /// No evidence of the criterion at all.
    None,
    /// Weak keyword-level evidence only.
    Low,
    /// Inferred match from summaries or file listings.
    Medium,
    /// Direct regex/substring match in the declared outputs.
    High,
    /// Structural confirmation by an AST adapter.
    Exact,
}

impl MatchQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "EXACT",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::None => "NONE",
        }
    }

    /// Collapse a per-criterion quality into a report confidence level.
    pub fn to_confidence(self) -> Confidence {
        match self {
            Self::Exact | Self::High => Confidence::High,
            Self::Medium => Confidence::Medium,
            Self::Low => Confidence::Low,
            Self::None => Confidence::Uncertain,
        }
    }
}

/// Confidence attached to a whole validation report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Uncertain,
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Uncertain => "UNCERTAIN",
        }
    }

    /// Whether this confidence is weak enough to warrant interrogation.
    pub fn needs_interrogation(&self) -> bool {
        matches!(self, Self::Uncertain | Self::Low)
    }
}

/// Result of running the validation rule chain on one agent attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether the attempt satisfies the task.
    pub valid: bool,
    /// Terse reason when invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Names of rules that passed, in execution order.
    #[serde(default)]
    pub rules_passed: Vec<String>,
    /// Names of rules that failed, in execution order.
    #[serde(default)]
    pub rules_failed: Vec<String>,
    /// Minimum criterion quality, collapsed.
    pub confidence: Confidence,
    /// Criteria with no satisfying evidence.
    #[serde(default)]
    pub failed_criteria: Vec<String>,
    /// Criteria that could not be decided either way.
    #[serde(default)]
    pub uncertain_criteria: Vec<String>,
}

impl ValidationReport {
    /// A report for an attempt that passed every rule.
    pub fn valid_with(rules_passed: Vec<String>, confidence: Confidence) -> Self {
        Self {
            valid: true,
            reason: None,
            rules_passed,
            rules_failed: Vec::new(),
            confidence,
            failed_criteria: Vec::new(),
            uncertain_criteria: Vec::new(),
        }
    }

    /// A report rejected with a single reason before criteria were graded.
    pub fn invalid(reason: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            rules_passed: Vec::new(),
            rules_failed: vec![rule.into()],
            confidence: Confidence::Uncertain,
            failed_criteria: Vec::new(),
            uncertain_criteria: Vec::new(),
        }
    }

    /// Mark this report valid after an external confirmation (helper agent
    /// or interrogation), recording the confirming rule.
    pub fn confirm(&mut self, rule: impl Into<String>) {
        self.valid = true;
        self.reason = None;
        self.rules_passed.push(rule.into());
        self.failed_criteria.clear();
        self.uncertain_criteria.clear();
    }
}

/// Cached per-criterion verdict stored in the validation cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCriterion {
    pub satisfied: bool,
    pub match_quality: MatchQuality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_ordering_follows_lattice() {
        assert!(MatchQuality::Exact > MatchQuality::High);
        assert!(MatchQuality::High > MatchQuality::Medium);
        assert!(MatchQuality::Medium > MatchQuality::Low);
        assert!(MatchQuality::Low > MatchQuality::None);
    }

    #[test]
    fn confidence_collapse() {
        assert_eq!(MatchQuality::Exact.to_confidence(), Confidence::High);
        assert_eq!(MatchQuality::High.to_confidence(), Confidence::High);
        assert_eq!(MatchQuality::Medium.to_confidence(), Confidence::Medium);
        assert_eq!(MatchQuality::Low.to_confidence(), Confidence::Low);
        assert_eq!(MatchQuality::None.to_confidence(), Confidence::Uncertain);
    }

    #[test]
    fn interrogation_gate() {
        assert!(Confidence::Uncertain.needs_interrogation());
        assert!(Confidence::Low.needs_interrogation());
        assert!(!Confidence::Medium.needs_interrogation());
        assert!(!Confidence::High.needs_interrogation());
    }

    #[test]
    fn confirm_clears_outstanding_criteria() {
        let mut report = ValidationReport::invalid("missing artifact", "required_artifacts");
        report.failed_criteria.push("endpoint /login exists".into());
        report.confirm("helper_agent_confirmation");
        assert!(report.valid);
        assert!(report.reason.is_none());
        assert!(report.failed_criteria.is_empty());
        assert!(report
            .rules_passed
            .contains(&"helper_agent_confirmation".to_string()));
    }
}
