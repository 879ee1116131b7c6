//! Per-provider invocation conventions.
//!
//! Providers differ only in binary name, flag spelling, and the error
//! vocabulary they print on quota/auth trouble. One spec per tag keeps the
//! subprocess plumbing generic.

use regex::Regex;

use crate::domain::models::ProviderErrorKind;

/// Invocation conventions for one provider CLI.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    /// Stable tag, e.g. "gemini".
    pub tag: String,
    /// Binary name; resolved on PATH unless overridden by configuration.
    pub binary: String,
    /// Arguments always passed for non-interactive execution.
    pub base_args: Vec<String>,
    /// Flag that resumes a session, e.g. `--resume <id>`.
    pub resume_flag: Option<String>,
    /// Flag that selects an agent mode, e.g. `--mode <mode>`.
    pub agent_mode_flag: Option<String>,
    /// Arguments for the session-listing interface, when the provider has
    /// one.
    pub session_list_args: Option<Vec<String>>,
    /// Ordered error classification patterns matched against combined
    /// stderr+stdout (case-insensitive). First match wins.
    patterns: Vec<(Regex, ProviderErrorKind)>,
    /// Patterns that must all match for a resource-exhausted verdict; used
    /// by providers that split the signal across two phrases.
    conjunct_exhausted: Vec<Regex>,
}

fn pat(p: &str) -> Regex {
    // Patterns are static and known-good.
    Regex::new(&format!("(?i){p}")).expect("static provider pattern")
}

impl ProviderSpec {
    /// Built-in conventions for a known tag.
    pub fn builtin(tag: &str) -> Option<Self> {
        match tag {
            "gemini" => Some(Self {
                tag: "gemini".into(),
                binary: "gemini".into(),
                base_args: vec!["--yolo".into(), "--output-format".into(), "json".into()],
                resume_flag: Some("--resume".into()),
                agent_mode_flag: None,
                session_list_args: Some(vec!["sessions".into(), "list".into(), "--json".into()]),
                patterns: vec![
                    (pat("resource[ _]exhausted"), ProviderErrorKind::ResourceExhausted),
                    (pat("rate limit"), ProviderErrorKind::RateLimit),
                    (pat("quota"), ProviderErrorKind::QuotaExceeded),
                    (pat("api key"), ProviderErrorKind::ApiError),
                    (pat("authentication"), ProviderErrorKind::ApiError),
                ],
                conjunct_exhausted: Vec::new(),
            }),
            "cursor" => Some(Self {
                tag: "cursor".into(),
                binary: "cursor-agent".into(),
                base_args: vec!["--print".into(), "--output-format".into(), "json".into()],
                resume_flag: Some("--resume".into()),
                agent_mode_flag: Some("--mode".into()),
                session_list_args: Some(vec!["ls".into(), "--json".into()]),
                patterns: Vec::new(),
                conjunct_exhausted: vec![pat("connect error"), pat("resource_exhausted")],
            }),
            "codex" => Some(Self {
                tag: "codex".into(),
                binary: "codex".into(),
                base_args: vec!["exec".into(), "--json".into()],
                resume_flag: Some("--session".into()),
                agent_mode_flag: None,
                session_list_args: None,
                patterns: vec![
                    (pat("rate limit"), ProviderErrorKind::RateLimit),
                    (pat("quota"), ProviderErrorKind::QuotaExceeded),
                    (pat("usage limit"), ProviderErrorKind::ResourceExhausted),
                    (pat("unauthorized"), ProviderErrorKind::AuthFailed),
                    (pat("api key"), ProviderErrorKind::ApiError),
                ],
                conjunct_exhausted: Vec::new(),
            }),
            "claude" => Some(Self {
                tag: "claude".into(),
                binary: "claude".into(),
                base_args: vec![
                    "--print".into(),
                    "--output-format".into(),
                    "json".into(),
                    "--dangerously-skip-permissions".into(),
                ],
                resume_flag: Some("--resume".into()),
                agent_mode_flag: None,
                session_list_args: None,
                patterns: vec![
                    (pat("rate limit"), ProviderErrorKind::RateLimit),
                    (pat("overloaded"), ProviderErrorKind::ResourceExhausted),
                    (pat("quota"), ProviderErrorKind::QuotaExceeded),
                    (pat("authentication"), ProviderErrorKind::AuthFailed),
                    (pat("api key"), ProviderErrorKind::ApiError),
                ],
                conjunct_exhausted: Vec::new(),
            }),
            "copilot" => Some(Self {
                tag: "copilot".into(),
                binary: "copilot".into(),
                base_args: vec!["--no-color".into(), "--print".into()],
                resume_flag: Some("--resume".into()),
                agent_mode_flag: None,
                session_list_args: None,
                patterns: vec![
                    (pat("rate limit"), ProviderErrorKind::RateLimit),
                    (pat("quota"), ProviderErrorKind::QuotaExceeded),
                    (pat("authentication"), ProviderErrorKind::AuthFailed),
                ],
                conjunct_exhausted: Vec::new(),
            }),
            _ => None,
        }
    }

    /// Classify combined stderr+stdout into a breaker-tripping error kind.
    pub fn classify(&self, combined_output: &str) -> Option<ProviderErrorKind> {
        if !self.conjunct_exhausted.is_empty()
            && self
                .conjunct_exhausted
                .iter()
                .all(|p| p.is_match(combined_output))
        {
            return Some(ProviderErrorKind::ResourceExhausted);
        }
        self.patterns
            .iter()
            .find(|(p, _)| p.is_match(combined_output))
            .map(|(_, kind)| *kind)
    }
}
