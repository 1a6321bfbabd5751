//! Maps a prompt to a resource budget tier.
//!
//! Signal groups are checked in strict priority order and the first group
//! that matches decides the tier. Signals are never combined or weighted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Hard ceiling the generation service accepts for `max_tokens`.
pub const MAX_TOKENS_CEILING: u32 = 8192;

/// Ceilings above this get the long timeout.
const LONG_TIMEOUT_THRESHOLD: u32 = 5000;
const LONG_TIMEOUT: Duration = Duration::from_secs(120);
const SHORT_TIMEOUT: Duration = Duration::from_secs(75);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplexityTier {
    Static,
    MultiSection,
    ApiBacked,
    Spa,
    Large,
    Fullstack,
}

impl ComplexityTier {
    pub const ALL: [ComplexityTier; 6] = [
        ComplexityTier::Static,
        ComplexityTier::MultiSection,
        ComplexityTier::ApiBacked,
        ComplexityTier::Spa,
        ComplexityTier::Large,
        ComplexityTier::Fullstack,
    ];

    /// Upper limit on generated content size, in tokens.
    pub fn max_tokens(self) -> u32 {
        match self {
            ComplexityTier::Static => 1500,
            ComplexityTier::MultiSection => 2500,
            ComplexityTier::ApiBacked => 4000,
            ComplexityTier::Spa => 5000,
            ComplexityTier::Large => 7000,
            ComplexityTier::Fullstack => MAX_TOKENS_CEILING,
        }
    }

    pub fn timeout(self) -> Duration {
        Budget::from_ceiling(self.max_tokens()).timeout
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComplexityTier::Static => "STATIC",
            ComplexityTier::MultiSection => "MULTI_SECTION",
            ComplexityTier::ApiBacked => "API_BACKED",
            ComplexityTier::Spa => "SPA",
            ComplexityTier::Large => "LARGE",
            ComplexityTier::Fullstack => "FULLSTACK",
        }
    }
}

impl fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token ceiling and request timeout for one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Budget {
    /// Budget for a raw ceiling. The ceiling is capped at [`MAX_TOKENS_CEILING`]
    /// and the timeout scales with it.
    pub fn from_ceiling(max_tokens: u32) -> Self {
        let max_tokens = max_tokens.min(MAX_TOKENS_CEILING);
        let timeout = if max_tokens > LONG_TIMEOUT_THRESHOLD {
            LONG_TIMEOUT
        } else {
            SHORT_TIMEOUT
        };
        Self {
            max_tokens,
            timeout,
        }
    }

    pub fn for_tier(tier: ComplexityTier) -> Self {
        Self::from_ceiling(tier.max_tokens())
    }
}

/// Classify a prompt. Pure and total: anything without a signal is `Static`.
pub fn classify(prompt: &str) -> ComplexityTier {
    let text = prompt.to_lowercase();
    let len = text.chars().count();
    let has = |needle: &str| text.contains(needle);
    let stem = |w: &str| has_stem(&text, w);

    if has("fullstack")
        || has("full stack")
        || has("backend and frontend")
        || has("server and client")
        || (stem("node") && stem("react"))
        || (has("express") && has("mongodb"))
        || (has("django") && has("frontend"))
        || (has("flask") && has("frontend"))
    {
        return ComplexityTier::Fullstack;
    }

    if has("documentation") || has("large project") || (stem("react") && len > 1000) {
        return ComplexityTier::Large;
    }

    if stem("react")
        || stem("vue")
        || stem("angular")
        || has_word(&text, "spa")
        || has_word(&text, "spas")
        || has("single page application")
    {
        return ComplexityTier::Spa;
    }

    if stem("api")
        || has("fetch")
        || has("database")
        || has("backend")
        || has("auth")
    {
        return ComplexityTier::ApiBacked;
    }

    if has("responsive") || has("sections") || has("multi-page") || len > 300 {
        return ComplexityTier::MultiSection;
    }

    ComplexityTier::Static
}

/// Budget for a prompt: the tier's ceiling, unless the prompt explicitly
/// asks for a large budget, in which case the hard maximum is used.
pub fn budget_for(prompt: &str) -> Budget {
    let text = prompt.to_lowercase();
    if ["9000", "9k", "8k"].iter().any(|n| text.contains(n)) {
        return Budget::from_ceiling(MAX_TOKENS_CEILING);
    }
    Budget::for_tier(classify(prompt))
}

fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
}

/// A token starting with `stem`: "reactjs" and "apis" hit, "rapid" does not.
fn has_stem(text: &str, stem: &str) -> bool {
    tokens(text).any(|token| token.starts_with(stem))
}

/// Exact token match, for "spa" which prefixes ordinary words.
fn has_word(text: &str, word: &str) -> bool {
    tokens(text).any(|token| token == word)
}
