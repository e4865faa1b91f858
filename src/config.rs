//! Engine configuration.
//!
//! Built once at startup (from the environment, then CLI flags) and
//! validated before any evaluation runs. Evaluations never read process
//! state on their own.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound accepted for `max_text_chars`. Keeps the O(m*n) table small.
pub const MAX_TEXT_CHARS_LIMIT: usize = 10_000;

/// How the detector seeds its baseline confidence before any rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselinePolicy {
    /// Midpoint of the range. Deterministic.
    #[default]
    Midpoint,
    /// Uniform draw from the range.
    Sampled,
}

impl FromStr for BaselinePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "midpoint" => Ok(BaselinePolicy::Midpoint),
            "sampled" => Ok(BaselinePolicy::Sampled),
            other => Err(format!(
                "unknown baseline policy '{other}' (expected 'midpoint' or 'sampled')"
            )),
        }
    }
}

impl fmt::Display for BaselinePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaselinePolicy::Midpoint => f.write_str("midpoint"),
            BaselinePolicy::Sampled => f.write_str("sampled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Longest reference or hypothesis accepted, in characters.
    pub max_text_chars: usize,
    pub baseline: BaselinePolicy,
    /// Fill missing fluency/intonation/rhythm with simulated values instead
    /// of the accuracy score.
    pub simulate_missing: bool,
    /// Return `Error::InvariantViolation` instead of clamping.
    pub strict_invariants: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_text_chars: 500,
            baseline: BaselinePolicy::Midpoint,
            simulate_missing: false,
            strict_invariants: true,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// Reads:
    /// - PRONOUNCE_MAX_TEXT_CHARS (optional, default: 500)
    /// - PRONOUNCE_BASELINE (optional, `midpoint` or `sampled`)
    /// - PRONOUNCE_SIMULATE (optional, default: "false")
    /// - PRONOUNCE_STRICT (optional, default: "true")
    ///
    /// Flags accept true/false, 1/0, yes/no and on/off.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let max_text_chars = match std::env::var("PRONOUNCE_MAX_TEXT_CHARS") {
            Ok(raw) => raw.trim().parse::<usize>().map_err(|_| {
                Error::Config(format!("PRONOUNCE_MAX_TEXT_CHARS is not a number: '{raw}'"))
            })?,
            Err(_) => defaults.max_text_chars,
        };
        let baseline = match std::env::var("PRONOUNCE_BASELINE") {
            Ok(raw) => raw.parse::<BaselinePolicy>().map_err(Error::Config)?,
            Err(_) => defaults.baseline,
        };
        let simulate_missing = env_flag("PRONOUNCE_SIMULATE", defaults.simulate_missing)?;
        let strict_invariants = env_flag("PRONOUNCE_STRICT", defaults.strict_invariants)?;

        let config = Self {
            max_text_chars,
            baseline,
            simulate_missing,
            strict_invariants,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_text_chars == 0 {
            return Err(Error::Config("max_text_chars must be at least 1".into()));
        }
        if self.max_text_chars > MAX_TEXT_CHARS_LIMIT {
            return Err(Error::Config(format!(
                "max_text_chars {} exceeds the limit of {MAX_TEXT_CHARS_LIMIT}",
                self.max_text_chars
            )));
        }
        Ok(())
    }
}

fn env_flag(name: &str, default: bool) -> Result<bool> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{name} is not a boolean: '{raw}'"))),
    }
}
