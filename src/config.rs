//! Run configuration for dbus-idle.
//!
//! There is no configuration file; everything comes from the command line.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Seconds of inactivity after which the session counts as idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct IdleThreshold(u64);

impl IdleThreshold {
    /// Threshold used when none is given.
    pub const DEFAULT_SECONDS: u64 = 120;

    /// Create a threshold from whole seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Get the threshold in seconds.
    pub fn as_secs(self) -> u64 {
        self.0
    }

    /// Get the threshold in milliseconds as the Wayland protocol expects it.
    ///
    /// Saturates at `u32::MAX` (about 49 days).
    pub fn as_millis_u32(self) -> u32 {
        u32::try_from(self.0.saturating_mul(1000)).unwrap_or(u32::MAX)
    }

    /// Get the threshold in milliseconds.
    pub fn as_millis(self) -> u64 {
        self.0.saturating_mul(1000)
    }
}

impl Default for IdleThreshold {
    fn default() -> Self {
        Self(Self::DEFAULT_SECONDS)
    }
}

impl fmt::Display for IdleThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Which backend the registry should hand out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BackendChoice {
    /// First backend that initializes, in registry order.
    #[default]
    Best,
    /// Exactly this backend, no fallback.
    Named(String),
}

impl FromStr for BackendChoice {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("best") {
            Ok(Self::Best)
        } else {
            Ok(Self::Named(s.to_ascii_lowercase()))
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Best => f.write_str("best"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Settings for one invocation.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Backend selection mode.
    pub backend: BackendChoice,

    /// Idle threshold.
    pub threshold: IdleThreshold,

    /// Verbose diagnostics.
    pub debug: bool,

    /// Print a JSON report instead of the bare number.
    pub json: bool,
}
