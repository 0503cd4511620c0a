//! Run configuration — immutable settings handed to the driver at run start.
//!
//! The file form uses duration strings like `"5s"`, `"500ms"`, `"2m"`; the
//! in-memory form holds `Duration`s.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Immutable configuration for one deployment run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Cluster target this run deploys to. One run at a time per target.
    pub target: String,
    /// Interval between rollout / endpoint polls.
    pub poll_interval: Duration,
    /// Wall-clock budget for each wave's health gate.
    pub gate_deadline: Duration,
    /// Wall-clock budget for resolving an external address.
    pub endpoint_budget: Duration,
    /// Satisfying polls required beyond the first before a workload counts
    /// as healthy (debounce against flapping).
    pub confirmation_polls: u32,
    /// Control-plane call attempts before surfacing unreachability.
    pub control_attempts: u32,
    /// Base delay for the exponential backoff between attempts.
    pub retry_base: Duration,
    /// Revisions retained per workload in the history.
    pub history_window: usize,
    /// Also roll earlier, healthy waves back when a later wave fails.
    /// Earlier waves commonly carry persistent data, so this is opt-in.
    pub cascade_rollback: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target: "default".to_string(),
            poll_interval: Duration::from_secs(5),
            gate_deadline: Duration::from_secs(300),
            endpoint_budget: Duration::from_secs(300),
            confirmation_polls: 1,
            control_attempts: 3,
            retry_base: Duration::from_secs(1),
            history_window: 20,
            cascade_rollback: false,
        }
    }
}

/// File form of [`RunConfig`] with duration strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRunConfig {
    pub target: Option<String>,
    pub poll_interval: Option<String>,
    pub gate_deadline: Option<String>,
    pub endpoint_budget: Option<String>,
    pub confirmation_polls: Option<u32>,
    pub control_attempts: Option<u32>,
    pub retry_base: Option<String>,
    pub history_window: Option<usize>,
    pub cascade_rollback: Option<bool>,
}

impl RunConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let raw: RawRunConfig = toml::from_str(&content)?;
        Ok(Self::from_raw(raw))
    }

    /// Merge a file config over the defaults. Unparseable durations fall
    /// back to the default for that field.
    pub fn from_raw(raw: RawRunConfig) -> Self {
        let defaults = Self::default();
        let dur = |s: Option<String>, fallback: Duration| {
            s.as_deref().and_then(parse_duration).unwrap_or(fallback)
        };
        Self {
            target: raw.target.unwrap_or(defaults.target),
            poll_interval: dur(raw.poll_interval, defaults.poll_interval),
            gate_deadline: dur(raw.gate_deadline, defaults.gate_deadline),
            endpoint_budget: dur(raw.endpoint_budget, defaults.endpoint_budget),
            confirmation_polls: raw.confirmation_polls.unwrap_or(defaults.confirmation_polls),
            control_attempts: raw.control_attempts.unwrap_or(defaults.control_attempts),
            retry_base: dur(raw.retry_base, defaults.retry_base),
            history_window: raw.history_window.unwrap_or(defaults.history_window),
            cascade_rollback: raw.cascade_rollback.unwrap_or(defaults.cascade_rollback),
        }
    }
}

/// Parse a duration string like "5s", "500ms", "2m", or a bare number of
/// seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
