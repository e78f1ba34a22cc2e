use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::timeouts::{TimeoutOverride, TimeoutPolicy};

pub const DEFAULT_CONCURRENCY: usize = 32;
pub const DEFAULT_TIMEOUT_SEC: u64 = 100;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_PACING_MS: u64 = 250;

/// Validated scan settings, ready to hand to the orchestrator.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub concurrency: usize,
    pub default_timeout: Duration,
    /// Retries allowed per target when the server keeps sending flood waits.
    pub max_rate_limit_retries: u32,
    /// Delay a slot is held after each finished target. Throughput knob.
    pub pacing: Duration,
    pub overrides: Vec<TimeoutOverride>,
    /// Dialogs to leave after a successful fetch.
    pub leave_ids: HashSet<i64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SEC),
            max_rate_limit_retries: DEFAULT_MAX_RETRIES,
            pacing: Duration::from_millis(DEFAULT_PACING_MS),
            overrides: Vec::new(),
            leave_ids: HashSet::new(),
        }
    }
}

impl ScanConfig {
    /// Load settings from a JSON config file. A missing or unreadable file is
    /// not an error: the defaults apply and a diagnostic is logged.
    pub fn load(path: impl AsRef<Path>) -> ScanConfig {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                log::debug!("config {} not read ({e}); using defaults", path.display());
                return ScanConfig::default();
            }
        };
        match Self::from_json_str(&content) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::warn!(
                    "config {} is not valid JSON ({e}); using defaults",
                    path.display()
                );
                ScanConfig::default()
            }
        }
    }

    /// Parse and validate a JSON config document.
    pub fn from_json_str(s: &str) -> Result<ScanConfig, serde_json::Error> {
        let raw: RawConfig = serde_json::from_str(s)?;
        Ok(raw.validate())
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::new(self.default_timeout, self.overrides.clone())
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    scan: RawScan,
    timeouts: RawTimeouts,
    actions: RawActions,
}

#[derive(Deserialize)]
#[serde(default)]
struct RawScan {
    concurrency: i64,
    default_timeout_sec: i64,
    max_rate_limit_retries: i64,
    pacing_ms: i64,
}

impl Default for RawScan {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY as i64,
            default_timeout_sec: DEFAULT_TIMEOUT_SEC as i64,
            max_rate_limit_retries: DEFAULT_MAX_RETRIES as i64,
            pacing_ms: DEFAULT_PACING_MS as i64,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawTimeouts {
    overrides: Vec<RawOverride>,
}

#[derive(Deserialize)]
struct RawOverride {
    #[serde(default)]
    name: String,
    timeout_sec: i64,
    #[serde(default)]
    ids: Vec<IdValue>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawActions {
    leave_ids: Vec<IdValue>,
}

/// Id lists accept integers or numeric strings; anything else is dropped.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdValue {
    Num(i64),
    Text(String),
}

fn parse_id_list(values: Vec<IdValue>) -> HashSet<i64> {
    let mut out = HashSet::new();
    for value in values {
        match value {
            IdValue::Num(n) => {
                out.insert(n);
            }
            IdValue::Text(s) => match s.trim().parse::<i64>() {
                Ok(n) => {
                    out.insert(n);
                }
                Err(_) => {
                    if !s.trim().is_empty() {
                        log::warn!("ignoring non-numeric id {s:?} in config");
                    }
                }
            },
        }
    }
    out
}

impl RawConfig {
    /// Replace out-of-range values with defaults rather than failing, logging
    /// each substitution. Matches how the original deployment treated its
    /// hand-edited config file.
    fn validate(self) -> ScanConfig {
        let concurrency = if self.scan.concurrency > 0 {
            self.scan.concurrency as usize
        } else {
            log::warn!(
                "scan.concurrency must be positive, got {}; using {DEFAULT_CONCURRENCY}",
                self.scan.concurrency
            );
            DEFAULT_CONCURRENCY
        };

        let default_timeout = if self.scan.default_timeout_sec > 0 {
            Duration::from_secs(self.scan.default_timeout_sec as u64)
        } else {
            log::warn!(
                "scan.default_timeout_sec must be positive, got {}; using {DEFAULT_TIMEOUT_SEC}",
                self.scan.default_timeout_sec
            );
            Duration::from_secs(DEFAULT_TIMEOUT_SEC)
        };

        let max_rate_limit_retries = if self.scan.max_rate_limit_retries >= 0 {
            self.scan.max_rate_limit_retries as u32
        } else {
            log::warn!(
                "scan.max_rate_limit_retries must not be negative, got {}; using {DEFAULT_MAX_RETRIES}",
                self.scan.max_rate_limit_retries
            );
            DEFAULT_MAX_RETRIES
        };

        let pacing = if self.scan.pacing_ms >= 0 {
            Duration::from_millis(self.scan.pacing_ms as u64)
        } else {
            log::warn!(
                "scan.pacing_ms must not be negative, got {}; using {DEFAULT_PACING_MS}",
                self.scan.pacing_ms
            );
            Duration::from_millis(DEFAULT_PACING_MS)
        };

        let mut overrides = Vec::new();
        for (idx, raw) in self.timeouts.overrides.into_iter().enumerate() {
            if raw.timeout_sec <= 0 {
                log::warn!(
                    "timeouts.overrides[{idx}] ({:?}): timeout_sec must be positive, got {}; skipping",
                    raw.name,
                    raw.timeout_sec
                );
                continue;
            }
            let name = if raw.name.is_empty() {
                format!("override-{idx}")
            } else {
                raw.name
            };
            overrides.push(TimeoutOverride {
                name,
                timeout: Duration::from_secs(raw.timeout_sec as u64),
                ids: parse_id_list(raw.ids),
            });
        }

        ScanConfig {
            concurrency,
            default_timeout,
            max_rate_limit_retries,
            pacing,
            overrides,
            leave_ids: parse_id_list(self.actions.leave_ids),
        }
    }
}
