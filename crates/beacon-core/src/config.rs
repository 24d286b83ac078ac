use crate::error::{BeaconError, Result};
use crate::paths;
use crate::types::{ColorClass, PhaseOrder, StepPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Palette
// ---------------------------------------------------------------------------

/// Display accent per [`ColorClass`], as `#RRGGBB` strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    #[serde(default = "default_start")]
    pub start: String,
    #[serde(default = "default_progress")]
    pub progress: String,
    #[serde(default = "default_success")]
    pub success: String,
    #[serde(default = "default_failure")]
    pub failure: String,
    #[serde(default = "default_skipped")]
    pub skipped: String,
    #[serde(default = "default_start")]
    pub header: String,
}

fn default_start() -> String {
    "#2196F3".to_string()
}

fn default_progress() -> String {
    "#FF9800".to_string()
}

fn default_success() -> String {
    "#4CAF50".to_string()
}

fn default_failure() -> String {
    "#F44336".to_string()
}

fn default_skipped() -> String {
    "#9E9E9E".to_string()
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            start: default_start(),
            progress: default_progress(),
            success: default_success(),
            failure: default_failure(),
            skipped: default_skipped(),
            header: default_start(),
        }
    }
}

impl Palette {
    pub fn color_for(&self, class: ColorClass) -> &str {
        match class {
            ColorClass::Start => &self.start,
            ColorClass::Progress => &self.progress,
            ColorClass::Success => &self.success,
            ColorClass::Failure => &self.failure,
            ColorClass::Skipped => &self.skipped,
        }
    }

    fn entries(&self) -> [(&'static str, &str); 6] {
        [
            ("start", &self.start),
            ("progress", &self.progress),
            ("success", &self.success),
            ("failure", &self.failure),
            ("skipped", &self.skipped),
            ("header", &self.header),
        ]
    }
}

fn is_hex_color(s: &str) -> bool {
    s.len() == 7 && s.starts_with('#') && s[1..].chars().all(|c| c.is_ascii_hexdigit())
}

// ---------------------------------------------------------------------------
// BeaconConfig (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default)]
    pub step_policy: StepPolicy,
    #[serde(default)]
    pub phase_order: PhaseOrder,
    #[serde(default)]
    pub palette: Palette,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_sweep_on_notify")]
    pub sweep_on_notify: bool,
}

fn default_version() -> u32 {
    1
}

fn default_title() -> String {
    "Infrastructure Deployment Pipeline".to_string()
}

fn default_retention_hours() -> u64 {
    10
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    200
}

fn default_sweep_on_notify() -> bool {
    true
}

const MAX_BACKOFF_MS: u64 = 2_000;
/// One year. Longer windows are accepted but almost certainly a typo.
const MAX_SANE_RETENTION_HOURS: u64 = 24 * 365;

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            title: default_title(),
            retention_hours: default_retention_hours(),
            step_policy: StepPolicy::default(),
            phase_order: PhaseOrder::default(),
            palette: Palette::default(),
            http_timeout_secs: default_http_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            sweep_on_notify: default_sweep_on_notify(),
        }
    }
}

impl BeaconConfig {
    /// Retention window. Saturates at `TimeDelta::MAX` rather than overflowing.
    pub fn retention(&self) -> chrono::TimeDelta {
        i64::try_from(self.retention_hours)
            .ok()
            .and_then(chrono::TimeDelta::try_hours)
            .unwrap_or(chrono::TimeDelta::MAX)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_backoff: Duration::from_millis(self.backoff_ms),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS.max(self.backoff_ms)),
        }
    }

    /// Load `config.yaml` from the state dir, or defaults when absent.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = paths::config_path(state_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_file(&path)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            BeaconError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let cfg: BeaconConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, state_dir: &Path) -> Result<()> {
        let path = paths::config_path(state_dir);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.retention_hours == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "retention_hours=0 expires every run record on each sweep".to_string(),
            });
        } else if self.retention_hours > MAX_SANE_RETENTION_HOURS {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "retention_hours={} is over a year; records will effectively never expire",
                    self.retention_hours
                ),
            });
        }

        if self.max_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "max_attempts=0 is treated as 1".to_string(),
            });
        }

        if self.http_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "http_timeout_secs must be greater than 0".to_string(),
            });
        }

        for (name, value) in self.palette.entries() {
            if !is_hex_color(value) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("palette.{name} '{value}' is not a #RRGGBB color"),
                });
            }
        }

        if let PhaseOrder::Canonical(names) = &self.phase_order {
            let mut seen = HashSet::new();
            for name in names {
                if !seen.insert(name.as_str()) {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!("phase_order lists '{name}' more than once"),
                    });
                }
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff shared by the merge loop and the Slack client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        BeaconConfig::default().retry_policy()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
