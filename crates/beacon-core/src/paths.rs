use crate::error::{BeaconError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const BEACON_DIR: &str = ".beacon";
pub const RUNS_DIR: &str = "runs";
pub const CONFIG_FILE: &str = "config.yaml";

pub const RECORD_EXT: &str = "json";
pub const LOCK_EXT: &str = "lock";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Directory holding one JSON record per run, relative to the state dir.
pub fn runs_dir(state_dir: &Path) -> PathBuf {
    state_dir.join(RUNS_DIR)
}

pub fn run_record_path(state_dir: &Path, run_id: &str) -> PathBuf {
    runs_dir(state_dir).join(format!("{run_id}.{RECORD_EXT}"))
}

pub fn run_lock_path(state_dir: &Path, run_id: &str) -> PathBuf {
    runs_dir(state_dir).join(format!("{run_id}.{LOCK_EXT}"))
}

pub fn config_path(state_dir: &Path) -> PathBuf {
    state_dir.join(CONFIG_FILE)
}

// ---------------------------------------------------------------------------
// Identifier validation
// ---------------------------------------------------------------------------

static RUN_ID_RE: OnceLock<Regex> = OnceLock::new();

fn run_id_re() -> &'static Regex {
    // Run ids double as file stems, so no path separators or leading dots.
    RUN_ID_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-][A-Za-z0-9._\-]*$").unwrap())
}

pub fn validate_run_id(run_id: &str) -> Result<()> {
    if run_id.is_empty() || run_id.len() > 128 || !run_id_re().is_match(run_id) {
        return Err(BeaconError::InvalidRunId(run_id.to_string()));
    }
    Ok(())
}

pub fn validate_phase_name(phase: &str) -> Result<()> {
    if phase.trim().is_empty() || phase.len() > 128 {
        return Err(BeaconError::InvalidPhaseName(phase.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
