use super::{next_revision, RecordBody, RecordHandle, ScanEntry, StateStore, StoredRecord};
use crate::error::{BeaconError, Result};
use crate::io::{atomic_write, remove_lock_file, with_exclusive_lock};
use crate::paths;
use crate::state::RunState;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// One JSON file per run under `<state_dir>/runs/`.
///
/// Writers serialize on a per-run `.lock` file and replace the record via
/// tempfile + rename, so readers never observe a partial record.
#[derive(Debug, Clone)]
pub struct FsStore {
    state_dir: PathBuf,
}

impl FsStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    fn read(&self, run_id: &str) -> Result<Option<(RunState, DateTime<Utc>)>> {
        let path = paths::run_record_path(&self.state_dir, run_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path).map_err(unavailable)?;
        let state = RunState::from_json(&data).map_err(|e| BeaconError::MalformedRecord {
            key: run_id.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some((state, modified_at(&path)?)))
    }

    fn write(&self, state: &RunState) -> Result<StoredRecord> {
        let path = paths::run_record_path(&self.state_dir, &state.run_id);
        let data = serde_json::to_string_pretty(state)?;
        atomic_write(&path, data.as_bytes()).map_err(unavailable)?;
        Ok(StoredRecord {
            handle: RecordHandle {
                key: state.run_id.clone(),
                revision: state.revision,
            },
            written_at: modified_at(&path)?,
            state: state.clone(),
        })
    }
}

fn unavailable(e: impl std::fmt::Display) -> BeaconError {
    BeaconError::StoreUnavailable(e.to_string())
}

fn modified_at(path: &Path) -> Result<DateTime<Utc>> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(unavailable)?;
    Ok(DateTime::<Utc>::from(modified))
}

impl StateStore for FsStore {
    fn name(&self) -> &'static str {
        "fs"
    }

    fn get(&self, run_id: &str) -> Result<Option<StoredRecord>> {
        paths::validate_run_id(run_id)?;
        Ok(self.read(run_id)?.map(|(state, written_at)| StoredRecord {
            handle: RecordHandle {
                key: run_id.to_string(),
                revision: state.revision,
            },
            written_at,
            state,
        }))
    }

    fn put(&self, state: &RunState) -> Result<StoredRecord> {
        paths::validate_run_id(&state.run_id)?;
        let lock = paths::run_lock_path(&self.state_dir, &state.run_id);
        with_exclusive_lock(&lock, || {
            if paths::run_record_path(&self.state_dir, &state.run_id).exists() {
                return Err(BeaconError::Conflict {
                    key: state.run_id.clone(),
                });
            }
            let record = self.write(&next_revision(state, 0))?;
            tracing::info!(run_id = %state.run_id, "created run record");
            Ok(record)
        })
    }

    fn update(&self, handle: &RecordHandle, state: &RunState) -> Result<StoredRecord> {
        paths::validate_run_id(&handle.key)?;
        if handle.key != state.run_id {
            return Err(BeaconError::MalformedRecord {
                key: handle.key.clone(),
                reason: format!("record holds run '{}'", state.run_id),
            });
        }
        let lock = paths::run_lock_path(&self.state_dir, &handle.key);
        with_exclusive_lock(&lock, || {
            let Some((current, _)) = self.read(&handle.key)? else {
                return Err(BeaconError::NotFound(handle.key.clone()));
            };
            if current.revision != handle.revision {
                return Err(BeaconError::Conflict {
                    key: handle.key.clone(),
                });
            }
            self.write(&next_revision(state, current.revision))
        })
    }

    fn scan(&self) -> Result<Vec<ScanEntry>> {
        let dir = paths::runs_dir(&self.state_dir);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(unavailable)? {
            let path = match entry {
                Ok(e) => e.path(),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some(paths::RECORD_EXT) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let (data, written_at) = match std::fs::read_to_string(&path)
                .map_err(unavailable)
                .and_then(|d| Ok((d, modified_at(&path)?)))
            {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(key, error = %e, "skipping unreadable run record");
                    continue;
                }
            };
            let (revision, body) = match RunState::from_json(&data) {
                Ok(state) => (state.revision, RecordBody::Parsed(state)),
                Err(e) => (0, RecordBody::Malformed(e.to_string())),
            };
            entries.push(ScanEntry {
                handle: RecordHandle {
                    key: key.to_string(),
                    revision,
                },
                written_at,
                body,
            });
        }
        entries.sort_by(|a, b| a.handle.key.cmp(&b.handle.key));
        Ok(entries)
    }

    fn delete(&self, handle: &RecordHandle) -> Result<()> {
        paths::validate_run_id(&handle.key)?;
        let lock = paths::run_lock_path(&self.state_dir, &handle.key);
        with_exclusive_lock(&lock, || {
            let path = paths::run_record_path(&self.state_dir, &handle.key);
            if !path.exists() {
                let _ = remove_lock_file(&lock);
                return Err(BeaconError::NotFound(handle.key.clone()));
            }
            // A record rewritten since the scan is live again; leave it.
            if let Ok(Some((current, _))) = self.read(&handle.key) {
                if current.revision != handle.revision {
                    return Err(BeaconError::Conflict {
                        key: handle.key.clone(),
                    });
                }
            }
            std::fs::remove_file(&path).map_err(unavailable)?;
            if let Err(e) = remove_lock_file(&lock) {
                tracing::warn!(key = %handle.key, error = %e, "failed to remove run lock file");
            }
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
