use super::{next_revision, RecordBody, RecordHandle, ScanEntry, StateStore, StoredRecord};
use crate::error::{BeaconError, Result};
use crate::state::RunState;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct Slot {
    key: String,
    written_at: DateTime<Utc>,
    body: String,
}

#[derive(Debug, Default)]
struct Inner {
    slots: Vec<Slot>,
    next_key: u64,
    failing_deletes: HashSet<String>,
}

/// In-process store with list semantics: several records may name the same
/// run, as with the Slack backend after a create race.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw record body, bypassing create-if-absent. Returns its key.
    pub fn insert_raw(&self, written_at: DateTime<Utc>, body: impl Into<String>) -> String {
        let mut inner = self.lock();
        inner.next_key += 1;
        let key = format!("mem-{}", inner.next_key);
        inner.slots.push(Slot {
            key: key.clone(),
            written_at,
            body: body.into(),
        });
        key
    }

    /// Make every later `delete` of `key` fail with `StoreUnavailable`.
    pub fn fail_deletes_for(&self, key: &str) {
        self.lock().failing_deletes.insert(key.to_string());
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicked test thread must not wedge the rest of the suite.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse(slot: &Slot) -> Option<RunState> {
    RunState::from_json(&slot.body).ok()
}

impl StateStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, run_id: &str) -> Result<Option<StoredRecord>> {
        let inner = self.lock();
        let newest = inner
            .slots
            .iter()
            .filter_map(|s| parse(s).map(|state| (s, state)))
            .filter(|(_, state)| state.run_id == run_id)
            .max_by_key(|(s, _)| s.written_at);
        Ok(newest.map(|(slot, state)| StoredRecord {
            handle: RecordHandle {
                key: slot.key.clone(),
                revision: state.revision,
            },
            written_at: slot.written_at,
            state,
        }))
    }

    fn put(&self, state: &RunState) -> Result<StoredRecord> {
        let mut inner = self.lock();
        let exists = inner
            .slots
            .iter()
            .filter_map(parse)
            .any(|s| s.run_id == state.run_id);
        if exists {
            return Err(BeaconError::Conflict {
                key: state.run_id.clone(),
            });
        }
        let stored = next_revision(state, 0);
        inner.next_key += 1;
        let key = format!("mem-{}", inner.next_key);
        let written_at = Utc::now();
        inner.slots.push(Slot {
            key: key.clone(),
            written_at,
            body: stored.to_json()?,
        });
        Ok(StoredRecord {
            handle: RecordHandle {
                key,
                revision: stored.revision,
            },
            written_at,
            state: stored,
        })
    }

    fn update(&self, handle: &RecordHandle, state: &RunState) -> Result<StoredRecord> {
        let mut inner = self.lock();
        let slot = inner
            .slots
            .iter_mut()
            .find(|s| s.key == handle.key)
            .ok_or_else(|| BeaconError::NotFound(handle.key.clone()))?;
        let current = RunState::from_json(&slot.body).map_err(|e| BeaconError::MalformedRecord {
            key: handle.key.clone(),
            reason: e.to_string(),
        })?;
        if current.revision != handle.revision {
            return Err(BeaconError::Conflict {
                key: handle.key.clone(),
            });
        }
        let stored = next_revision(state, current.revision);
        slot.body = stored.to_json()?;
        Ok(StoredRecord {
            handle: RecordHandle {
                key: handle.key.clone(),
                revision: stored.revision,
            },
            written_at: slot.written_at,
            state: stored,
        })
    }

    fn scan(&self) -> Result<Vec<ScanEntry>> {
        let inner = self.lock();
        Ok(inner
            .slots
            .iter()
            .map(|slot| {
                let (revision, body) = match RunState::from_json(&slot.body) {
                    Ok(state) => (state.revision, RecordBody::Parsed(state)),
                    Err(e) => (0, RecordBody::Malformed(e.to_string())),
                };
                ScanEntry {
                    handle: RecordHandle {
                        key: slot.key.clone(),
                        revision,
                    },
                    written_at: slot.written_at,
                    body,
                }
            })
            .collect())
    }

    fn delete(&self, handle: &RecordHandle) -> Result<()> {
        let mut inner = self.lock();
        if inner.failing_deletes.contains(&handle.key) {
            return Err(BeaconError::StoreUnavailable(format!(
                "delete of {} rejected",
                handle.key
            )));
        }
        let before = inner.slots.len();
        inner.slots.retain(|s| s.key != handle.key);
        if inner.slots.len() == before {
            return Err(BeaconError::NotFound(handle.key.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn get_prefers_newest_duplicate() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut old = RunState::new("wf-1", now);
        old.message_id = Some("old".into());
        let mut new = RunState::new("wf-1", now);
        new.message_id = Some("new".into());
        store.insert_raw(now - Duration::minutes(5), old.to_json().unwrap());
        let newest_key = store.insert_raw(now, new.to_json().unwrap());

        let got = store.get("wf-1").unwrap().unwrap();
        assert_eq!(got.handle.key, newest_key);
        assert_eq!(got.state.message_id.as_deref(), Some("new"));
    }

    #[test]
    fn update_checks_revision() {
        let store = MemoryStore::new();
        let rec = store.put(&RunState::new("wf-1", Utc::now())).unwrap();
        store.update(&rec.handle, &rec.state).unwrap();
        assert!(matches!(
            store.update(&rec.handle, &rec.state),
            Err(BeaconError::Conflict { .. })
        ));
    }

    #[test]
    fn injected_delete_failure() {
        let store = MemoryStore::new();
        let rec = store.put(&RunState::new("wf-1", Utc::now())).unwrap();
        store.fail_deletes_for(&rec.handle.key);
        assert!(matches!(
            store.delete(&rec.handle),
            Err(BeaconError::StoreUnavailable(_))
        ));
        assert_eq!(store.len(), 1);
    }
}
