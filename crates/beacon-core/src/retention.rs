//! Best-effort cleanup of stored run records.
//!
//! A sweep scans the whole store once, then deletes:
//! - every record written before `now - retention`, parseable or not
//!   (a window reaching past the earliest representable time expires nothing);
//! - every record that shares a run id with a more recently written one
//!   (leftovers from create races on backends without create-if-absent).
//!
//! Deletes are attempted one by one. A failed delete is logged and reported
//! in the [`SweepReport`]; it never stops the rest of the batch.

use crate::error::Result;
use crate::store::{RecordBody, RecordHandle, ScanEntry, StateStore};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteReason {
    Expired,
    Duplicate,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub key: String,
    pub run_id: Option<String>,
    pub reason: DeleteReason,
    /// `None` on success, the error text otherwise.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub kept: usize,
    pub malformed_skipped: usize,
    pub outcomes: Vec<DeleteOutcome>,
}

impl SweepReport {
    pub fn deleted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_none()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_some()).count()
    }
}

/// Decide what a sweep would delete, without touching the store.
pub fn plan(
    entries: &[ScanEntry],
    retention: Duration,
    now: DateTime<Utc>,
) -> Vec<(usize, DeleteReason)> {
    let cutoff = now.checked_sub_signed(retention);
    let mut doomed = Vec::new();
    let mut newest: HashMap<&str, usize> = HashMap::new();

    for (i, entry) in entries.iter().enumerate() {
        if cutoff.is_some_and(|c| entry.written_at < c) {
            doomed.push((i, DeleteReason::Expired));
            continue;
        }
        let Some(run_id) = entry.run_id() else {
            continue;
        };
        match newest.get(run_id).copied() {
            None => {
                newest.insert(run_id, i);
            }
            Some(j) => {
                let (keep, drop) = if is_newer(entry, &entries[j]) {
                    (i, j)
                } else {
                    (j, i)
                };
                newest.insert(run_id, keep);
                doomed.push((drop, DeleteReason::Duplicate));
            }
        }
    }

    doomed.sort_by_key(|(i, _)| *i);
    doomed
}

/// Newer write time wins; ties go to the higher revision, then the larger key.
fn is_newer(a: &ScanEntry, b: &ScanEntry) -> bool {
    (a.written_at, a.handle.revision, &a.handle.key)
        > (b.written_at, b.handle.revision, &b.handle.key)
}

pub fn sweep(
    store: &dyn StateStore,
    retention: Duration,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let entries = store.scan()?;
    let doomed = plan(&entries, retention, now);

    let mut report = SweepReport {
        scanned: entries.len(),
        kept: entries.len() - doomed.len(),
        malformed_skipped: 0,
        outcomes: Vec::with_capacity(doomed.len()),
    };

    let doomed_idx: Vec<usize> = doomed.iter().map(|(i, _)| *i).collect();
    for (i, entry) in entries.iter().enumerate() {
        if let RecordBody::Malformed(reason) = &entry.body {
            if !doomed_idx.contains(&i) {
                tracing::warn!(key = %entry.handle.key, %reason, "skipping malformed run record");
                report.malformed_skipped += 1;
            }
        }
    }

    for (i, reason) in doomed {
        let entry = &entries[i];
        report
            .outcomes
            .push(delete_one(store, &entry.handle, entry.run_id(), reason));
    }

    if !report.outcomes.is_empty() {
        tracing::info!(
            store = store.name(),
            deleted = report.deleted(),
            failed = report.failed(),
            "swept run records"
        );
    }
    Ok(report)
}

fn delete_one(
    store: &dyn StateStore,
    handle: &RecordHandle,
    run_id: Option<&str>,
    reason: DeleteReason,
) -> DeleteOutcome {
    let error = match store.delete(handle) {
        Ok(()) => {
            tracing::info!(key = %handle.key, ?run_id, ?reason, "deleted run record");
            None
        }
        Err(e) => {
            tracing::warn!(
                key = %handle.key,
                ?run_id,
                ?reason,
                error = %e,
                "failed to delete run record"
            );
            Some(e.to_string())
        }
    };
    DeleteOutcome {
        key: handle.key.clone(),
        run_id: run_id.map(str::to_string),
        reason,
        error,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
