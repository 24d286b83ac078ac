use super::{next_revision, RecordBody, RecordHandle, ScanEntry, StateStore, StoredRecord};
use crate::error::{BeaconError, Result};
use crate::slack::{HistoryMessage, SlackClient};
use crate::state::RunState;
use chrono::{DateTime, Utc};

/// Run records kept as bot messages in a dedicated Slack channel, one JSON
/// document per message. The message `ts` is the record key and its
/// creation time.
///
/// Slack offers no conditional update, so `update` re-reads the message and
/// compares revisions immediately before writing. That narrows the race
/// window without closing it.
#[derive(Debug, Clone)]
pub struct SlackStore {
    client: SlackClient,
    channel_id: String,
}

impl SlackStore {
    pub fn new(client: SlackClient, channel_id: impl Into<String>) -> Self {
        Self {
            client,
            channel_id: channel_id.into(),
        }
    }

    /// Resolve the storage channel by name and build a store on it.
    pub fn connect(client: SlackClient, channel_name: &str) -> Result<Self> {
        let id = client
            .find_channel_id(channel_name)
            .map_err(|e| e.into_store_error())?
            .ok_or_else(|| {
                BeaconError::Config(format!("storage channel '{channel_name}' not found"))
            })?;
        tracing::debug!(channel = channel_name, id = %id, "resolved storage channel");
        Ok(Self::new(client, id))
    }

    fn entry(msg: &HistoryMessage) -> Option<ScanEntry> {
        let written_at = parse_ts(&msg.ts)?;
        let (revision, body) = match decode(&msg.text) {
            Ok(state) => (state.revision, RecordBody::Parsed(state)),
            Err(e) => (0, RecordBody::Malformed(e.to_string())),
        };
        Some(ScanEntry {
            handle: RecordHandle {
                key: msg.ts.clone(),
                revision,
            },
            written_at,
            body,
        })
    }
}

/// Slack message timestamps are `"<unix seconds>.<micros>"` strings.
pub fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs: i64 = secs.parse().ok()?;
    let micros: u32 = format!("{frac:0<6}").get(..6)?.parse().ok()?;
    DateTime::from_timestamp(secs, micros * 1_000)
}

/// Slack escapes `&`, `<`, and `>` in message text it hands back.
fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn decode(text: &str) -> Result<RunState> {
    RunState::from_json(&unescape(text))
}

/// Slack silently truncates message text past this many characters.
const MAX_TEXT_CHARS: usize = 40_000;

/// Serialize a record for storage, refusing anything Slack would cut short.
/// The length counted is after Slack escapes `&`, `<` and `>` on the way in.
fn encode(state: &RunState) -> Result<String> {
    let text = state.to_json()?;
    let stored_len: usize = text
        .chars()
        .map(|c| match c {
            '&' => 5,
            '<' | '>' => 4,
            _ => 1,
        })
        .sum();
    if stored_len > MAX_TEXT_CHARS {
        return Err(BeaconError::MalformedRecord {
            key: state.run_id.clone(),
            reason: format!(
                "record is {stored_len} characters once stored; Slack keeps at most {MAX_TEXT_CHARS}"
            ),
        });
    }
    Ok(text)
}

impl StateStore for SlackStore {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn get(&self, run_id: &str) -> Result<Option<StoredRecord>> {
        let newest = self
            .scan()?
            .into_iter()
            .filter_map(|entry| match entry.body {
                RecordBody::Parsed(state) if state.run_id == run_id => Some(StoredRecord {
                    handle: entry.handle,
                    written_at: entry.written_at,
                    state,
                }),
                _ => None,
            })
            .max_by_key(|r| r.written_at);
        Ok(newest)
    }

    fn put(&self, state: &RunState) -> Result<StoredRecord> {
        let stored = next_revision(state, 0);
        let text = encode(&stored)?;
        if self.get(&state.run_id)?.is_some() {
            return Err(BeaconError::Conflict {
                key: state.run_id.clone(),
            });
        }
        let ts = self
            .client
            .post_message(&self.channel_id, &text, None)
            .map_err(|e| e.into_store_error())?;
        tracing::info!(run_id = %state.run_id, ts = %ts, "created storage message");
        let written_at = parse_ts(&ts).unwrap_or_else(Utc::now);
        Ok(StoredRecord {
            handle: RecordHandle {
                key: ts,
                revision: stored.revision,
            },
            written_at,
            state: stored,
        })
    }

    fn update(&self, handle: &RecordHandle, state: &RunState) -> Result<StoredRecord> {
        let msg = self
            .client
            .message_at(&self.channel_id, &handle.key)
            .map_err(|e| e.into_store_error())?
            .ok_or_else(|| BeaconError::NotFound(handle.key.clone()))?;
        let current = decode(&msg.text).map_err(|e| BeaconError::MalformedRecord {
            key: handle.key.clone(),
            reason: e.to_string(),
        })?;
        if current.revision != handle.revision {
            return Err(BeaconError::Conflict {
                key: handle.key.clone(),
            });
        }
        let stored = next_revision(state, current.revision);
        let text = encode(&stored)?;
        self.client
            .update_message(&self.channel_id, &handle.key, &text, None)
            .map_err(|e| e.into_store_error())?;
        tracing::info!(run_id = %state.run_id, ts = %handle.key, "updated storage message");
        Ok(StoredRecord {
            handle: RecordHandle {
                key: handle.key.clone(),
                revision: stored.revision,
            },
            written_at: parse_ts(&handle.key).unwrap_or_else(Utc::now),
            state: stored,
        })
    }

    fn scan(&self) -> Result<Vec<ScanEntry>> {
        let messages = self
            .client
            .history(&self.channel_id)
            .map_err(|e| e.into_store_error())?;
        Ok(messages
            .iter()
            .filter(|m| m.bot_id.is_some())
            .filter_map(|m| {
                let entry = Self::entry(m);
                if entry.is_none() {
                    tracing::warn!(ts = %m.ts, "skipping storage message with unparseable ts");
                }
                entry
            })
            .collect())
    }

    fn delete(&self, handle: &RecordHandle) -> Result<()> {
        self.client
            .delete_message(&self.channel_id, &handle.key)
            .map_err(|e| e.into_store_error())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
