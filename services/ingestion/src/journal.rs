//! File-backed outbox event log
//!
//! Durable implementation of [`EventLog`]: every append and every
//! mark-delivered is a record in an append-only journal file. Opening the
//! journal replays all records to rebuild the row set and the undelivered
//! scan state, so delivery bookkeeping survives restarts.
//!
//! # Binary Format (per record)
//! ```text
//! [body_len: u32]
//! [body:     bincode(JournalRecord)]
//! [checksum: u32]  // CRC32C over body
//! ```
//!
//! Files rotate by size (`outbox-000000.log`, `outbox-000001.log`, ...).
//! A torn or corrupt record at the tail of the newest file is truncated on
//! recovery; corruption anywhere else is fatal.

use chrono::{DateTime, Utc};
use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use types::ids::{EventId, MerchantId, OrderId};

use crate::outbox::{EventKind, EventLog, OutboxError, OutboxEvent};

// ── Records ─────────────────────────────────────────────────────────

/// One journal record: an outbox row creation or a delivery mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum JournalRecord {
    Appended(OutboxEvent),
    Delivered { id: EventId, at: DateTime<Utc> },
}

/// Frame a record: length prefix, bincode body, CRC32C trailer.
fn encode_record(record: &JournalRecord) -> Result<Vec<u8>, OutboxError> {
    let body =
        bincode::serialize(record).map_err(|e| OutboxError::Serialization(e.to_string()))?;
    let mut buf = Vec::with_capacity(4 + body.len() + 4);
    buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
    buf.extend_from_slice(&body);
    buf.extend_from_slice(&crc32c(&body).to_le_bytes());
    Ok(buf)
}

/// Why decoding a record at some offset stopped.
enum DecodeFailure {
    /// Fewer bytes than a complete frame: a torn tail write.
    Truncated,
    /// Checksum mismatch or undecodable body.
    Corrupt(String),
}

/// Decode one framed record from `data`, returning the record and the
/// total bytes consumed.
fn decode_record(data: &[u8]) -> Result<(JournalRecord, usize), DecodeFailure> {
    if data.len() < 4 {
        return Err(DecodeFailure::Truncated);
    }
    let body_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;

    // Reject absurd lengths before trying to allocate or slice
    if body_len > 100_000_000 {
        return Err(DecodeFailure::Corrupt(format!(
            "implausible record length {}",
            body_len
        )));
    }

    let total = 4 + body_len + 4;
    if data.len() < total {
        return Err(DecodeFailure::Truncated);
    }

    let body = &data[4..4 + body_len];
    let stored = u32::from_le_bytes([
        data[4 + body_len],
        data[4 + body_len + 1],
        data[4 + body_len + 2],
        data[4 + body_len + 3],
    ]);
    if crc32c(body) != stored {
        return Err(DecodeFailure::Corrupt(format!(
            "checksum mismatch: stored {stored:#010x}, computed {:#010x}",
            crc32c(body)
        )));
    }

    let record = bincode::deserialize(body)
        .map_err(|e| DecodeFailure::Corrupt(format!("undecodable record body: {e}")))?;
    Ok((record, total))
}

// ── Flush / Fsync Policies ──────────────────────────────────────────

/// Controls when buffered data is flushed to the OS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlushPolicy {
    /// Flush after every write.
    EveryWrite,
    /// Flush every N writes.
    EveryN(usize),
}

/// Controls when `fsync` (durable write) is called.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FsyncPolicy {
    /// Fsync after every write.
    EveryWrite,
    /// Fsync every N writes.
    EveryN(usize),
    /// Fsync only on file rotation.
    OnRotation,
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for the journal-backed event log.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory for journal files.
    pub dir: PathBuf,
    /// Maximum file size in bytes before rotation (default 64 MiB).
    pub max_file_size: u64,
    /// Flush policy.
    pub flush_policy: FlushPolicy,
    /// Fsync policy.
    pub fsync_policy: FsyncPolicy,
}

impl JournalConfig {
    /// Create a config with sensible defaults.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: 64 * 1024 * 1024, // 64 MiB
            flush_policy: FlushPolicy::EveryWrite,
            fsync_policy: FsyncPolicy::EveryWrite,
        }
    }
}

// ── Journal-backed event log ────────────────────────────────────────

struct JournalInner {
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_file_size: u64,
    file_index: u64,
    writes_since_flush: usize,
    writes_since_fsync: usize,
    /// All rows in creation order.
    events: Vec<OutboxEvent>,
    /// Row position by event id.
    index: HashMap<EventId, usize>,
    next_id: u64,
}

/// Durable [`EventLog`] over an append-only record journal.
pub struct JournalEventLog {
    config: JournalConfig,
    inner: Mutex<JournalInner>,
}

impl JournalEventLog {
    /// Open the journal, replaying existing files to rebuild state.
    pub fn open(config: JournalConfig) -> Result<Self, OutboxError> {
        fs::create_dir_all(&config.dir)?;

        let mut events: Vec<OutboxEvent> = Vec::new();
        let mut index: HashMap<EventId, usize> = HashMap::new();

        let files = Self::journal_files(&config.dir)?;
        let last = files.len().checked_sub(1);
        for (i, path) in files.iter().enumerate() {
            let is_tail_file = Some(i) == last;
            Self::replay_file(path, is_tail_file, &mut events, &mut index)?;
        }

        let next_id = events.last().map(|e| e.id.as_u64() + 1).unwrap_or(0);
        let file_index = files
            .last()
            .and_then(|p| Self::parse_index(p))
            .unwrap_or(0);
        let current_file = Self::journal_path(&config.dir, file_index);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&current_file)?;
        let current_file_size = file.metadata()?.len();

        let undelivered = events.iter().filter(|e| !e.delivered).count();
        info!(
            rows = events.len(),
            undelivered,
            files = files.len().max(1),
            "Outbox journal opened"
        );

        Ok(Self {
            config,
            inner: Mutex::new(JournalInner {
                writer: BufWriter::new(file),
                current_file,
                current_file_size,
                file_index,
                writes_since_flush: 0,
                writes_since_fsync: 0,
                events,
                index,
                next_id,
            }),
        })
    }

    /// Force flush + fsync (used before shutdown).
    pub fn sync(&self) -> Result<(), OutboxError> {
        let mut inner = self.inner.lock().expect("journal lock poisoned");
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;
        inner.writes_since_flush = 0;
        inner.writes_since_fsync = 0;
        Ok(())
    }

    // ── Recovery ────────────────────────────────────────────────────

    /// Replay one journal file into the row set.
    ///
    /// On a torn or corrupt record in the tail file, truncates the file at
    /// the last good offset and stops; the same damage elsewhere is fatal.
    fn replay_file(
        path: &Path,
        is_tail_file: bool,
        events: &mut Vec<OutboxEvent>,
        index: &mut HashMap<EventId, usize>,
    ) -> Result<(), OutboxError> {
        let data = fs::read(path)?;
        let mut pos = 0usize;

        while pos < data.len() {
            match decode_record(&data[pos..]) {
                Ok((record, consumed)) => {
                    Self::apply_record(record, events, index)?;
                    pos += consumed;
                }
                Err(failure) => {
                    let detail = match &failure {
                        DecodeFailure::Truncated => "torn record".to_string(),
                        DecodeFailure::Corrupt(msg) => msg.clone(),
                    };
                    if is_tail_file {
                        warn!(
                            file = %path.display(),
                            offset = pos,
                            detail = %detail,
                            "Truncating corrupt journal tail"
                        );
                        let file = OpenOptions::new().write(true).open(path)?;
                        file.set_len(pos as u64)?;
                        file.sync_all()?;
                        return Ok(());
                    }
                    return Err(OutboxError::Corrupt(format!(
                        "{} at offset {} in {}",
                        detail,
                        pos,
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }

    fn apply_record(
        record: JournalRecord,
        events: &mut Vec<OutboxEvent>,
        index: &mut HashMap<EventId, usize>,
    ) -> Result<(), OutboxError> {
        match record {
            JournalRecord::Appended(event) => {
                index.insert(event.id, events.len());
                events.push(event);
            }
            JournalRecord::Delivered { id, at } => {
                let pos = *index
                    .get(&id)
                    .ok_or_else(|| {
                        OutboxError::Corrupt(format!("delivery mark for unknown event {id}"))
                    })?;
                let event = &mut events[pos];
                event.delivered = true;
                event.delivered_at = Some(at);
            }
        }
        Ok(())
    }

    // ── Write path ──────────────────────────────────────────────────

    fn write_record(
        inner: &mut JournalInner,
        config: &JournalConfig,
        record: &JournalRecord,
    ) -> Result<(), OutboxError> {
        if inner.current_file_size >= config.max_file_size {
            Self::rotate(inner, config)?;
        }

        let bytes = encode_record(record)?;
        inner.writer.write_all(&bytes)?;
        inner.current_file_size += bytes.len() as u64;
        inner.writes_since_flush += 1;
        inner.writes_since_fsync += 1;

        let should_flush = match config.flush_policy {
            FlushPolicy::EveryWrite => true,
            FlushPolicy::EveryN(n) => inner.writes_since_flush >= n,
        };
        if should_flush {
            inner.writer.flush()?;
            inner.writes_since_flush = 0;
        }

        let should_fsync = match config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => inner.writes_since_fsync >= n,
            FsyncPolicy::OnRotation => false,
        };
        if should_fsync {
            inner.writer.flush()?;
            inner.writer.get_ref().sync_all()?;
            inner.writes_since_fsync = 0;
        }
        Ok(())
    }

    fn rotate(inner: &mut JournalInner, config: &JournalConfig) -> Result<(), OutboxError> {
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;

        inner.file_index += 1;
        inner.current_file = Self::journal_path(&config.dir, inner.file_index);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&inner.current_file)?;
        inner.writer = BufWriter::new(file);
        inner.current_file_size = 0;
        debug!(file = %inner.current_file.display(), "Journal rotated");
        Ok(())
    }

    // ── File naming ─────────────────────────────────────────────────

    fn journal_path(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("outbox-{:06}.log", index))
    }

    fn parse_index(path: &Path) -> Option<u64> {
        path.file_name()?
            .to_str()?
            .strip_prefix("outbox-")?
            .strip_suffix(".log")?
            .parse()
            .ok()
    }

    /// All journal files in the directory, sorted by index.
    fn journal_files(dir: &Path) -> Result<Vec<PathBuf>, OutboxError> {
        let mut files: Vec<(u64, PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if let Some(index) = Self::parse_index(&path) {
                files.push((index, path));
            }
        }
        files.sort_by_key(|(index, _)| *index);
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }
}

impl EventLog for JournalEventLog {
    fn append(
        &self,
        order_id: OrderId,
        merchant_id: MerchantId,
        kind: EventKind,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
    ) -> Result<OutboxEvent, OutboxError> {
        let mut inner = self.inner.lock().expect("journal lock poisoned");
        let event = OutboxEvent {
            id: EventId::from_u64(inner.next_id),
            order_id,
            merchant_id,
            kind,
            payload,
            created_at,
            delivered: false,
            delivered_at: None,
        };

        Self::write_record(&mut inner, &self.config, &JournalRecord::Appended(event.clone()))?;

        inner.next_id += 1;
        let pos = inner.events.len();
        inner.index.insert(event.id, pos);
        inner.events.push(event.clone());
        debug!(event_id = %event.id, order_id = %order_id, "Outbox event journaled");
        Ok(event)
    }

    fn list_undelivered(&self, limit: usize) -> Result<Vec<OutboxEvent>, OutboxError> {
        let inner = self.inner.lock().expect("journal lock poisoned");
        Ok(inner
            .events
            .iter()
            .filter(|e| !e.delivered)
            .take(limit)
            .cloned()
            .collect())
    }

    fn mark_delivered(
        &self,
        id: EventId,
        delivered_at: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        let mut inner = self.inner.lock().expect("journal lock poisoned");
        let pos = *inner.index.get(&id).ok_or(OutboxError::UnknownEvent(id))?;

        Self::write_record(
            &mut inner,
            &self.config,
            &JournalRecord::Delivered { id, at: delivered_at },
        )?;

        let event = &mut inner.events[pos];
        event.delivered = true;
        event.delivered_at = Some(delivered_at);
        Ok(())
    }

    fn len(&self) -> Result<usize, OutboxError> {
        Ok(self.inner.lock().expect("journal lock poisoned").events.len())
    }
}
