use crate::common::{GateError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;

/// How the person at the gate was identified.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSource {
    Face,
    QrToken,
    Fingerprint,
}

/// One detection attempt. Never edited once recorded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub camera_id: String,
    pub matched: bool,
    pub score: Option<f32>,
    pub ts: DateTime<Utc>,
    pub raw_image: Option<Vec<u8>>,
    pub source: AuditSource,
}

impl AuditEntry {
    pub fn accepted(
        user_id: &str,
        name: Option<&str>,
        camera_id: &str,
        score: f32,
        source: AuditSource,
    ) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            name: name.map(str::to_string),
            camera_id: camera_id.to_string(),
            matched: true,
            score: Some(score),
            ts: Utc::now(),
            raw_image: None,
            source,
        }
    }

    /// Rejected face attempt; the frame is kept for manual review.
    pub fn rejected(camera_id: &str, raw_image: Vec<u8>) -> Self {
        Self {
            user_id: None,
            name: None,
            camera_id: camera_id.to_string(),
            matched: false,
            score: None,
            ts: Utc::now(),
            raw_image: Some(raw_image),
            source: AuditSource::Face,
        }
    }

    fn summary(&self) -> AuditSummary {
        AuditSummary {
            user_id: self.user_id.clone(),
            name: self.name.clone(),
            camera_id: self.camera_id.clone(),
            matched: self.matched,
            score: self.score,
            ts: self.ts,
            source: self.source,
            has_image: self.raw_image.is_some(),
        }
    }
}

/// Audit entry without the image bytes, for activity feeds.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuditSummary {
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub camera_id: String,
    pub matched: bool,
    pub score: Option<f32>,
    pub ts: DateTime<Utc>,
    pub source: AuditSource,
    pub has_image: bool,
}

pub trait AuditLog: Send + Sync {
    /// Appends `entry`. Images on matched entries are not persisted.
    fn record(&self, entry: AuditEntry) -> Result<()>;

    /// Every entry in append order, images included.
    fn entries(&self) -> Result<Vec<AuditEntry>>;

    /// The newest `limit` entries, newest first.
    fn recent(&self, limit: usize) -> Result<Vec<AuditSummary>> {
        Ok(self
            .entries()?
            .iter()
            .rev()
            .take(limit)
            .map(AuditEntry::summary)
            .collect())
    }
}

fn strip_matched_image(mut entry: AuditEntry) -> AuditEntry {
    if entry.matched {
        entry.raw_image = None;
    }
    entry
}

/// Append-only file of `u32 LE length` + bincode frames.
pub struct FileAuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAuditLog {
    /// Opens (or creates) the log. A partial frame left by a crash mid-append
    /// is cut off so new entries start on a frame boundary.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| GateError::Storage(format!("Failed to open audit log {:?}: {}", path, e)))?;

        let file_len = file.metadata()?.len();
        let complete = complete_frames_len(&file, file_len)?;
        if complete < file_len {
            tracing::warn!(
                "Audit log {:?} ends with a partial frame; truncating {} bytes",
                path,
                file_len - complete
            );
            file.set_len(complete)
                .map_err(|e| GateError::Storage(format!("Failed to truncate audit log: {}", e)))?;
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Calls `visit` with each complete entry in append order, one frame in memory at a time.
    fn for_each_entry(&self, mut visit: impl FnMut(AuditEntry)) -> Result<()> {
        let file = File::open(&self.path)
            .map_err(|e| GateError::Storage(format!("Failed to open audit log: {}", e)))?;
        let mut reader = BufReader::new(file);

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(GateError::Storage(format!("Failed to read audit log: {}", e))),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut data = vec![0u8; len];
            if let Err(e) = reader.read_exact(&mut data) {
                // torn tail from a crash mid-append
                tracing::warn!("Audit log {:?} ends with a partial frame: {}", self.path, e);
                break;
            }
            let entry: AuditEntry = bincode::deserialize(&data)
                .map_err(|e| GateError::Storage(format!("Corrupt audit entry: {}", e)))?;
            visit(entry);
        }
        Ok(())
    }
}

/// Length of the prefix of the log made of whole frames.
fn complete_frames_len(file: &File, file_len: u64) -> Result<u64> {
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(0))?;
    let mut offset = 0u64;
    while offset + 4 <= file_len {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let frame_end = offset + 4 + u32::from_le_bytes(len_buf) as u64;
        if frame_end > file_len {
            break;
        }
        reader.seek_relative((frame_end - offset - 4) as i64)?;
        offset = frame_end;
    }
    Ok(offset)
}

impl AuditLog for FileAuditLog {
    fn record(&self, entry: AuditEntry) -> Result<()> {
        let entry = strip_matched_image(entry);
        let data = bincode::serialize(&entry)
            .map_err(|e| GateError::Storage(format!("Failed to serialize audit entry: {}", e)))?;

        let mut frame = Vec::with_capacity(4 + data.len());
        frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
        frame.extend_from_slice(&data);

        let mut file = self
            .file
            .lock()
            .map_err(|_| GateError::Storage("audit log lock poisoned".into()))?;
        // single write so a frame is never interleaved with another writer's
        file.write_all(&frame)
            .and_then(|_| file.flush())
            .map_err(|e| GateError::Storage(format!("Failed to append audit entry: {}", e)))?;

        tracing::debug!(
            "Audit: camera={} matched={} user={:?}",
            entry.camera_id, entry.matched, entry.user_id
        );
        Ok(())
    }

    fn entries(&self) -> Result<Vec<AuditEntry>> {
        let mut entries = Vec::new();
        self.for_each_entry(|entry| entries.push(entry))?;
        Ok(entries)
    }

    fn recent(&self, limit: usize) -> Result<Vec<AuditSummary>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        // summaries only: images are dropped frame by frame
        let mut newest = VecDeque::with_capacity(limit);
        self.for_each_entry(|entry| {
            if newest.len() == limit {
                newest.pop_front();
            }
            newest.push_back(entry.summary());
        })?;
        Ok(newest.into_iter().rev().collect())
    }
}

#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, entry: AuditEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| GateError::Storage("audit log lock poisoned".into()))?
            .push(strip_matched_image(entry));
        Ok(())
    }

    fn entries(&self) -> Result<Vec<AuditEntry>> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| GateError::Storage("audit log lock poisoned".into()))?
            .clone())
    }
}
