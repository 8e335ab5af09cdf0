//! Persistent record of every (video, page) pair already published.
//!
//! The file is a JSON array rewritten atomically (temp file + rename) after
//! every successful publish. The in-memory indexes always mirror what is on
//! disk: an append whose write fails is rolled back before the error returns.
//!
//! Files written by the older Python relay (`source_url`, `hash`, `posted_to`)
//! are still accepted. Such an entry counts as posted to every page and is
//! rewritten in the current shape on the next flush.

use crate::error::{RelayError, Result};
use crate::feed::detik::canonical_url;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostedRecord {
    pub video_id: String,
    pub page_id: String,
    pub posted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl PostedRecord {
    pub fn new(video_id: &str, page_id: &str, posted_at: DateTime<Utc>) -> Self {
        Self {
            video_id: video_id.to_string(),
            page_id: page_id.to_string(),
            posted_at,
            post_id: None,
            content_hash: None,
            title: None,
        }
    }
}

/// `page_id` of an entry that blocks the video for every page.
pub const ALL_PAGES: &str = "*";

/// One element of the Python relay's `posted_videos.json`.
#[derive(Debug, Deserialize)]
struct LegacyRecord {
    source_url: String,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    scraped_at: Option<String>,
    #[serde(default)]
    posted_to: Vec<LegacyPost>,
}

#[derive(Debug, Deserialize)]
struct LegacyPost {
    #[serde(default)]
    post_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Current(PostedRecord),
    Legacy(LegacyRecord),
}

impl LegacyRecord {
    fn into_record(self) -> PostedRecord {
        let video_id = url::Url::parse(&self.source_url)
            .ok()
            .and_then(|u| canonical_url(&u, &self.source_url))
            .unwrap_or_else(|| self.source_url.trim().to_string());
        // scraped_at is a naive local isoformat timestamp
        let posted_at = self
            .scraped_at
            .as_deref()
            .and_then(|t| NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f").ok())
            .map(|t| t.and_utc())
            .unwrap_or(DateTime::UNIX_EPOCH);
        let post_id = self
            .posted_to
            .into_iter()
            .filter(|p| p.status.as_deref() == Some("success"))
            .find_map(|p| p.post_id);
        PostedRecord {
            video_id,
            page_id: ALL_PAGES.to_string(),
            posted_at,
            post_id,
            content_hash: self.hash.filter(|h| !h.is_empty()),
            title: self.title,
        }
    }
}

pub struct Ledger {
    path: PathBuf,
    records: Vec<PostedRecord>,
    pairs: HashSet<(String, String)>,
    hashes: HashSet<(String, String)>,
}

impl Ledger {
    /// Load the ledger. A missing or empty file is an empty ledger; anything
    /// unparseable is reported as corruption rather than silently reset.
    pub fn load(path: &Path) -> Result<Self> {
        let mut ledger = Self {
            path: path.to_path_buf(),
            records: Vec::new(),
            pairs: HashSet::new(),
            hashes: HashSet::new(),
        };
        if !path.exists() {
            tracing::info!(path = %path.display(), "no ledger yet, starting empty");
            return Ok(ledger);
        }
        let content = std::fs::read_to_string(path).map_err(|e| RelayError::CorruptLedger {
            path: path.to_path_buf(),
            reason: format!("unreadable: {}", e),
        })?;
        if content.trim().is_empty() {
            return Ok(ledger);
        }
        let stored: Vec<StoredRecord> =
            serde_json::from_str(&content).map_err(|e| RelayError::CorruptLedger {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut duplicates = 0usize;
        let mut legacy = 0usize;
        for entry in stored {
            let record = match entry {
                StoredRecord::Current(r) => r,
                StoredRecord::Legacy(r) => {
                    legacy += 1;
                    r.into_record()
                }
            };
            if ledger.contains(&record.video_id, &record.page_id) {
                duplicates += 1;
                continue;
            }
            ledger.index(&record);
            ledger.records.push(record);
        }
        if duplicates > 0 {
            tracing::warn!(path = %path.display(), duplicates, "ledger held duplicate pairs, keeping first occurrence");
        }
        if legacy > 0 {
            tracing::info!(path = %path.display(), legacy, "converted old-format entries, blocked for all pages");
        }
        tracing::info!(path = %path.display(), records = ledger.records.len(), "ledger loaded");
        Ok(ledger)
    }

    pub fn contains(&self, video_id: &str, page_id: &str) -> bool {
        let video_id = video_id.to_string();
        self.pairs.contains(&(video_id.clone(), page_id.to_string()))
            || self.pairs.contains(&(video_id, ALL_PAGES.to_string()))
    }

    /// Same clip already on this page under another listing URL.
    pub fn contains_hash(&self, content_hash: &str, page_id: &str) -> bool {
        let hash = content_hash.to_string();
        self.hashes.contains(&(hash.clone(), page_id.to_string()))
            || self.hashes.contains(&(hash, ALL_PAGES.to_string()))
    }

    /// Append a bare record and persist immediately.
    pub fn record(&mut self, video_id: &str, page_id: &str, posted_at: DateTime<Utc>) -> Result<bool> {
        self.record_entry(PostedRecord::new(video_id, page_id, posted_at))
    }

    /// Append and persist. Returns `Ok(false)` when the pair is already known;
    /// nothing is written in that case.
    pub fn record_entry(&mut self, record: PostedRecord) -> Result<bool> {
        if self.contains(&record.video_id, &record.page_id) {
            return Ok(false);
        }
        self.records.push(record);
        if let Err(e) = self.flush() {
            if let Some(record) = self.records.pop() {
                tracing::error!(video_id = %record.video_id, page = %record.page_id, "ledger write failed, record not kept");
            }
            return Err(e);
        }
        if let Some(last) = self.records.last().cloned() {
            self.index(&last);
        }
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[PostedRecord] {
        &self.records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn index(&mut self, record: &PostedRecord) {
        self.pairs
            .insert((record.video_id.clone(), record.page_id.clone()));
        if let Some(hash) = &record.content_hash {
            self.hashes.insert((hash.clone(), record.page_id.clone()));
        }
    }

    fn flush(&self) -> Result<()> {
        let persistence = |source: std::io::Error| RelayError::Persistence {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(&self.records)
            .map_err(|e| persistence(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        let tmp = tmp_path(&self.path);
        let mut file = std::fs::File::create(&tmp).map_err(persistence)?;
        file.write_all(&json).map_err(persistence)?;
        file.write_all(b"\n").map_err(persistence)?;
        file.sync_all().map_err(persistence)?;
        drop(file);
        std::fs::rename(&tmp, &self.path).map_err(persistence)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "ledger".into());
    name.push(".tmp");
    path.with_file_name(name)
}
