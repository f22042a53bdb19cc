//! Reply journal - persistent record of auto-replies already sent
//!
//! Backed by the legacy message-log file: a UTF-8 nested markup document with
//! one `<messages>` root holding repeated `<message>` records, each carrying a
//! `<contact>` and a `<time>` field. Times are ISO 8601 UTC at second
//! precision. Every mutation is a full-file read-modify-rewrite; the journal
//! is personal-use-small, so O(n) writes are acceptable.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lock::FileLock;
use chrono::{DateTime, TimeZone, Utc};
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::warn;

/// Legacy storage prefix marking a chat-app caller (as opposed to PSTN/SMS).
pub const CHAT_TAG: &str = "W:";

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Where a caller identifier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerSource {
    Pstn,
    ChatApp,
}

/// A caller identity with its detection source.
///
/// The source is a real field here; it collapses to the legacy tagged string
/// (`"W:" + identifier` for chat-app callers) only at the storage boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId {
    pub source: CallerSource,
    pub identifier: String,
}

impl CallerId {
    pub fn pstn(identifier: impl Into<String>) -> Self {
        Self {
            source: CallerSource::Pstn,
            identifier: identifier.into(),
        }
    }

    pub fn chat_app(identifier: impl Into<String>) -> Self {
        Self {
            source: CallerSource::ChatApp,
            identifier: identifier.into(),
        }
    }

    /// Parse the legacy tagged-string form.
    pub fn from_tagged(contact: &str) -> Self {
        match contact.strip_prefix(CHAT_TAG) {
            Some(rest) => Self::chat_app(rest),
            None => Self::pstn(contact),
        }
    }

    /// Serialize back to the legacy tagged-string form.
    pub fn to_tagged(&self) -> String {
        match self.source {
            CallerSource::Pstn => self.identifier.clone(),
            CallerSource::ChatApp => format!("{}{}", CHAT_TAG, self.identifier),
        }
    }

    /// True for the empty-identifier "unknown caller" sentinel.
    pub fn is_unknown(&self) -> bool {
        self.identifier.is_empty()
    }
}

/// One sent-reply record. Immutable; an entry exists only after a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub caller: CallerId,
    pub time_utc: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(caller: CallerId, time_utc: DateTime<Utc>) -> Self {
        // Second precision is the storage contract; truncate up front so that
        // an entry compares equal to its persisted form.
        let time_utc = Utc
            .timestamp_opt(time_utc.timestamp(), 0)
            .single()
            .unwrap_or_else(|| epoch());
        Self { caller, time_utc }
    }

    /// The tagged contact string as stored on disk.
    pub fn contact(&self) -> String {
        self.caller.to_tagged()
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_default()
}

/// Format a timestamp in the journal's on-disk form.
pub fn format_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a journal timestamp. An unparseable value degrades to the epoch
/// sentinel instead of failing the surrounding read.
pub fn parse_time(s: &str) -> DateTime<Utc> {
    match chrono::NaiveDateTime::parse_from_str(s, TIME_FORMAT) {
        Ok(naive) => naive.and_utc(),
        Err(_) => epoch(),
    }
}

/// Append-only journal of sent replies.
///
/// Every mutation is a full-file read-modify-rewrite, and the daemon and the
/// `delete-entry` CLI run as separate processes over the same file, so each
/// mutation holds an exclusive file lock across the read and the rewrite.
pub struct ReplyJournal {
    path: PathBuf,
}

impl ReplyJournal {
    pub fn new(config: &Config) -> Self {
        Self {
            path: config.journal_file.clone(),
        }
    }

    /// Append one entry. On write failure the reply stays sent-but-unlogged
    /// for this run; there is no rollback.
    pub fn append(&self, entry: &LogEntry) -> Result<()> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut entries = self.read_all();
        entries.push(entry.clone());
        self.write_all(&entries)
    }

    /// Read all entries, oldest first. A missing file is an empty journal; an
    /// unrecoverably corrupt file degrades to empty after a log line rather
    /// than propagating.
    pub fn read_all(&self) -> Vec<LogEntry> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Failed to read message log: {}", e);
                return Vec::new();
            }
        };

        match parse_document(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Corrupt message log, treating as empty: {}", e);
                Vec::new()
            }
        }
    }

    /// Filter by optional contact substring (case insensitive, matched against
    /// the stored tagged string) and optional inclusive time range. Any unset
    /// parameter matches everything; order is preserved.
    pub fn filter(
        &self,
        contact_substr: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<LogEntry> {
        let needle = contact_substr
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        self.read_all()
            .into_iter()
            .filter(|e| {
                if let Some(ref needle) = needle {
                    if !e.contact().to_lowercase().contains(needle) {
                        return false;
                    }
                }
                if let Some(start) = start {
                    if e.time_utc < start {
                        return false;
                    }
                }
                if let Some(end) = end {
                    if e.time_utc > end {
                        return false;
                    }
                }
                true
            })
            .collect()
    }

    /// Remove the first entry matching both contact and time exactly. Returns
    /// whether a removal occurred. Duplicate entries remove one arbitrarily.
    pub fn delete(&self, entry: &LogEntry) -> Result<bool> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut entries = self.read_all();

        let pos = entries
            .iter()
            .position(|e| e.caller == entry.caller && e.time_utc == entry.time_utc);

        match pos {
            Some(idx) => {
                entries.remove(idx);
                self.write_all(&entries)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Rewrite the whole file atomically (temp file + rename).
    fn write_all(&self, entries: &[LogEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let parent = self.path.parent().unwrap_or(std::path::Path::new("."));
        let mut temp = NamedTempFile::new_in(parent)?;

        temp.write_all(render_document(entries).as_bytes())?;
        temp.as_file().sync_all()?;

        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

// ============================================================================
// Markup codec
// ============================================================================
//
// The record schema is fixed at two string fields, so the codec is a small
// hand-rolled scanner rather than a generic markup parser.

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}

/// Render the full journal document.
pub fn render_document(entries: &[LogEntry]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<messages>\n");
    for e in entries {
        out.push_str("  <message>\n");
        out.push_str(&format!("    <contact>{}</contact>\n", escape(&e.contact())));
        out.push_str(&format!("    <time>{}</time>\n", format_time(e.time_utc)));
        out.push_str("  </message>\n");
    }
    out.push_str("</messages>\n");
    out
}

/// Parse a journal document. Fails only when the record structure itself is
/// unrecoverable; a malformed field value inside an intact record degrades to
/// the empty/epoch sentinel.
pub fn parse_document(content: &str) -> Result<Vec<LogEntry>> {
    let body = slice_between(content, "<messages>", "</messages>")
        .ok_or_else(|| Error::Parse("missing <messages> root".to_string()))?;

    let mut entries = Vec::new();
    let mut rest = body;

    while let Some(start) = rest.find("<message>") {
        let after = &rest[start + "<message>".len()..];
        let end = after
            .find("</message>")
            .ok_or_else(|| Error::Parse("unterminated <message> record".to_string()))?;
        let record = &after[..end];

        let contact = slice_between(record, "<contact>", "</contact>")
            .map(unescape)
            .unwrap_or_default();
        let time = slice_between(record, "<time>", "</time>")
            .map(parse_time)
            .unwrap_or_else(epoch);

        entries.push(LogEntry {
            caller: CallerId::from_tagged(&contact),
            time_utc: time,
        });

        rest = &after[end + "</message>".len()..];
    }

    Ok(entries)
}

fn slice_between<'a>(haystack: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = haystack.find(open)? + open.len();
    let end = haystack[start..].find(close)? + start;
    Some(&haystack[start..end])
}
