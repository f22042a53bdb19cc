//! Device call-log reader
//!
//! Secondary confirmation source: after a call-log-changed signal, re-query
//! the call-log database for the newest missed-call row and turn it into a
//! candidate event if it is fresh. The same dedup gate applies downstream.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::journal::CallerId;
use crate::signals::CandidateMissedCall;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::PathBuf;
use tracing::info;

/// Call type value marking a missed call in the log.
pub const MISSED_TYPE: i64 = 3;

/// One missed-call row from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissedCallRow {
    pub number: String,
    pub date: DateTime<Utc>,
}

/// Reader for the call-log database.
pub struct CallLogReader {
    db_path: PathBuf,
}

impl CallLogReader {
    pub fn new(config: &Config) -> Self {
        Self {
            db_path: config.call_log_db.clone(),
        }
    }

    /// Open database connection (read-only to avoid lock contention).
    fn open_db(&self) -> Result<Connection> {
        if !self.db_path.exists() {
            return Err(Error::PermissionDenied(format!(
                "call log not readable: {}",
                self.db_path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    /// The most recent missed-call row, if any.
    pub fn latest_missed_call(&self) -> Result<Option<MissedCallRow>> {
        let conn = self.open_db()?;

        let row = conn
            .query_row(
                "SELECT number, date FROM calls WHERE type = ?1 ORDER BY date DESC LIMIT 1",
                [MISSED_TYPE],
                |row| {
                    let number: Option<String> = row.get(0)?;
                    let date_millis: i64 = row.get(1)?;
                    Ok((number.unwrap_or_default(), date_millis))
                },
            )
            .optional()?;

        Ok(row.map(|(number, date_millis)| MissedCallRow {
            number,
            date: Utc
                .timestamp_millis_opt(date_millis)
                .single()
                .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap()),
        }))
    }

    /// A candidate event for the newest missed-call row, provided the row is
    /// no older than `window_ms` at `now`. Stale or absent rows yield nothing.
    pub fn recent_missed_call(
        &self,
        now: DateTime<Utc>,
        window_ms: i64,
    ) -> Result<Option<CandidateMissedCall>> {
        let row = match self.latest_missed_call()? {
            Some(row) => row,
            None => {
                info!("No missed calls found in call log");
                return Ok(None);
            }
        };

        let age_ms = now.signed_duration_since(row.date).num_milliseconds();
        if age_ms < 0 || age_ms > window_ms {
            info!("Newest missed call is outside the freshness window");
            return Ok(None);
        }

        // The candidate carries the query time: the dedup window looks
        // backward from the event time, so a reply journaled moments after
        // the row was written must fall inside it.
        Ok(Some(CandidateMissedCall {
            caller: CallerId::pstn(row.number),
            event_time: now,
        }))
    }
}
