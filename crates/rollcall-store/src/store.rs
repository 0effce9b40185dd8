use crate::schema;
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying storage unreachable, timed out, or rejected the call.
    /// Safe for the caller to retry.
    #[error("attendance storage unavailable: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// One durable attendance record. Never mutated, never deleted by this core.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub registration_no: i64,
    pub name: String,
    pub timestamp: DateTime<Local>,
    /// Calendar date derived from `timestamp`; the uniqueness key component.
    pub date_key: NaiveDate,
}

/// Outcome of an attendance-marking attempt. All variants are expected
/// results, not failures — storage faults are the `Err` channel.
#[derive(Debug, Clone)]
pub enum MarkOutcome {
    /// First successful mark for this identity today.
    Recorded(AttendanceRecord),
    /// A record for this identity and day already exists.
    AlreadyMarked(AttendanceRecord),
    /// The registration number is absent from the student roster.
    NotRegistered { registration_no: i64 },
}

/// Roster lookups plus the idempotent daily attendance ledger.
///
/// Writes go through a single connection behind a mutex; the at-most-once
/// guarantee does not depend on that serialization — it is enforced by the
/// `(registration_no, date_key)` unique index, with conflict-as-signal.
pub struct AttendanceLedger {
    conn: Mutex<Connection>,
}

impl AttendanceLedger {
    /// Open (or create) the ledger database at `path`, ensuring the schema
    /// and healing a legacy `attendance` table if needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "attendance database opened");
        Self::init(conn)
    }

    /// In-memory ledger for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        schema::ensure_schema(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // Poisoning only signals a panicked holder; the connection itself
        // stays usable.
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Resolve a registration number to the canonical display name.
    /// Read-only; `None` is the expected "not enrolled in roster" case.
    pub fn lookup_student(&self, registration_no: i64) -> Result<Option<String>, StoreError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT name FROM student WHERE registration_no = ?1",
            params![registration_no],
            |row| row.get(0),
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Add or update a roster entry. Administrative path, not part of the
    /// per-frame flow.
    pub fn add_student(&self, registration_no: i64, name: &str) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO student (registration_no, name) VALUES (?1, ?2)
             ON CONFLICT(registration_no) DO UPDATE SET name = excluded.name",
            params![registration_no, name],
        )?;
        Ok(())
    }

    /// Record attendance for `registration_no` at `timestamp`, at most once
    /// per calendar day.
    ///
    /// The insert and the existence check are one atomic operation:
    /// `INSERT OR IGNORE` against the unique index. Zero rows changed means
    /// a record for `(registration_no, date_key)` already existed, so under
    /// N concurrent calls exactly one caller observes `Recorded`.
    pub fn record_attendance(
        &self,
        registration_no: i64,
        timestamp: DateTime<Local>,
    ) -> Result<MarkOutcome, StoreError> {
        let name = match self.lookup_student(registration_no)? {
            Some(name) => name,
            None => {
                tracing::warn!(registration_no, "registration number not in roster");
                return Ok(MarkOutcome::NotRegistered { registration_no });
            }
        };

        let date_key = timestamp.date_naive();
        let conn = self.lock();

        let changed = conn.execute(
            "INSERT OR IGNORE INTO attendance (registration_no, name, timestamp, date_key)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                registration_no,
                name,
                timestamp.to_rfc3339(),
                date_key.to_string()
            ],
        )?;

        // Whether we inserted or lost the race, the row for this key now
        // exists; read it back as the authoritative record.
        let record = conn.query_row(
            "SELECT name, timestamp FROM attendance
             WHERE registration_no = ?1 AND date_key = ?2",
            params![registration_no, date_key.to_string()],
            |row| {
                let name: String = row.get(0)?;
                let raw: String = row.get(1)?;
                let timestamp = parse_timestamp(&raw, 1)?;
                Ok(AttendanceRecord {
                    registration_no,
                    name,
                    timestamp,
                    date_key,
                })
            },
        )?;

        if changed == 1 {
            tracing::info!(registration_no, name = %record.name, %date_key, "attendance recorded");
            Ok(MarkOutcome::Recorded(record))
        } else {
            tracing::debug!(registration_no, %date_key, "attendance already marked today");
            Ok(MarkOutcome::AlreadyMarked(record))
        }
    }

    /// All records for one calendar day, in insertion order.
    pub fn records_for_day(&self, date_key: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT registration_no, name, timestamp FROM attendance
             WHERE date_key = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![date_key.to_string()], |row| {
            let registration_no: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let raw: String = row.get(2)?;
            let timestamp = parse_timestamp(&raw, 2)?;
            Ok(AttendanceRecord {
                registration_no,
                name,
                timestamp,
                date_key,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Full attendance history for one registration number, oldest first.
    pub fn records_for_registration(
        &self,
        registration_no: i64,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT name, timestamp, date_key FROM attendance
             WHERE registration_no = ?1 ORDER BY date_key",
        )?;
        let rows = stmt.query_map(params![registration_no], |row| {
            let name: String = row.get(0)?;
            let raw: String = row.get(1)?;
            let timestamp = parse_timestamp(&raw, 1)?;
            let raw_date: String = row.get(2)?;
            let date_key = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d").map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            Ok(AttendanceRecord {
                registration_no,
                name,
                timestamp,
                date_key,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Number of records for one calendar day.
    pub fn count_for_day(&self, date_key: NaiveDate) -> Result<i64, StoreError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM attendance WHERE date_key = ?1",
            params![date_key.to_string()],
            |row| row.get(0),
        )
        .map_err(StoreError::from)
    }
}

/// Parse a stored RFC 3339 timestamp back into local time. Rows healed from
/// a legacy schema may carry the old `"%Y-%m-%d %H:%M:%S"` shape instead.
fn parse_timestamp(raw: &str, column: usize) -> Result<DateTime<Local>, rusqlite::Error> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Local));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| {
            // DST gap: fall back to interpreting the wall time as UTC.
            Local
                .from_local_datetime(&naive)
                .earliest()
                .unwrap_or_else(|| Local.from_utc_datetime(&naive))
        })
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
