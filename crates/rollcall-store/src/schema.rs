//! Schema creation and one-time structural healing.

use rusqlite::{Connection, TransactionBehavior};

const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS student (
    registration_no INTEGER PRIMARY KEY,
    name            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    registration_no INTEGER NOT NULL,
    name            TEXT NOT NULL,
    timestamp       TEXT NOT NULL,
    date_key        TEXT NOT NULL
);
"#;

/// The unique index over `(registration_no, date_key)` is the ledger's
/// correctness mechanism: concurrent inserts for the same identity and day
/// resolve at the storage layer, one wins.
const CREATE_INDEX_SQL: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_reg_day
    ON attendance (registration_no, date_key);
"#;

/// Create tables, heal a legacy `attendance` table, then install the
/// uniqueness index. Healing must run before index creation — the legacy
/// table has no `date_key` column for the index to reference.
pub(crate) fn ensure_schema(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(CREATE_TABLES_SQL)?;
    heal_attendance_schema(conn)?;
    conn.execute_batch(CREATE_INDEX_SQL)
}

/// Heal a legacy `attendance` table (the `registration_no, name, timestamp`
/// shape) created without the `id` primary key.
///
/// SQLite cannot add a primary key via `ALTER TABLE`, so the table is
/// rebuilt and renamed inside one immediate transaction. Idempotent and
/// safe to invoke concurrently: the write lock serializes rebuilders and
/// the column check is repeated after the lock is held, so a racer that
/// loses the lock sees the healed table and does nothing. Legacy rows gain
/// a `date_key` derived from their timestamp.
///
/// Returns `true` if a rebuild was performed.
pub(crate) fn heal_attendance_schema(conn: &mut Connection) -> Result<bool, rusqlite::Error> {
    if has_id_column(conn)? {
        return Ok(false);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    // Re-check under the write lock: another connection may have healed
    // between our first check and lock acquisition.
    if has_id_column(&tx)? {
        tx.commit()?;
        return Ok(false);
    }

    tx.execute_batch(
        r#"
        CREATE TABLE attendance_healed (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            registration_no INTEGER NOT NULL,
            name            TEXT NOT NULL,
            timestamp       TEXT NOT NULL,
            date_key        TEXT NOT NULL
        );
        INSERT INTO attendance_healed (registration_no, name, timestamp, date_key)
            SELECT registration_no, name, timestamp, DATE(timestamp)
            FROM attendance;
        DROP TABLE attendance;
        ALTER TABLE attendance_healed RENAME TO attendance;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_reg_day
            ON attendance (registration_no, date_key);
        "#,
    )?;
    tx.commit()?;

    tracing::info!("attendance table rebuilt with id primary key");
    Ok(true)
}

fn has_id_column(conn: &Connection) -> Result<bool, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info('attendance') WHERE name = 'id'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
