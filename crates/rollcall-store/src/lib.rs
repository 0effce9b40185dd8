//! rollcall-store — Student roster and idempotent attendance ledger.
//!
//! Backed by SQLite. The daily at-most-once invariant lives in the schema
//! (a unique index over `(registration_no, date_key)`), not in application
//! check-then-insert logic, so it holds under any call concurrency.

mod schema;
mod store;

pub use store::{AttendanceLedger, AttendanceRecord, MarkOutcome, StoreError};
