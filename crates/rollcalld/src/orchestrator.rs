//! Per-frame orchestration: match each face, route matches to the ledger,
//! assemble per-face reports.
//!
//! Every face in a frame is processed independently — a malformed label or a
//! storage fault on one face never aborts the others.

use chrono::{Local, NaiveDate};
use rollcall_core::{
    parse_registration_no, Gallery, GalleryError, GalleryHandle, Matcher, NearestMatcher,
};
use rollcall_store::{AttendanceLedger, AttendanceRecord, MarkOutcome, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const UNKNOWN_NAME: &str = "Unknown";

/// One detected face submitted for attendance: the embedding extracted by
/// the external pipeline plus where it was found in the frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceInput {
    pub embedding: rollcall_core::Embedding,
    pub bbox: rollcall_core::BoundingBox,
}

/// One frame's worth of detected faces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRequest {
    pub faces: Vec<FaceInput>,
}

/// Per-face report returned to the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceReport {
    pub bbox: rollcall_core::BoundingBox,
    /// Matched identity's name, or "Unknown".
    pub name: String,
    /// Human-readable ledger outcome; absent when the ledger was not
    /// consulted (unknown face).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Attendance service: gallery snapshot handle, matcher, ledger, and the
/// session-scoped dedup set. Constructed once at startup and passed by
/// explicit injection — no ambient global state.
pub struct AttendanceService {
    gallery: GalleryHandle,
    matcher: NearestMatcher,
    ledger: Arc<AttendanceLedger>,
    suffix_width: usize,
    /// Threshold override active for the process lifetime; re-applied on
    /// every gallery reload so a reload cannot silently revert it.
    threshold_override: Option<f32>,
    /// Identities already routed to the ledger during the current capture
    /// session, keyed by registration number with the roster display name
    /// cached for repeat-frame reports. An optimization for rapid
    /// consecutive frames; the ledger's unique index is the real
    /// at-most-once guarantee.
    session_seen: Mutex<HashMap<i64, String>>,
}

impl AttendanceService {
    pub fn new(gallery: GalleryHandle, ledger: Arc<AttendanceLedger>, suffix_width: usize) -> Self {
        Self {
            gallery,
            matcher: NearestMatcher,
            ledger,
            suffix_width,
            threshold_override: None,
            session_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Carry a validated threshold override across gallery reloads. The
    /// value must already have passed [`Gallery::set_threshold`].
    pub fn with_threshold_override(mut self, threshold: Option<f32>) -> Self {
        self.threshold_override = threshold;
        self
    }

    /// Process one frame: match every face, mark attendance for matches,
    /// return one report per face in input order. An empty frame yields an
    /// empty result, not an error.
    pub fn process_frame(&self, faces: &[FaceInput]) -> Vec<FaceReport> {
        if faces.is_empty() {
            tracing::debug!("frame with no detected faces");
            return Vec::new();
        }

        let gallery = self.gallery.snapshot();
        faces
            .iter()
            .map(|face| self.process_face(face, &gallery))
            .collect()
    }

    fn process_face(&self, face: &FaceInput, gallery: &Gallery) -> FaceReport {
        let result = self.matcher.compare(&face.embedding, gallery);

        let Some(label) = result.label.filter(|_| result.matched) else {
            tracing::debug!(
                distance = result.distance,
                confidence = result.confidence,
                "face not recognized"
            );
            return FaceReport {
                bbox: face.bbox.clone(),
                name: UNKNOWN_NAME.to_string(),
                message: None,
            };
        };

        tracing::debug!(
            label = %label,
            distance = result.distance,
            confidence = result.confidence,
            "face recognized"
        );

        let registration_no = match parse_registration_no(&label, self.suffix_width) {
            Ok(no) => no,
            Err(err) => {
                tracing::warn!(label = %label, error = %err, "unparsable enrollment label");
                return FaceReport {
                    bbox: face.bbox.clone(),
                    name: label,
                    message: Some(format!("Invalid registration number in label: {err}")),
                };
            }
        };

        if let Some(name) = self.seen_this_session(registration_no) {
            // Report the cached roster name, not the raw label, so overlay
            // consumers see a stable name across frames.
            return FaceReport {
                bbox: face.bbox.clone(),
                name: name.clone(),
                message: Some(format!(
                    "Attendance already recorded this session for {name} ({registration_no})"
                )),
            };
        }

        match self.ledger.record_attendance(registration_no, Local::now()) {
            Ok(outcome) => self.report_outcome(face, label, registration_no, outcome),
            Err(err) => self.report_storage_error(face, label, err),
        }
    }

    fn report_outcome(
        &self,
        face: &FaceInput,
        label: String,
        registration_no: i64,
        outcome: MarkOutcome,
    ) -> FaceReport {
        match outcome {
            MarkOutcome::Recorded(record) => {
                self.mark_seen(registration_no, &record.name);
                FaceReport {
                    bbox: face.bbox.clone(),
                    name: record.name.clone(),
                    message: Some(format!(
                        "Attendance marked for {} ({}) at {}",
                        record.name,
                        record.registration_no,
                        record.timestamp.format("%Y-%m-%d %H:%M:%S")
                    )),
                }
            }
            MarkOutcome::AlreadyMarked(record) => {
                self.mark_seen(registration_no, &record.name);
                FaceReport {
                    bbox: face.bbox.clone(),
                    name: record.name.clone(),
                    message: Some(format!(
                        "Attendance already marked for {} ({}) today",
                        record.name, record.registration_no
                    )),
                }
            }
            // Matched in the gallery but absent from the roster: expected,
            // logged by the ledger, no retry. Not added to the session set —
            // the roster may gain the entry mid-session.
            MarkOutcome::NotRegistered { registration_no } => FaceReport {
                bbox: face.bbox.clone(),
                name: label,
                message: Some(format!(
                    "No student registered for registration no {registration_no}"
                )),
            },
        }
    }

    fn report_storage_error(&self, face: &FaceInput, label: String, err: StoreError) -> FaceReport {
        // Surfaced for this face only; the caller may retry. Not added to
        // the session set so a later frame retries the ledger.
        tracing::error!(error = %err, "ledger unavailable");
        FaceReport {
            bbox: face.bbox.clone(),
            name: label,
            message: Some("Attendance storage unavailable, please try again".to_string()),
        }
    }

    fn seen_this_session(&self, registration_no: i64) -> Option<String> {
        self.session_lock().get(&registration_no).cloned()
    }

    fn mark_seen(&self, registration_no: i64, name: &str) {
        self.session_lock().insert(registration_no, name.to_string());
    }

    fn session_lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, String>> {
        self.session_seen.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start a new capture session: forget which identities were already
    /// routed to the ledger.
    pub fn reset_session(&self) {
        let cleared = {
            let mut seen = self.session_lock();
            let n = seen.len();
            seen.clear();
            n
        };
        tracing::info!(cleared, "capture session reset");
    }

    /// Reload the gallery snapshot from disk and install it atomically.
    /// In-flight matches finish against the snapshot they started with.
    /// An active threshold override survives the reload.
    pub fn reload_gallery(&self, path: &Path) -> Result<(), GalleryError> {
        let mut gallery = Gallery::load(path)?;
        if let Some(threshold) = self.threshold_override {
            tracing::info!(
                snapshot = gallery.threshold,
                threshold,
                "re-applying threshold override after reload"
            );
            gallery.set_threshold(threshold)?;
        }
        self.gallery.swap(gallery);
        Ok(())
    }

    /// Add or update a roster entry. Administrative path.
    pub fn add_student(&self, registration_no: i64, name: &str) -> Result<(), StoreError> {
        self.ledger.add_student(registration_no, name)
    }

    /// All attendance records for one calendar day.
    pub fn report_for_day(&self, date_key: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.ledger.records_for_day(date_key)
    }

    /// Full attendance history for one registration number.
    pub fn report_for_registration(
        &self,
        registration_no: i64,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.ledger.records_for_registration(registration_no)
    }

    /// Daemon status summary for the IPC `Status` method.
    pub fn status(&self) -> serde_json::Value {
        let gallery = self.gallery.snapshot();
        let today = Local::now().date_naive();
        // null, not a sentinel, when the count is unavailable — operators
        // must be able to tell "empty" from "db down".
        let marked_today = match self.ledger.count_for_day(today) {
            Ok(count) => serde_json::json!(count),
            Err(err) => {
                tracing::warn!(error = %err, "ledger count unavailable for status");
                serde_json::Value::Null
            }
        };
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "identities": gallery.identities.len(),
            "vectors": gallery.vector_count(),
            "threshold": gallery.threshold,
            "embedding_dim": gallery.embedding_dim,
            "marked_today": marked_today,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{Embedding, EnrolledIdentity};

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding {
            values,
            model_version: None,
        }
    }

    fn bbox() -> rollcall_core::BoundingBox {
        rollcall_core::BoundingBox {
            x: 10.0,
            y: 20.0,
            width: 64.0,
            height: 64.0,
            confidence: 0.98,
        }
    }

    fn face(values: Vec<f32>) -> FaceInput {
        FaceInput {
            embedding: emb(values),
            bbox: bbox(),
        }
    }

    fn gallery(identities: Vec<(&str, Vec<Vec<f32>>)>) -> Gallery {
        Gallery {
            identities: identities
                .into_iter()
                .map(|(label, vectors)| EnrolledIdentity {
                    label: label.into(),
                    vectors: vectors.into_iter().map(emb).collect(),
                })
                .collect(),
            threshold: 0.6,
            embedding_dim: 3,
            model_version: None,
        }
    }

    fn service(identities: Vec<(&str, Vec<Vec<f32>>)>) -> AttendanceService {
        let ledger = Arc::new(AttendanceLedger::open_in_memory().unwrap());
        ledger.add_student(7, "Jane Doe").unwrap();
        AttendanceService::new(
            GalleryHandle::new(gallery(identities)),
            ledger,
            rollcall_core::DEFAULT_SUFFIX_WIDTH,
        )
    }

    const JANE: [f32; 3] = [0.1, 0.2, 0.3];

    #[test]
    fn test_empty_frame_yields_empty_result() {
        let svc = service(vec![("jane0007", vec![JANE.to_vec()])]);
        assert!(svc.process_frame(&[]).is_empty());
    }

    #[test]
    fn test_scenario_match_record_then_already_marked() {
        let svc = service(vec![("jane0007", vec![JANE.to_vec()])]);

        // First sighting: exact enrolled vector, attendance recorded.
        let reports = svc.process_frame(&[face(JANE.to_vec())]);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "Jane Doe");
        let msg = reports[0].message.as_deref().unwrap();
        assert!(msg.starts_with("Attendance marked for Jane Doe (7)"), "{msg}");

        // New session, same day: the ledger short-circuits.
        svc.reset_session();
        let reports = svc.process_frame(&[face(JANE.to_vec())]);
        let msg = reports[0].message.as_deref().unwrap();
        assert_eq!(msg, "Attendance already marked for Jane Doe (7) today");

        // Exactly one row persisted.
        let today = Local::now().date_naive();
        assert_eq!(svc.ledger.count_for_day(today).unwrap(), 1);
    }

    #[test]
    fn test_distant_probe_is_unknown_and_skips_ledger() {
        let svc = service(vec![("jane0007", vec![vec![0.0, 0.0, 0.0]])]);
        // Distance 0.9 > threshold 0.6.
        let reports = svc.process_frame(&[face(vec![0.9, 0.0, 0.0])]);
        assert_eq!(reports[0].name, UNKNOWN_NAME);
        assert!(reports[0].message.is_none());

        let today = Local::now().date_naive();
        assert_eq!(svc.ledger.count_for_day(today).unwrap(), 0);
    }

    #[test]
    fn test_session_dedup_skips_ledger_on_repeat_frames() {
        let svc = service(vec![("jane0007", vec![JANE.to_vec()])]);
        svc.process_frame(&[face(JANE.to_vec())]);

        // Same session, next frame: reported without another ledger round-trip,
        // and still under the roster name rather than the raw label.
        let reports = svc.process_frame(&[face(JANE.to_vec())]);
        assert_eq!(reports[0].name, "Jane Doe");
        let msg = reports[0].message.as_deref().unwrap();
        assert!(msg.contains("already recorded this session"), "{msg}");
    }

    #[test]
    fn test_dedup_name_stable_after_session_reset_on_same_day() {
        let svc = service(vec![("jane0007", vec![JANE.to_vec()])]);
        svc.process_frame(&[face(JANE.to_vec())]);
        svc.reset_session();
        // AlreadyMarked refills the session cache with the roster name.
        svc.process_frame(&[face(JANE.to_vec())]);
        let reports = svc.process_frame(&[face(JANE.to_vec())]);
        assert_eq!(reports[0].name, "Jane Doe");
    }

    #[test]
    fn test_malformed_label_does_not_abort_siblings() {
        let svc = service(vec![
            ("xy", vec![vec![5.0, 5.0, 5.0]]),
            ("jane0007", vec![JANE.to_vec()]),
        ]);
        let reports = svc.process_frame(&[face(vec![5.0, 5.0, 5.0]), face(JANE.to_vec())]);
        assert_eq!(reports.len(), 2);

        let msg = reports[0].message.as_deref().unwrap();
        assert!(msg.starts_with("Invalid registration number"), "{msg}");
        // The sibling face is processed normally.
        assert_eq!(reports[1].name, "Jane Doe");
    }

    #[test]
    fn test_matched_but_not_in_roster() {
        let svc = service(vec![("ghost0042", vec![vec![1.0, 1.0, 1.0]])]);
        let reports = svc.process_frame(&[face(vec![1.0, 1.0, 1.0])]);
        let msg = reports[0].message.as_deref().unwrap();
        assert_eq!(msg, "No student registered for registration no 42");
        assert_eq!(reports[0].name, "ghost0042");
    }

    #[test]
    fn test_reports_preserve_input_order() {
        let svc = service(vec![
            ("jane0007", vec![JANE.to_vec()]),
            ("ghost0042", vec![vec![1.0, 1.0, 1.0]]),
        ]);
        let reports = svc.process_frame(&[
            face(vec![9.0, 9.0, 9.0]), // unknown
            face(vec![1.0, 1.0, 1.0]), // ghost0042
            face(JANE.to_vec()),       // jane
        ]);
        assert_eq!(reports[0].name, UNKNOWN_NAME);
        assert_eq!(reports[1].name, "ghost0042");
        assert_eq!(reports[2].name, "Jane Doe");
    }

    #[test]
    fn test_reload_gallery_swaps_snapshot() {
        let svc = service(vec![]);
        // Empty gallery: unknown.
        let reports = svc.process_frame(&[face(JANE.to_vec())]);
        assert_eq!(reports[0].name, UNKNOWN_NAME);

        let path = std::env::temp_dir().join(format!(
            "rollcall-reload-{}.json",
            std::process::id()
        ));
        std::fs::write(
            &path,
            serde_json::to_string(&gallery(vec![("jane0007", vec![JANE.to_vec()])])).unwrap(),
        )
        .unwrap();
        svc.reload_gallery(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let reports = svc.process_frame(&[face(JANE.to_vec())]);
        assert_eq!(reports[0].name, "Jane Doe");
    }

    #[test]
    fn test_status_reports_gallery_shape() {
        let svc = service(vec![("jane0007", vec![JANE.to_vec(), JANE.to_vec()])]);
        let status = svc.status();
        assert_eq!(status["identities"], 1);
        assert_eq!(status["vectors"], 2);
        assert_eq!(status["embedding_dim"], 3);
        assert_eq!(status["marked_today"], 0);

        svc.process_frame(&[face(JANE.to_vec())]);
        assert_eq!(svc.status()["marked_today"], 1);
    }

    #[test]
    fn test_reload_gallery_keeps_threshold_override() {
        let svc = service(vec![]).with_threshold_override(Some(0.2));

        let path = std::env::temp_dir().join(format!(
            "rollcall-override-{}.json",
            std::process::id()
        ));
        std::fs::write(
            &path,
            serde_json::to_string(&gallery(vec![("jane0007", vec![JANE.to_vec()])])).unwrap(),
        )
        .unwrap();
        svc.reload_gallery(&path).unwrap();
        std::fs::remove_file(&path).ok();

        // The snapshot carried threshold 0.6; the override survives.
        assert_eq!(svc.gallery.snapshot().threshold, 0.2);
    }

    #[test]
    fn test_report_for_day_and_registration() {
        let svc = service(vec![("jane0007", vec![JANE.to_vec()])]);
        svc.process_frame(&[face(JANE.to_vec())]);

        let today = Local::now().date_naive();
        let day_records = svc.report_for_day(today).unwrap();
        assert_eq!(day_records.len(), 1);
        assert_eq!(day_records[0].registration_no, 7);
        assert_eq!(day_records[0].name, "Jane Doe");

        let reg_records = svc.report_for_registration(7).unwrap();
        assert_eq!(reg_records.len(), 1);
        assert_eq!(reg_records[0].date_key, today);

        assert!(svc.report_for_registration(99).unwrap().is_empty());
    }
}
