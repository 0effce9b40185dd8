use crate::orchestrator::{AttendanceService, FrameRequest};
use rollcall_store::AttendanceRecord;
use std::path::PathBuf;
use std::sync::Arc;
use zbus::interface;

/// Render attendance records as a JSON array string for the wire.
fn records_json(records: &[AttendanceRecord]) -> String {
    let values: Vec<serde_json::Value> = records
        .iter()
        .map(|record| {
            serde_json::json!({
                "registration_no": record.registration_no,
                "name": record.name,
                "timestamp": record.timestamp.to_rfc3339(),
                "date_key": record.date_key.to_string(),
            })
        })
        .collect();
    serde_json::Value::Array(values).to_string()
}

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct RollcallInterface {
    service: Arc<AttendanceService>,
    gallery_path: PathBuf,
}

impl RollcallInterface {
    pub fn new(service: Arc<AttendanceService>, gallery_path: PathBuf) -> Self {
        Self {
            service,
            gallery_path,
        }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl RollcallInterface {
    /// Process one frame of detected faces. Input and output are JSON:
    /// a `FrameRequest` in, an array of `FaceReport` out.
    async fn mark_attendance(&self, frame_json: &str) -> zbus::fdo::Result<String> {
        let frame: FrameRequest = serde_json::from_str(frame_json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad frame payload: {e}")))?;
        tracing::info!(faces = frame.faces.len(), "mark_attendance requested");

        // Matching is CPU work and the ledger call blocks on SQLite; keep
        // both off the async executor.
        let service = Arc::clone(&self.service);
        let reports = tokio::task::spawn_blocking(move || service.process_frame(&frame.faces))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("worker task failed: {e}")))?;

        serde_json::to_string(&reports)
            .map_err(|e| zbus::fdo::Error::Failed(format!("encode reports: {e}")))
    }

    /// Start a new capture session (clears the per-session dedup set).
    async fn reset_session(&self) -> zbus::fdo::Result<()> {
        self.service.reset_session();
        Ok(())
    }

    /// Reload the gallery snapshot from disk and install it atomically.
    async fn reload_gallery(&self) -> zbus::fdo::Result<String> {
        tracing::info!(path = %self.gallery_path.display(), "gallery reload requested");
        let service = Arc::clone(&self.service);
        let path = self.gallery_path.clone();
        tokio::task::spawn_blocking(move || service.reload_gallery(&path))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("worker task failed: {e}")))?
            .map_err(|e| zbus::fdo::Error::Failed(format!("gallery reload failed: {e}")))?;
        Ok("gallery reloaded".to_string())
    }

    /// List attendance records for one calendar day as a JSON array.
    /// An empty `date` means today; otherwise YYYY-MM-DD.
    async fn list_attendance(&self, date: &str) -> zbus::fdo::Result<String> {
        let date_key = if date.is_empty() {
            chrono::Local::now().date_naive()
        } else {
            chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad date '{date}': {e}")))?
        };
        let records = self
            .service
            .report_for_day(date_key)
            .map_err(|e| zbus::fdo::Error::Failed(format!("attendance query failed: {e}")))?;
        Ok(records_json(&records))
    }

    /// Full attendance history for one registration number as a JSON array.
    async fn attendance_for(&self, registration_no: i64) -> zbus::fdo::Result<String> {
        let records = self
            .service
            .report_for_registration(registration_no)
            .map_err(|e| zbus::fdo::Error::Failed(format!("attendance query failed: {e}")))?;
        Ok(records_json(&records))
    }

    /// Add or update a student roster entry. Administrative path.
    async fn add_student(&self, registration_no: i64, name: &str) -> zbus::fdo::Result<()> {
        tracing::info!(registration_no, name, "add_student requested");
        self.service
            .add_student(registration_no, name)
            .map_err(|e| zbus::fdo::Error::Failed(format!("roster update failed: {e}")))
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.service.status().to_string())
    }
}
