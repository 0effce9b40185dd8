use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the gallery snapshot JSON file.
    pub gallery_path: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Width of the registration-number suffix on enrollment labels.
    pub suffix_width: usize,
    /// Optional override of the snapshot's matching threshold.
    pub threshold_override: Option<f32>,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let gallery_path = std::env::var("ROLLCALL_GALLERY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("gallery.json"));

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        Self {
            gallery_path,
            db_path,
            suffix_width: env_usize(
                "ROLLCALL_SUFFIX_WIDTH",
                rollcall_core::DEFAULT_SUFFIX_WIDTH,
            ),
            threshold_override: std::env::var("ROLLCALL_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
