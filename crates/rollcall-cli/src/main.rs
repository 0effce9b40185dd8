use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

// `#[zbus::proxy]` generates both `RollcallProxy` (async) and
// `RollcallProxyBlocking`. Only the async variant is used here.
#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Rollcall {
    async fn mark_attendance(&self, frame_json: &str) -> zbus::Result<String>;
    async fn reset_session(&self) -> zbus::Result<()>;
    async fn add_student(&self, registration_no: i64, name: &str) -> zbus::Result<()>;
    async fn reload_gallery(&self) -> zbus::Result<String>;
    async fn list_attendance(&self, date: &str) -> zbus::Result<String>;
    async fn attendance_for(&self, registration_no: i64) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a frame of detected faces for attendance marking
    Mark {
        /// Path to a frame JSON file ({"faces": [{"embedding", "bbox"}, ...]})
        frame: PathBuf,
    },
    /// Start a new capture session
    ResetSession,
    /// Add or update a student roster entry
    AddStudent {
        /// Registration number
        registration_no: i64,
        /// Canonical display name
        name: String,
    },
    /// Reload the gallery snapshot from disk
    Reload,
    /// Show attendance records for a day, or for one registration number
    Report {
        /// Calendar date (YYYY-MM-DD); defaults to today
        date: Option<String>,
        /// Show the full history for this registration number instead
        #[arg(short, long, conflicts_with = "date")]
        registration_no: Option<i64>,
    },
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus — is rollcalld running?")?;
    let proxy = RollcallProxy::new(&conn).await?;

    match cli.command {
        Commands::Mark { frame } => {
            let payload = std::fs::read_to_string(&frame)
                .with_context(|| format!("failed to read frame file {}", frame.display()))?;
            let reports = proxy.mark_attendance(&payload).await?;
            print_pretty(&reports);
        }
        Commands::ResetSession => {
            proxy.reset_session().await?;
            println!("session reset");
        }
        Commands::AddStudent {
            registration_no,
            name,
        } => {
            proxy.add_student(registration_no, &name).await?;
            println!("roster entry saved for {name} ({registration_no})");
        }
        Commands::Reload => {
            let summary = proxy.reload_gallery().await?;
            println!("{summary}");
        }
        Commands::Report {
            date,
            registration_no,
        } => {
            let records = match registration_no {
                Some(registration_no) => proxy.attendance_for(registration_no).await?,
                None => proxy.list_attendance(date.as_deref().unwrap_or("")).await?,
            };
            print_pretty(&records);
        }
        Commands::Status => {
            let status = proxy.status().await?;
            print_pretty(&status);
        }
    }

    Ok(())
}

/// Pretty-print a JSON payload, falling back to the raw string if it does
/// not parse (the daemon's word is authoritative either way).
fn print_pretty(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string())
        ),
        Err(_) => println!("{raw}"),
    }
}
