use std::path::PathBuf;
use std::time::Duration;

use rollcall_core::EngineConfig;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Label of the capture device this daemon serves (reported in status).
    pub device_label: String,
    /// Path to the SQLite attendance database.
    pub db_path: PathBuf,
    /// Whether the daemon is running on the session bus (development mode).
    pub session_bus: bool,
    /// Engine tunables.
    pub engine: EngineConfig,
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

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let defaults = EngineConfig::default();
        let mut engine = defaults.clone();

        let blink = &mut engine.verification.liveness.blink;
        blink.close_threshold = env_f32("ROLLCALL_CLOSE_THRESHOLD", blink.close_threshold);
        blink.min_closed_frames = env_u32("ROLLCALL_MIN_CLOSED_FRAMES", blink.min_closed_frames);
        blink.cooldown = env_millis("ROLLCALL_BLINK_COOLDOWN_MS", blink.cooldown);

        let liveness = &mut engine.verification.liveness;
        liveness.min_blinks_required =
            env_u32("ROLLCALL_MIN_BLINKS_REQUIRED", liveness.min_blinks_required);
        liveness.duration_budget =
            env_millis("ROLLCALL_LIVENESS_BUDGET_MS", liveness.duration_budget);
        liveness.face_lost_grace =
            env_millis("ROLLCALL_FACE_LOST_GRACE_MS", liveness.face_lost_grace);

        let verification = &mut engine.verification;
        verification.min_identity_confidence = env_f32(
            "ROLLCALL_MIN_IDENTITY_CONFIDENCE",
            verification.min_identity_confidence,
        );
        verification.max_verification_retries = env_u32(
            "ROLLCALL_MAX_VERIFICATION_RETRIES",
            verification.max_verification_retries,
        );
        verification.attempt_wall_clock_budget = env_millis(
            "ROLLCALL_ATTEMPT_BUDGET_MS",
            verification.attempt_wall_clock_budget,
        );

        engine.eligibility.max_daily_entries = env_u32(
            "ROLLCALL_MAX_DAILY_ENTRIES",
            defaults.eligibility.max_daily_entries,
        );

        Self {
            device_label: std::env::var("ROLLCALL_DEVICE")
                .unwrap_or_else(|_| "default".to_string()),
            db_path,
            session_bus: std::env::var("ROLLCALL_SESSION_BUS").is_ok(),
            engine,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
