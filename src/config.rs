use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings, read once at startup from the environment (`.env`
/// supported via dotenvy).
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for encoded session output.
    pub recording_dir: PathBuf,
    /// Worker count of the conversion pool; caps concurrent encodes.
    pub conversion_workers: usize,
    /// Pending-conversion queue depth before submitters back off.
    pub conversion_queue_capacity: usize,
    /// ffmpeg binary used for MP3 encoding.
    pub ffmpeg_path: PathBuf,
    /// How long pool shutdown waits for in-flight conversions.
    pub shutdown_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            recording_dir: env_path("RECORDING_DIR", "recordings"),
            conversion_workers: env_parsed("CONVERSION_WORKERS", 2),
            conversion_queue_capacity: env_parsed("CONVERSION_QUEUE_CAPACITY", 32),
            ffmpeg_path: env_path("FFMPEG_PATH", "ffmpeg"),
            shutdown_timeout: Duration::from_secs(env_parsed("SHUTDOWN_TIMEOUT_SECS", 30)),
        }
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
