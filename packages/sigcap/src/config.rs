use crate::types::StreamKind;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Poll budget every cooperative loop must respect
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Longest time value a session accepts (one year)
pub const MAX_TIME_SECS: f64 = 366.0 * 24.0 * 3600.0;

/// Rate assumed for streams that advertise no nominal rate
pub const FALLBACK_NOMINAL_RATE: f64 = 256.0;

/// Recording session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Stream types to resolve and record
    pub stream_kinds: Vec<StreamKind>,
    /// Stop automatically after this many seconds (None = until stopped)
    pub duration_secs: Option<f64>,
    /// Maximum wait per stream type during discovery
    pub discovery_timeout_secs: f64,
    /// Target duration of one pulled chunk
    pub chunk_duration_secs: f64,
    /// Timeout of a single pull
    pub pull_timeout_secs: f64,
    /// Replace timestamps with a per-batch least-squares fit
    pub dejitter: bool,
    /// Persist periodically while acquiring instead of only at the end
    pub continuous_save: bool,
    /// Interval between continuous saves
    pub save_interval_secs: f64,
    /// Root directory for recordings
    pub output_dir: PathBuf,
    /// Write into `<output_dir>/<YYYYMMDD_HHMMSS>/` instead of `output_dir` itself
    pub timestamped_session_dir: bool,
    /// Channel labels overriding the ones advertised by the stream
    pub custom_channel_names: Vec<String>,
    /// Decimal places in the CSV output
    pub precision: usize,
    /// Queued chunks per stream above which a warning is logged
    pub buffer_high_water: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stream_kinds: vec![StreamKind::Eeg],
            duration_secs: None,
            discovery_timeout_secs: 5.0,
            chunk_duration_secs: 0.05,
            pull_timeout_secs: 0.01,
            dejitter: true,
            continuous_save: false,
            save_interval_secs: 5.0,
            output_dir: PathBuf::from("signal_data"),
            timestamped_session_dir: true,
            custom_channel_names: Vec::new(),
            precision: 6,
            buffer_high_water: 10_000,
        }
    }
}

impl SessionConfig {
    /// Reject configurations that cannot describe a valid session
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_kinds.is_empty() {
            return Err(ConfigError::InvalidValue(
                "at least one stream type must be requested".to_string(),
            ));
        }

        if let Some(duration) = self.duration_secs {
            require_positive("duration", duration)?;
        }
        require_positive("discovery timeout", self.discovery_timeout_secs)?;
        require_positive("chunk duration", self.chunk_duration_secs)?;
        require_positive("pull timeout", self.pull_timeout_secs)?;
        if self.continuous_save {
            require_positive("save interval", self.save_interval_secs)?;
        }

        if self.precision > 12 {
            return Err(ConfigError::InvalidValue(format!(
                "precision {} exceeds 12 decimal places",
                self.precision
            )));
        }

        if self.pull_timeout() > MAX_POLL_INTERVAL {
            log::warn!(
                "Pull timeout {:.3}s exceeds the {}ms poll budget; shutdown will be slower",
                self.pull_timeout_secs,
                MAX_POLL_INTERVAL.as_millis()
            );
        }

        Ok(())
    }

    pub fn duration_limit(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs_f64)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.discovery_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.pull_timeout_secs)
    }

    pub fn save_interval(&self) -> Option<Duration> {
        self.continuous_save
            .then(|| Duration::from_secs_f64(self.save_interval_secs))
    }

    /// Directory the session writes its CSV files into
    pub fn session_dir(&self, started: &DateTime<Local>) -> PathBuf {
        if self.timestamped_session_dir {
            self.output_dir
                .join(started.format("%Y%m%d_%H%M%S").to_string())
        } else {
            self.output_dir.clone()
        }
    }

    /// `<dir>/<TYPE>_signal.csv`
    pub fn sink_path(session_dir: &Path, kind: StreamKind) -> PathBuf {
        session_dir.join(format!("{}_signal.csv", kind.as_str()))
    }
}

fn require_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(ConfigError::InvalidValue(format!(
            "{} must be a positive number of seconds, got {}",
            name, value
        )));
    }
    if value > MAX_TIME_SECS || Duration::try_from_secs_f64(value).is_err() {
        return Err(ConfigError::InvalidValue(format!(
            "{} of {} seconds exceeds the {} second limit",
            name, value, MAX_TIME_SECS
        )));
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidValue(String),

    #[error("Invalid binding '{0}': expected TYPE=HOST:PORT")]
    InvalidBinding(String),
}
