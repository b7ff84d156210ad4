// Common types shared by the capture pipeline

use crate::error::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Closed set of stream types a session can record.
///
/// The upstream transport advertises streams by a free-form type string
/// ("EEG", "PPG", ...). Sessions only ever attach streams whose type parses
/// into one of these variants, so every per-stream map in the pipeline is keyed
/// by this enum rather than by arbitrary strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamKind {
    Eeg,
    Ppg,
    Acc,
    Gyro,
    Ecg,
    Emg,
}

impl StreamKind {
    pub const ALL: [StreamKind; 6] = [
        StreamKind::Eeg,
        StreamKind::Ppg,
        StreamKind::Acc,
        StreamKind::Gyro,
        StreamKind::Ecg,
        StreamKind::Emg,
    ];

    /// Type string used on the wire and in output file names
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Eeg => "EEG",
            StreamKind::Ppg => "PPG",
            StreamKind::Acc => "ACC",
            StreamKind::Gyro => "GYRO",
            StreamKind::Ecg => "ECG",
            StreamKind::Emg => "EMG",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StreamKind::Eeg => "Electroencephalography",
            StreamKind::Ppg => "Photoplethysmography",
            StreamKind::Acc => "Accelerometer",
            StreamKind::Gyro => "Gyroscope",
            StreamKind::Ecg => "Electrocardiography",
            StreamKind::Emg => "Electromyography",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        StreamKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == upper)
            .ok_or_else(|| CaptureError::UnknownStreamKind(s.to_string()))
    }
}

/// Sample encoding advertised by the upstream stream
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SampleFormat {
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// 16-bit signed integer
    Int16,
    /// 32-bit signed integer
    Int32,
    /// 8-bit signed integer
    Int8,
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self::Float32
    }
}

/// Immutable description of one attached stream.
///
/// Built once the stream has been resolved; `channel_names` are unique and
/// ordered, `nominal_rate` is strictly positive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub kind: StreamKind,

    /// Name the source advertised (e.g. "Muse-1A2B")
    pub name: String,

    /// Unique identifier of the source, if it provided one
    pub source_id: String,

    /// Column labels, one per channel
    pub channel_names: Vec<String>,

    /// Nominal sample rate in Hz
    pub nominal_rate: f64,

    pub sample_format: SampleFormat,

    /// CSV file this stream is persisted to
    pub output_sink: PathBuf,
}

impl StreamDescriptor {
    pub fn channel_count(&self) -> usize {
        self.channel_names.len()
    }
}

/// A batch of timestamped samples pulled from one stream in one operation.
///
/// `values[i]` is the channel vector recorded at `local_timestamps[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleChunk {
    pub local_timestamps: Vec<f64>,
    pub values: Vec<Vec<f64>>,
}

impl SampleChunk {
    pub fn new(local_timestamps: Vec<f64>, values: Vec<Vec<f64>>) -> CaptureResult<Self> {
        if local_timestamps.len() != values.len() {
            return Err(CaptureError::InvalidChunk(format!(
                "{} timestamps for {} samples",
                local_timestamps.len(),
                values.len()
            )));
        }
        Ok(Self {
            local_timestamps,
            values,
        })
    }

    /// Number of samples in the chunk
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check the chunk against the channel layout of its stream
    pub fn validate(&self, channel_count: usize) -> CaptureResult<()> {
        if self.local_timestamps.len() != self.values.len() {
            return Err(CaptureError::InvalidChunk(format!(
                "{} timestamps for {} samples",
                self.local_timestamps.len(),
                self.values.len()
            )));
        }
        if let Some((idx, row)) = self
            .values
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != channel_count)
        {
            return Err(CaptureError::InvalidChunk(format!(
                "sample {} has {} values, expected {}",
                idx,
                row.len(),
                channel_count
            )));
        }
        if let Some(ts) = self.local_timestamps.iter().find(|ts| !ts.is_finite()) {
            return Err(CaptureError::InvalidChunk(format!(
                "non-finite timestamp {}",
                ts
            )));
        }
        Ok(())
    }
}

/// Lifecycle of a recording session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Discovering,
    Acquiring,
    Draining,
    Stopped,
}

impl Default for SessionPhase {
    fn default() -> Self {
        Self::Idle
    }
}

/// Why acquisition ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Configured duration limit elapsed
    DurationElapsed,
    /// Ctrl+C / SIGINT
    Interrupted,
    /// Operator pressed the stop key
    OperatorHotkey,
    /// Requested programmatically through a session handle
    External,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::DurationElapsed => "duration limit reached",
            StopReason::Interrupted => "interrupted",
            StopReason::OperatorHotkey => "operator hotkey",
            StopReason::External => "external stop request",
        };
        f.write_str(text)
    }
}
