// Simulated signal device
//
// Generates multi-channel sinusoids at the nominal rate, paced by the wall
// clock, so the full pipeline can be exercised without hardware. Timestamps
// are expressed on a device-local clock; the time-correction query returns the
// configured offset between that clock and the reference clock.

use super::{StreamInfo, StreamInlet, StreamTransport};
use crate::error::{CaptureError, CaptureResult};
use crate::types::{SampleChunk, SampleFormat, StreamKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Device-local clock value of the first generated sample
const LOCAL_CLOCK_EPOCH: f64 = 1000.0;

/// One stream offered by the simulated device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedStreamConfig {
    pub kind: StreamKind,
    pub channel_names: Vec<String>,
    pub nominal_rate: f64,
}

impl SimulatedStreamConfig {
    pub fn new(kind: StreamKind, channel_names: &[&str], nominal_rate: f64) -> Self {
        Self {
            kind,
            channel_names: channel_names.iter().map(|s| s.to_string()).collect(),
            nominal_rate,
        }
    }

    /// Layout of a four-electrode consumer EEG headband
    pub fn muse_preset() -> Vec<Self> {
        vec![
            Self::new(StreamKind::Eeg, &["TP9", "AF7", "AF8", "TP10"], 256.0),
            Self::new(StreamKind::Ppg, &["PPG1", "PPG2", "PPG3"], 64.0),
            Self::new(StreamKind::Acc, &["X", "Y", "Z"], 52.0),
            Self::new(StreamKind::Gyro, &["X", "Y", "Z"], 52.0),
        ]
    }
}

pub struct SimulatedTransport {
    streams: Vec<SimulatedStreamConfig>,
    jitter_secs: f64,
    clock_offset_secs: f64,
    seed: u64,
}

impl SimulatedTransport {
    pub fn new(streams: Vec<SimulatedStreamConfig>) -> Self {
        Self {
            streams,
            jitter_secs: 0.0,
            clock_offset_secs: 0.0,
            seed: 0,
        }
    }

    pub fn with_jitter(mut self, jitter_secs: f64) -> Self {
        self.jitter_secs = jitter_secs.abs();
        self
    }

    pub fn with_clock_offset(mut self, clock_offset_secs: f64) -> Self {
        self.clock_offset_secs = clock_offset_secs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn info_for(config: &SimulatedStreamConfig) -> StreamInfo {
        StreamInfo {
            name: format!("Simulated-{}", config.kind),
            kind: config.kind,
            source_id: format!("sim-{}", config.kind.as_str().to_ascii_lowercase()),
            hostname: "localhost".to_string(),
            channel_count: config.channel_names.len(),
            channel_labels: config.channel_names.clone(),
            nominal_rate: config.nominal_rate,
            sample_format: SampleFormat::Float32,
        }
    }
}

impl StreamTransport for SimulatedTransport {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn resolve(&self, kind: StreamKind, _timeout: Duration) -> CaptureResult<Vec<StreamInfo>> {
        Ok(self
            .streams
            .iter()
            .filter(|s| s.kind == kind)
            .map(Self::info_for)
            .collect())
    }

    fn open_inlet(
        &self,
        info: &StreamInfo,
        _max_chunk_len: usize,
    ) -> CaptureResult<Box<dyn StreamInlet>> {
        if !self.streams.iter().any(|s| s.kind == info.kind) {
            return Err(CaptureError::Transport(format!(
                "simulated device has no {} stream",
                info.kind
            )));
        }
        let rate = if info.nominal_rate > 0.0 {
            info.nominal_rate
        } else {
            crate::config::FALLBACK_NOMINAL_RATE
        };
        let kind_index = StreamKind::ALL
            .iter()
            .position(|k| *k == info.kind)
            .unwrap_or(0) as u64;

        Ok(Box::new(SimulatedInlet {
            channel_count: info.channel_count,
            rate,
            started: Instant::now(),
            emitted: 0,
            jitter_secs: self.jitter_secs,
            clock_offset_secs: self.clock_offset_secs,
            rng: StdRng::seed_from_u64(self.seed ^ (kind_index + 1)),
        }))
    }
}

pub struct SimulatedInlet {
    channel_count: usize,
    rate: f64,
    started: Instant,
    emitted: u64,
    jitter_secs: f64,
    clock_offset_secs: f64,
    rng: StdRng,
}

impl SimulatedInlet {
    fn due_samples(&self) -> u64 {
        (self.started.elapsed().as_secs_f64() * self.rate).floor() as u64
    }

    fn generate(&mut self, count: usize) -> SampleChunk {
        let mut timestamps = Vec::with_capacity(count);
        let mut values = Vec::with_capacity(count);

        for _ in 0..count {
            let t = self.emitted as f64 / self.rate;
            let noise = if self.jitter_secs > 0.0 {
                self.rng.random_range(-self.jitter_secs..=self.jitter_secs)
            } else {
                0.0
            };
            timestamps.push(LOCAL_CLOCK_EPOCH + t + noise);
            values.push(
                (0..self.channel_count)
                    .map(|ch| {
                        let freq = 5.0 + 2.0 * ch as f64;
                        (100.0 / (ch + 1) as f64)
                            * (2.0 * std::f64::consts::PI * freq * t).sin()
                    })
                    .collect(),
            );
            self.emitted += 1;
        }

        SampleChunk {
            local_timestamps: timestamps,
            values,
        }
    }
}

impl StreamInlet for SimulatedInlet {
    fn pull_chunk(
        &mut self,
        timeout: Duration,
        max_samples: usize,
    ) -> CaptureResult<Option<SampleChunk>> {
        let deadline = Instant::now() + timeout;

        loop {
            let available = self.due_samples().saturating_sub(self.emitted);
            if available > 0 {
                let count = available.min(max_samples.max(1) as u64) as usize;
                return Ok(Some(self.generate(count)));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let next_due = Duration::from_secs_f64((self.emitted + 1) as f64 / self.rate);
            let until_next = next_due.saturating_sub(self.started.elapsed());
            std::thread::sleep(until_next.min(deadline - now).max(Duration::from_micros(100)));
        }
    }

    fn time_correction(&mut self, _timeout: Duration) -> CaptureResult<f64> {
        Ok(self.clock_offset_secs)
    }
}
