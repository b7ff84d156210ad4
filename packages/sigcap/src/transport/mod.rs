// Pluggable upstream transport
//
// The stream transport (LSL or anything equivalent) is an opaque capability:
// it can resolve streams by type within a timeout, attach an inlet to a
// resolved stream, pull timestamped chunks from that inlet, and report the
// offset between the stream's clock and ours. Everything above this module
// only talks to the two traits defined here.
//
// New transports are added by:
// 1. Implementing `StreamTransport` and `StreamInlet`
// 2. Adding a variant to `TransportConfig`
// 3. Registering it in `create_transport`
//
// Current implementations:
// - Simulated: synthetic multi-channel device, no hardware required
// - UDP: one socket per stream type receiving JSON-encoded chunks

mod simulated;
mod udp;

use crate::config::ConfigError;
use crate::error::CaptureResult;
use crate::types::{SampleChunk, SampleFormat, StreamKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use simulated::{SimulatedInlet, SimulatedStreamConfig, SimulatedTransport};
pub use udp::{ChunkDatagram, UdpBinding, UdpInlet, UdpTransport};

/// Configuration for the available transports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransportConfig {
    /// Synthetic device generating sinusoids at the nominal rate
    #[serde(rename = "simulated")]
    Simulated {
        /// Streams the device offers (empty = Muse-like preset)
        #[serde(default)]
        streams: Vec<SimulatedStreamConfig>,
        /// Uniform timestamp noise amplitude in seconds
        #[serde(default)]
        jitter_secs: f64,
        /// Offset reported by the time-correction query
        #[serde(default)]
        clock_offset_secs: f64,
        #[serde(default)]
        seed: u64,
    },

    /// UDP sockets receiving JSON chunk datagrams
    #[serde(rename = "udp")]
    Udp {
        bindings: Vec<UdpBinding>,
        #[serde(default)]
        buffer_size: Option<usize>,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Simulated {
            streams: Vec::new(),
            jitter_secs: 0.0,
            clock_offset_secs: 0.0,
            seed: 0,
        }
    }
}

/// What the transport knows about a stream before it is attached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub name: String,
    pub kind: StreamKind,
    pub source_id: String,
    pub hostname: String,
    pub channel_count: usize,
    /// Labels advertised in the stream metadata, may be empty or partial
    pub channel_labels: Vec<String>,
    /// Nominal rate in Hz; 0 means the source did not declare one
    pub nominal_rate: f64,
    pub sample_format: SampleFormat,
}

/// Upstream discovery and attach capability
pub trait StreamTransport: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Resolve streams of the given type, waiting at most `timeout`.
    ///
    /// An empty vector means nothing was found in time.
    fn resolve(&self, kind: StreamKind, timeout: Duration) -> CaptureResult<Vec<StreamInfo>>;

    /// Attach an inlet to a resolved stream
    fn open_inlet(&self, info: &StreamInfo, max_chunk_len: usize)
        -> CaptureResult<Box<dyn StreamInlet>>;
}

/// A connected stream, owned by exactly one producer
pub trait StreamInlet: Send {
    /// Pull up to `max_samples` samples, blocking for at most `timeout`.
    ///
    /// `Ok(None)` means no data arrived within the timeout.
    fn pull_chunk(&mut self, timeout: Duration, max_samples: usize)
        -> CaptureResult<Option<SampleChunk>>;

    /// Offset to add to the stream's timestamps to map them onto the local clock
    fn time_correction(&mut self, timeout: Duration) -> CaptureResult<f64>;
}

/// Create a transport from configuration
pub fn create_transport(config: TransportConfig) -> CaptureResult<Arc<dyn StreamTransport>> {
    match config {
        TransportConfig::Simulated {
            streams,
            jitter_secs,
            clock_offset_secs,
            seed,
        } => {
            let streams = if streams.is_empty() {
                SimulatedStreamConfig::muse_preset()
            } else {
                streams
            };
            Ok(Arc::new(
                SimulatedTransport::new(streams)
                    .with_jitter(jitter_secs)
                    .with_clock_offset(clock_offset_secs)
                    .with_seed(seed),
            ))
        }

        TransportConfig::Udp {
            bindings,
            buffer_size,
        } => {
            if bindings.is_empty() {
                log::warn!("UDP transport configured without bindings; nothing can be resolved");
            }
            let mut seen = std::collections::BTreeSet::new();
            for binding in &bindings {
                if !seen.insert(binding.kind) {
                    return Err(ConfigError::InvalidBinding(format!(
                        "{}={} (type bound twice)",
                        binding.kind, binding.bind_addr
                    ))
                    .into());
                }
            }
            Ok(Arc::new(UdpTransport::new(
                bindings,
                buffer_size.unwrap_or(65_507),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_config_tagging() {
        let config: TransportConfig = serde_json::from_str(
            r#"{"type": "udp", "bindings": [{"kind": "EEG", "bind_addr": "127.0.0.1:7000"}]}"#,
        )
        .unwrap();
        match config {
            TransportConfig::Udp { bindings, .. } => {
                assert_eq!(bindings.len(), 1);
                assert_eq!(bindings[0].kind, StreamKind::Eeg);
            }
            _ => panic!("expected udp config"),
        }
    }

    #[test]
    fn test_duplicate_udp_binding_rejected() {
        let config = TransportConfig::Udp {
            bindings: vec![
                UdpBinding::new(StreamKind::Eeg, "127.0.0.1:7000"),
                UdpBinding::new(StreamKind::Eeg, "127.0.0.1:7001"),
            ],
            buffer_size: None,
        };
        assert!(create_transport(config).is_err());
    }

    #[test]
    fn test_default_simulated_transport_uses_preset() {
        let transport = create_transport(TransportConfig::default()).unwrap();
        assert_eq!(transport.name(), "simulated");
        let found = transport
            .resolve(StreamKind::Eeg, Duration::from_millis(10))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].channel_count, 4);
    }
}
