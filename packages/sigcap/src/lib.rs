//! Concurrent capture of physiological signal streams.
//!
//! A recording session resolves one stream per requested [`StreamKind`],
//! attaches a blocking producer to each, hands chunks over a single-producer /
//! single-consumer buffer to a persistence writer, and on stop drains every
//! buffer into a per-stream CSV file. Timestamps are mapped onto the reference
//! clock and optionally dejittered before they are written.
//!
//! Architecture:
//! - `transport`: pluggable upstream capability (resolve, attach, pull, time correction)
//! - `discovery`: bounded per-kind resolution
//! - `buffer`: lock-free chunk hand-off
//! - `producer`: per-stream pull loop
//! - `dejitter`: timestamp correction and regression
//! - `writer`: continuous and final CSV persistence
//! - `monitor`: stop conditions (duration, interrupt, hotkey)
//! - `session`: lifecycle state machine tying it all together

pub mod buffer;
pub mod config;
pub mod dejitter;
pub mod discovery;
pub mod error;
pub mod monitor;
pub mod producer;
pub mod session;
pub mod transport;
pub mod types;
pub mod writer;

pub use buffer::{stream_buffer, BufferMetrics, ChunkReceiver, ChunkSender};
pub use config::{ConfigError, SessionConfig};
pub use dejitter::TimestampCorrector;
pub use discovery::{discover, DiscoveryReport};
pub use error::{CaptureError, CaptureResult};
pub use monitor::{MonitorHandle, StopMonitor, StopSignal};
pub use producer::{ChunkProducer, ProducerConfig, ProducerReport};
pub use session::{SessionController, SessionHandle, SessionSummary, StreamSummary};
pub use transport::{
    create_transport, SimulatedStreamConfig, StreamInfo, StreamInlet, StreamTransport,
    TransportConfig, UdpBinding,
};
pub use types::{SampleChunk, SampleFormat, SessionPhase, StopReason, StreamDescriptor, StreamKind};
pub use writer::{FlushMode, FlushReport, PersistenceWriter, WriterTotals};
