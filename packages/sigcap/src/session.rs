// Session controller
//
// Idle -> Discovering -> Acquiring -> Draining -> Stopped
//
// The controller owns every per-run resource. Producers run on blocking
// threads and only see the stop token; writers are driven from the
// controller's own loop, so each sink has exactly one writer and each buffer
// exactly one consumer. Draining always runs once acquisition has started:
// producers are joined, then every writer gets its single final flush.

use crate::buffer::{stream_buffer, BufferMetrics};
use crate::config::{SessionConfig, MAX_POLL_INTERVAL};
use crate::dejitter::TimestampCorrector;
use crate::discovery::discover;
use crate::error::{CaptureError, CaptureResult};
use crate::monitor::{StopMonitor, StopSignal};
use crate::producer::{max_samples_per_pull, ChunkProducer, ProducerConfig, ProducerReport};
use crate::transport::{StreamInfo, StreamInlet, StreamTransport};
use crate::types::{SessionPhase, StopReason, StreamDescriptor, StreamKind};
use crate::writer::{FlushMode, PersistenceWriter};
use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Interval, MissedTickBehavior};

/// Upper bound for the initial clock offset query of a stream
const TIME_CORRECTION_TIMEOUT: Duration = Duration::from_secs(2);

type SampleCounters = Arc<RwLock<BTreeMap<StreamKind, Arc<AtomicU64>>>>;

/// Per-stream outcome of a finished session
#[derive(Debug, Clone, Serialize)]
pub struct StreamSummary {
    pub kind: StreamKind,
    pub stream_name: String,
    pub sink: PathBuf,
    pub channel_names: Vec<String>,
    pub nominal_rate: f64,
    pub time_correction: f64,
    pub samples_pulled: u64,
    pub rows_written: u64,
    pub samples_skipped: u64,
    pub chunks_skipped: u64,
    pub transport_errors: u64,
    pub flushes: u64,
    pub buffer: BufferMetrics,
}

/// Outcome of a finished session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_dir: PathBuf,
    pub started_at: DateTime<Local>,
    pub elapsed_secs: f64,
    pub stop_reason: Option<StopReason>,
    pub streams: Vec<StreamSummary>,
    /// Requested types that were not recorded
    pub missing: Vec<StreamKind>,
}

impl SessionSummary {
    pub fn total_rows(&self) -> u64 {
        self.streams.iter().map(|s| s.rows_written).sum()
    }
}

/// Cloneable view of a running session
#[derive(Clone)]
pub struct SessionHandle {
    stop: StopSignal,
    phase: Arc<RwLock<SessionPhase>>,
    counters: SampleCounters,
}

impl SessionHandle {
    /// Ask the session to stop. Returns `false` if a stop was already requested.
    pub fn request_stop(&self) -> bool {
        self.stop.request(StopReason::External)
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.read()
    }

    /// Samples pulled so far, per attached stream
    pub fn samples_collected(&self) -> BTreeMap<StreamKind, u64> {
        self.counters
            .read()
            .iter()
            .map(|(kind, count)| (*kind, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// A stream that resolved and was successfully attached
struct AttachedStream {
    descriptor: Arc<StreamDescriptor>,
    inlet: Box<dyn StreamInlet>,
    time_correction: f64,
    max_samples: usize,
}

/// A stream that is being recorded
struct ActiveStream {
    descriptor: Arc<StreamDescriptor>,
    writer: PersistenceWriter,
    producer: JoinHandle<ProducerReport>,
}

pub struct SessionController {
    config: SessionConfig,
    transport: Arc<dyn StreamTransport>,
    started_at: DateTime<Local>,
    session_dir: PathBuf,
    stop: StopSignal,
    phase: Arc<RwLock<SessionPhase>>,
    counters: SampleCounters,
    watch_interrupt: bool,
    hotkey: Option<char>,
}

impl SessionController {
    pub fn new(config: SessionConfig, transport: Arc<dyn StreamTransport>) -> CaptureResult<Self> {
        config.validate()?;
        let started_at = Local::now();
        let session_dir = config.session_dir(&started_at);

        Ok(Self {
            config,
            transport,
            started_at,
            session_dir,
            stop: StopSignal::new(),
            phase: Arc::new(RwLock::new(SessionPhase::Idle)),
            counters: Arc::new(RwLock::new(BTreeMap::new())),
            watch_interrupt: false,
            hotkey: None,
        })
    }

    /// Stop on Ctrl+C
    pub fn with_interrupt_handling(mut self, enabled: bool) -> Self {
        self.watch_interrupt = enabled;
        self
    }

    /// Stop when a line starting with `key` is read from stdin
    pub fn with_hotkey(mut self, key: Option<char>) -> Self {
        self.hotkey = key;
        self
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            stop: self.stop.clone(),
            phase: Arc::clone(&self.phase),
            counters: Arc::clone(&self.counters),
        }
    }

    /// Directory the CSV files are written into
    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    fn set_phase(&self, phase: SessionPhase) {
        log::debug!("Session phase: {:?}", phase);
        *self.phase.write() = phase;
    }

    /// Run the session to completion
    pub async fn run(self) -> CaptureResult<SessionSummary> {
        let clock = Instant::now();

        self.set_phase(SessionPhase::Discovering);
        let transport = Arc::clone(&self.transport);
        let kinds = self.config.stream_kinds.clone();
        let timeout = self.config.discovery_timeout();
        let discovered = tokio::task::spawn_blocking(move || discover(transport, &kinds, timeout))
            .await
            .map_err(|e| CaptureError::TaskJoin(e.to_string()))
            .and_then(|result| result);

        let report = match discovered {
            Ok(report) => report,
            Err(e) => {
                self.set_phase(SessionPhase::Stopped);
                return Err(e);
            }
        };

        if let Err(e) = std::fs::create_dir_all(&self.session_dir) {
            log::error!(
                "Cannot create session directory {}: {}",
                self.session_dir.display(),
                e
            );
            self.set_phase(SessionPhase::Stopped);
            return Err(e.into());
        }

        let transport = Arc::clone(&self.transport);
        let config = self.config.clone();
        let session_dir = self.session_dir.clone();
        let attached = tokio::task::spawn_blocking(move || {
            report
                .resolved
                .iter()
                .filter_map(|info| attach(transport.as_ref(), info, &config, &session_dir))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| CaptureError::TaskJoin(e.to_string()))?;

        if attached.is_empty() {
            log::error!("None of the resolved streams could be attached");
            self.set_phase(SessionPhase::Stopped);
            return Err(CaptureError::NoSources(
                "all resolved streams failed to attach".to_string(),
            ));
        }

        let mut streams = self.start_streams(attached);

        self.set_phase(SessionPhase::Acquiring);
        log::info!(
            "Recording {} stream(s) into {}",
            streams.len(),
            self.session_dir.display()
        );

        let monitor = StopMonitor::new()
            .with_duration_limit(self.config.duration_limit())
            .with_interrupt(self.watch_interrupt)
            .with_hotkey(self.hotkey)
            .spawn(self.stop.clone());

        self.acquire(&mut streams).await;

        self.set_phase(SessionPhase::Draining);
        log::info!("Stopping collection, saving remaining data...");
        let summaries = self.drain(streams).await;
        monitor.shutdown().await;

        self.set_phase(SessionPhase::Stopped);
        let summary = SessionSummary {
            session_dir: self.session_dir.clone(),
            started_at: self.started_at,
            elapsed_secs: clock.elapsed().as_secs_f64(),
            stop_reason: self.stop.reason(),
            streams: summaries,
            missing: report_missing(&self.config.stream_kinds, &self.counters),
        };

        for stream in &summary.streams {
            log::info!(
                "{}: {} samples pulled, {} rows written to {}",
                stream.kind,
                stream.samples_pulled,
                stream.rows_written,
                stream.sink.display()
            );
        }
        log::info!(
            "Collection finished in {:.2} seconds ({} rows total)",
            summary.elapsed_secs,
            summary.total_rows()
        );

        Ok(summary)
    }

    fn start_streams(&self, attached: Vec<AttachedStream>) -> Vec<ActiveStream> {
        let producer_config = |max_samples| ProducerConfig {
            max_samples,
            pull_timeout: self.config.pull_timeout(),
            error_backoff: MAX_POLL_INTERVAL,
        };

        attached
            .into_iter()
            .map(|stream| {
                let kind = stream.descriptor.kind;
                let (sender, receiver) = stream_buffer(kind, self.config.buffer_high_water);
                let counter = Arc::new(AtomicU64::new(0));
                self.counters.write().insert(kind, Arc::clone(&counter));

                let writer = PersistenceWriter::new(
                    Arc::clone(&stream.descriptor),
                    receiver,
                    TimestampCorrector::new(stream.time_correction, self.config.dejitter),
                    self.config.precision,
                );
                let producer = ChunkProducer::new(
                    kind,
                    stream.inlet,
                    sender,
                    producer_config(stream.max_samples),
                    counter,
                );
                let token = self.stop.token();
                let producer = tokio::task::spawn_blocking(move || producer.run(token));

                ActiveStream {
                    descriptor: stream.descriptor,
                    writer,
                    producer,
                }
            })
            .collect()
    }

    async fn acquire(&self, streams: &mut [ActiveStream]) {
        let mut ticker = self.config.save_interval().map(|period| {
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = next_tick(&mut ticker) => {
                    for stream in streams.iter_mut() {
                        stream.writer.flush(FlushMode::Continuous);
                    }
                }
            }
        }
    }

    async fn drain(&self, streams: Vec<ActiveStream>) -> Vec<StreamSummary> {
        let mut summaries = Vec::with_capacity(streams.len());

        for stream in streams {
            let kind = stream.descriptor.kind;
            let report = match stream.producer.await {
                Ok(report) => report,
                Err(e) => {
                    log::error!("{} producer failed: {}", kind, e);
                    ProducerReport::default()
                }
            };

            let mut writer = stream.writer;
            writer.flush(FlushMode::Final);
            let time_correction = writer.corrector().time_correction();
            let buffer = writer.buffer_metrics();
            let totals = writer.finish();

            if totals.rows_written + totals.samples_skipped != report.samples_pulled {
                log::warn!(
                    "{}: {} samples pulled but {} written and {} skipped",
                    kind,
                    report.samples_pulled,
                    totals.rows_written,
                    totals.samples_skipped
                );
            }

            summaries.push(StreamSummary {
                kind,
                stream_name: stream.descriptor.name.clone(),
                sink: stream.descriptor.output_sink.clone(),
                channel_names: stream.descriptor.channel_names.clone(),
                nominal_rate: stream.descriptor.nominal_rate,
                time_correction,
                samples_pulled: report.samples_pulled,
                rows_written: totals.rows_written,
                samples_skipped: totals.samples_skipped,
                chunks_skipped: totals.chunks_skipped,
                transport_errors: report.transport_errors,
                flushes: totals.flushes,
                buffer,
            });
        }

        summaries
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn report_missing(requested: &[StreamKind], counters: &SampleCounters) -> Vec<StreamKind> {
    let attached = counters.read();
    let mut missing: Vec<StreamKind> = requested
        .iter()
        .copied()
        .filter(|kind| !attached.contains_key(kind))
        .collect();
    missing.sort();
    missing.dedup();
    missing
}

/// Open an inlet for a resolved stream and build its descriptor.
///
/// Failures are logged and the stream is left out of the session.
fn attach(
    transport: &dyn StreamTransport,
    info: &StreamInfo,
    config: &SessionConfig,
    session_dir: &Path,
) -> Option<AttachedStream> {
    if info.channel_count == 0 {
        log::warn!("{} stream '{}' declares no channels; skipping it", info.kind, info.name);
        return None;
    }

    let max_samples = max_samples_per_pull(info.nominal_rate, config.chunk_duration_secs);
    let mut inlet = match transport.open_inlet(info, max_samples) {
        Ok(inlet) => inlet,
        Err(e) => {
            log::warn!("Failed to open {} inlet: {}", info.kind, e);
            return None;
        }
    };

    let time_correction = match inlet.time_correction(TIME_CORRECTION_TIMEOUT) {
        Ok(offset) if offset.is_finite() => offset,
        Ok(offset) => {
            log::error!("{} time correction returned {}; using 0.0", info.kind, offset);
            0.0
        }
        Err(e) => {
            log::error!("{} time correction failed: {}; using 0.0", info.kind, e);
            0.0
        }
    };

    let descriptor = StreamDescriptor {
        kind: info.kind,
        name: info.name.clone(),
        source_id: info.source_id.clone(),
        channel_names: channel_names(info, &config.custom_channel_names),
        nominal_rate: info.nominal_rate,
        sample_format: info.sample_format,
        output_sink: SessionConfig::sink_path(session_dir, info.kind),
    };

    log::info!(
        "{} stream attached: {} channels @ {} Hz, time correction {:.6}s, channels {:?}",
        descriptor.kind,
        descriptor.channel_count(),
        descriptor.nominal_rate,
        time_correction,
        descriptor.channel_names
    );

    Some(AttachedStream {
        descriptor: Arc::new(descriptor),
        inlet,
        time_correction,
        max_samples,
    })
}

/// Column labels for a stream.
///
/// Custom names win when their count matches the stream; otherwise the
/// advertised labels are used. Empty or duplicate labels become `channel_<n>`.
pub fn channel_names(info: &StreamInfo, custom: &[String]) -> Vec<String> {
    let count = info.channel_count;

    if !custom.is_empty() {
        if custom.len() == count {
            return unique_labels(custom, count);
        }
        log::warn!(
            "{} custom channel names ignored: {} given for {} channels",
            info.kind,
            custom.len(),
            count
        );
    }

    unique_labels(&info.channel_labels, count)
}

fn unique_labels(labels: &[String], count: usize) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::from(["timestamp".to_string()]);
    let mut names = Vec::with_capacity(count);

    for index in 0..count {
        let label = labels
            .get(index)
            .map(|label| label.trim())
            .filter(|label| !label.is_empty() && !taken.contains(*label));

        let mut name = match label {
            Some(label) => label.to_string(),
            None => format!("channel_{}", index + 1),
        };
        while taken.contains(&name) {
            name.push('_');
        }

        taken.insert(name.clone());
        names.push(name);
    }

    names
}
