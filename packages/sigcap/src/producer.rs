// Chunk producer - one blocking pull loop per attached stream
//
// The loop observes the session's cancellation token before every pull. Once
// the token is cancelled it performs exactly one more pull (bounded by the
// pull timeout) so samples already sitting in the inlet are still buffered,
// then returns. Timeouts and transport errors never end the loop.

use crate::buffer::ChunkSender;
use crate::transport::StreamInlet;
use crate::types::StreamKind;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Samples between progress log lines
const PROGRESS_LOG_EVERY: u64 = 1000;

/// Largest pull for a stream: `rate × chunk_duration`, at least one sample
pub fn max_samples_per_pull(nominal_rate: f64, chunk_duration_secs: f64) -> usize {
    let samples = (nominal_rate * chunk_duration_secs).floor();
    if samples.is_finite() && samples >= 1.0 {
        samples as usize
    } else {
        1
    }
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub max_samples: usize,
    pub pull_timeout: Duration,
    /// Pause after a failed pull so a broken inlet cannot spin
    pub error_backoff: Duration,
}

/// What a producer did over its lifetime
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProducerReport {
    pub samples_pulled: u64,
    pub chunks_pulled: u64,
    pub empty_pulls: u64,
    pub transport_errors: u64,
}

pub struct ChunkProducer {
    kind: StreamKind,
    inlet: Box<dyn StreamInlet>,
    sender: ChunkSender,
    config: ProducerConfig,
    samples_collected: Arc<AtomicU64>,
}

impl ChunkProducer {
    pub fn new(
        kind: StreamKind,
        inlet: Box<dyn StreamInlet>,
        sender: ChunkSender,
        config: ProducerConfig,
        samples_collected: Arc<AtomicU64>,
    ) -> Self {
        Self {
            kind,
            inlet,
            sender,
            config,
            samples_collected,
        }
    }

    /// Pull until `stop` is cancelled. Blocking; run on a dedicated thread.
    pub fn run(mut self, stop: CancellationToken) -> ProducerReport {
        let mut report = ProducerReport::default();

        log::info!(
            "{} producer started (up to {} samples per pull, timeout {}ms)",
            self.kind,
            self.config.max_samples,
            self.config.pull_timeout.as_millis()
        );

        loop {
            let last_pull = stop.is_cancelled();

            match self
                .inlet
                .pull_chunk(self.config.pull_timeout, self.config.max_samples)
            {
                Ok(Some(chunk)) if !chunk.is_empty() => {
                    if chunk.local_timestamps.len() != chunk.values.len() {
                        report.transport_errors += 1;
                        log::error!(
                            "{} pull returned {} timestamps for {} samples; chunk discarded",
                            self.kind,
                            chunk.local_timestamps.len(),
                            chunk.values.len()
                        );
                    } else {
                        let samples = chunk.len() as u64;
                        self.sender.push(chunk);
                        report.chunks_pulled += 1;
                        report.samples_pulled += samples;

                        let before = self.samples_collected.fetch_add(samples, Ordering::Relaxed);
                        if before / PROGRESS_LOG_EVERY != (before + samples) / PROGRESS_LOG_EVERY {
                            log::debug!("{} collected {} samples", self.kind, before + samples);
                        }
                    }
                }
                Ok(_) => report.empty_pulls += 1,
                Err(e) => {
                    report.transport_errors += 1;
                    log::error!("Error pulling {} data: {}", self.kind, e);
                    if !last_pull && !stop.is_cancelled() {
                        std::thread::sleep(self.config.error_backoff);
                    }
                }
            }

            if last_pull {
                break;
            }
        }

        log::info!(
            "{} producer stopped after {} samples in {} chunks ({} transport errors)",
            self.kind,
            report.samples_pulled,
            report.chunks_pulled,
            report.transport_errors
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::stream_buffer;
    use crate::error::{CaptureError, CaptureResult};
    use crate::types::SampleChunk;
    use std::collections::VecDeque;

    /// Replays scripted pull results, then reports timeouts
    struct ScriptedInlet {
        script: VecDeque<CaptureResult<Option<SampleChunk>>>,
        pulls: Arc<AtomicU64>,
    }

    impl StreamInlet for ScriptedInlet {
        fn pull_chunk(
            &mut self,
            timeout: Duration,
            _max_samples: usize,
        ) -> CaptureResult<Option<SampleChunk>> {
            self.pulls.fetch_add(1, Ordering::Relaxed);
            match self.script.pop_front() {
                Some(result) => result,
                None => {
                    std::thread::sleep(timeout);
                    Ok(None)
                }
            }
        }

        fn time_correction(&mut self, _timeout: Duration) -> CaptureResult<f64> {
            Ok(0.0)
        }
    }

    fn chunk(start: f64, n: usize) -> SampleChunk {
        SampleChunk {
            local_timestamps: (0..n).map(|i| start + i as f64).collect(),
            values: (0..n).map(|i| vec![i as f64]).collect(),
        }
    }

    fn config() -> ProducerConfig {
        ProducerConfig {
            max_samples: 16,
            pull_timeout: Duration::from_millis(5),
            error_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_max_samples_per_pull() {
        assert_eq!(max_samples_per_pull(256.0, 0.05), 12);
        assert_eq!(max_samples_per_pull(10.0, 0.01), 1);
        assert_eq!(max_samples_per_pull(f64::NAN, 0.05), 1);
    }

    #[test]
    fn test_transport_errors_do_not_stop_producer() {
        let (tx, mut rx) = stream_buffer(StreamKind::Eeg, 100);
        let counter = Arc::new(AtomicU64::new(0));
        let pulls = Arc::new(AtomicU64::new(0));
        let inlet = ScriptedInlet {
            script: VecDeque::from(vec![
                Ok(Some(chunk(0.0, 3))),
                Err(CaptureError::Transport("link lost".to_string())),
                Ok(None),
                Ok(Some(chunk(3.0, 2))),
            ]),
            pulls: Arc::clone(&pulls),
        };

        let stop = CancellationToken::new();
        let producer = ChunkProducer::new(
            StreamKind::Eeg,
            Box::new(inlet),
            tx,
            config(),
            Arc::clone(&counter),
        );
        let worker_stop = stop.clone();
        let worker = std::thread::spawn(move || producer.run(worker_stop));

        while pulls.load(Ordering::Relaxed) < 6 {
            std::thread::sleep(Duration::from_millis(1));
        }
        stop.cancel();
        let report = worker.join().unwrap();

        assert_eq!(report.samples_pulled, 5);
        assert_eq!(report.chunks_pulled, 2);
        assert_eq!(report.transport_errors, 1);
        assert_eq!(counter.load(Ordering::Relaxed), 5);

        let drained = rx.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].local_timestamps, vec![3.0, 4.0]);
    }

    #[test]
    fn test_one_final_pull_after_stop() {
        let (tx, mut rx) = stream_buffer(StreamKind::Ppg, 100);
        let pulls = Arc::new(AtomicU64::new(0));
        let inlet = ScriptedInlet {
            script: VecDeque::from(vec![Ok(Some(chunk(0.0, 4)))]),
            pulls: Arc::clone(&pulls),
        };

        let stop = CancellationToken::new();
        stop.cancel();
        let report = ChunkProducer::new(
            StreamKind::Ppg,
            Box::new(inlet),
            tx,
            config(),
            Arc::new(AtomicU64::new(0)),
        )
        .run(stop);

        assert_eq!(pulls.load(Ordering::Relaxed), 1);
        assert_eq!(report.samples_pulled, 4);
        assert_eq!(rx.drain().len(), 1);
    }
}
