// Persistence writer - drains one stream buffer into its CSV sink
//
// The writer owns its sink outright, so nothing else ever touches the file.
// Whether the header has been written is tracked here and never inferred
// from the filesystem: the first successful write truncates the sink and
// writes `timestamp,<channels>`, every later write appends rows only.
//
// Rows count as written only once the file accepted all of their bytes. The
// writer remembers how many bytes are committed and cuts a failed write back
// to that length, so a half-written chunk never stays in the file.

use crate::buffer::{BufferMetrics, ChunkReceiver};
use crate::dejitter::TimestampCorrector;
use crate::error::CaptureResult;
use crate::types::{SampleChunk, StreamDescriptor};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Periodic flush while the session is acquiring
    Continuous,
    /// The single flush after every producer has stopped
    Final,
}

/// Result of one flush call
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushReport {
    pub chunks_drained: usize,
    pub samples_written: u64,
    pub chunks_skipped: usize,
    pub samples_skipped: u64,
    /// Rows written to the sink over the writer's whole lifetime
    pub total_rows: u64,
}

/// Lifetime totals of a writer, returned by [`PersistenceWriter::finish`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct WriterTotals {
    pub rows_written: u64,
    pub samples_skipped: u64,
    pub chunks_skipped: u64,
    pub flushes: u64,
}

pub struct PersistenceWriter {
    descriptor: Arc<StreamDescriptor>,
    receiver: ChunkReceiver,
    corrector: TimestampCorrector,
    precision: usize,
    sink: Option<File>,
    /// Bytes of the sink known to hold complete lines
    committed: u64,
    header_written: bool,
    final_done: bool,
    totals: WriterTotals,
}

impl PersistenceWriter {
    pub fn new(
        descriptor: Arc<StreamDescriptor>,
        receiver: ChunkReceiver,
        corrector: TimestampCorrector,
        precision: usize,
    ) -> Self {
        Self {
            descriptor,
            receiver,
            corrector,
            precision,
            sink: None,
            committed: 0,
            header_written: false,
            final_done: false,
            totals: WriterTotals::default(),
        }
    }

    pub fn corrector(&self) -> TimestampCorrector {
        self.corrector
    }

    /// True once the header line is in the sink
    pub fn header_written(&self) -> bool {
        self.header_written
    }

    pub fn buffer_metrics(&self) -> BufferMetrics {
        self.receiver.metrics()
    }

    /// Drain everything currently buffered and append it to the sink.
    ///
    /// Invalid chunks and chunks whose rows cannot be written are logged and
    /// skipped; the flush always completes. A final flush also creates the
    /// sink (header only) when nothing was ever written, and may run only once.
    pub fn flush(&mut self, mode: FlushMode) -> FlushReport {
        if mode == FlushMode::Final {
            if self.final_done {
                log::warn!(
                    "Final flush of {} requested twice; ignoring",
                    self.descriptor.kind
                );
                return self.report(FlushReport::default());
            }
            self.final_done = true;
        }
        self.totals.flushes += 1;

        let chunks = self.receiver.drain();
        let mut report = FlushReport {
            chunks_drained: chunks.len(),
            ..Default::default()
        };

        let valid = self.validate(chunks, &mut report);

        if !valid.is_empty() {
            // The regression runs over the whole batch, not chunk by chunk
            let batch_ts: Vec<f64> = valid
                .iter()
                .flat_map(|chunk| chunk.local_timestamps.iter().copied())
                .collect();
            let corrected = self.corrector.correct(&batch_ts);

            let mut offset = 0;
            for chunk in &valid {
                let timestamps = &corrected[offset..offset + chunk.len()];
                offset += chunk.len();
                self.write_chunk(chunk, timestamps, &mut report);
            }
        } else if mode == FlushMode::Final && !self.header_written {
            if let Err(e) = self.ensure_header() {
                log::error!(
                    "Failed to create {} sink {}: {}",
                    self.descriptor.kind,
                    self.descriptor.output_sink.display(),
                    e
                );
            }
        }

        match mode {
            FlushMode::Continuous if report.samples_written > 0 => log::debug!(
                "Saved {} {} samples ({} total)",
                report.samples_written,
                self.descriptor.kind,
                self.totals.rows_written
            ),
            FlushMode::Continuous => {}
            FlushMode::Final => log::info!(
                "Saved {} {} samples to {}",
                self.totals.rows_written,
                self.descriptor.kind,
                self.descriptor.output_sink.display()
            ),
        }

        self.report(report)
    }

    /// Close the sink and return lifetime totals
    pub fn finish(mut self) -> WriterTotals {
        if !self.final_done {
            log::warn!(
                "{} writer closed without a final flush; {} chunks left in buffer",
                self.descriptor.kind,
                self.receiver.len()
            );
        }
        if let Some(sink) = self.sink.take() {
            if let Err(e) = sink.sync_data() {
                log::warn!("Failed to sync {} sink: {}", self.descriptor.kind, e);
            }
        }
        self.totals
    }

    fn report(&self, mut report: FlushReport) -> FlushReport {
        report.total_rows = self.totals.rows_written;
        report
    }

    fn validate(&mut self, chunks: Vec<SampleChunk>, report: &mut FlushReport) -> Vec<SampleChunk> {
        let channels = self.descriptor.channel_count();
        chunks
            .into_iter()
            .filter(|chunk| match chunk.validate(channels) {
                Ok(()) => true,
                Err(e) => {
                    log::error!(
                        "Skipping {} chunk of {} samples: {}",
                        self.descriptor.kind,
                        chunk.len(),
                        e
                    );
                    report.chunks_skipped += 1;
                    report.samples_skipped += chunk.len() as u64;
                    self.totals.chunks_skipped += 1;
                    self.totals.samples_skipped += chunk.len() as u64;
                    false
                }
            })
            .collect()
    }

    fn write_chunk(&mut self, chunk: &SampleChunk, timestamps: &[f64], report: &mut FlushReport) {
        let samples = chunk.len() as u64;
        let result = self
            .serialize_rows(chunk, timestamps)
            .and_then(|rows| self.append(&rows));

        match result {
            Ok(()) => {
                report.samples_written += samples;
                self.totals.rows_written += samples;
            }
            Err(e) => {
                log::error!(
                    "Failed to write {} chunk of {} samples to {}: {}",
                    self.descriptor.kind,
                    samples,
                    self.descriptor.output_sink.display(),
                    e
                );
                report.chunks_skipped += 1;
                report.samples_skipped += samples;
                self.totals.chunks_skipped += 1;
                self.totals.samples_skipped += samples;
            }
        }
    }

    /// Render a chunk into CSV rows without touching the sink
    fn serialize_rows(&self, chunk: &SampleChunk, timestamps: &[f64]) -> CaptureResult<Vec<u8>> {
        let precision = self.precision;
        let mut csv = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());

        for (ts, row) in timestamps.iter().zip(&chunk.values) {
            let record = std::iter::once(format!("{:.*}", precision, ts))
                .chain(row.iter().map(|v| format!("{:.*}", precision, v)));
            csv.write_record(record)?;
        }

        csv.into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()).into())
    }

    fn render_header(&self) -> CaptureResult<Vec<u8>> {
        let mut header = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        header.write_record(
            std::iter::once("timestamp")
                .chain(self.descriptor.channel_names.iter().map(String::as_str)),
        )?;
        header
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()).into())
    }

    fn append(&mut self, rows: &[u8]) -> CaptureResult<()> {
        self.ensure_header()?;
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        let written = sink.write_all(rows).and_then(|()| sink.flush());
        if let Err(e) = written {
            self.discard_sink();
            return Err(e.into());
        }
        self.committed += rows.len() as u64;
        Ok(())
    }

    fn ensure_header(&mut self) -> CaptureResult<()> {
        if self.sink.is_some() {
            return Ok(());
        }

        let path = &self.descriptor.output_sink;
        if self.header_written {
            // Reopen after a failed write, dropping any partial tail
            let file = OpenOptions::new().append(true).open(path)?;
            file.set_len(self.committed)?;
            self.sink = Some(file);
            return Ok(());
        }

        let header = self.render_header()?;
        let mut file = File::create(path)?;
        self.committed = 0;
        if let Err(e) = file.write_all(&header).and_then(|()| file.flush()) {
            self.sink = Some(file);
            self.discard_sink();
            return Err(e.into());
        }

        self.committed = header.len() as u64;
        self.header_written = true;
        self.sink = Some(file);
        log::debug!(
            "Created {} sink {}",
            self.descriptor.kind,
            self.descriptor.output_sink.display()
        );
        Ok(())
    }

    /// Drop the sink after a failed write, cutting it back to the last
    /// complete line. The next write reopens it.
    fn discard_sink(&mut self) {
        let Some(file) = self.sink.take() else {
            return;
        };
        if let Err(e) = file.set_len(self.committed) {
            log::warn!(
                "Could not truncate {} sink {} after a failed write: {}",
                self.descriptor.kind,
                self.descriptor.output_sink.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{stream_buffer, ChunkSender};
    use crate::types::{SampleFormat, StreamKind};
    use std::path::Path;
    use tempfile::TempDir;

    fn writer_for(dir: &Path, dejitter: bool) -> (ChunkSender, PersistenceWriter) {
        writer_at(&dir.join("EEG_signal.csv"), dejitter)
    }

    fn writer_at(sink: &Path, dejitter: bool) -> (ChunkSender, PersistenceWriter) {
        let descriptor = Arc::new(StreamDescriptor {
            kind: StreamKind::Eeg,
            name: "Test".to_string(),
            source_id: "test-1".to_string(),
            channel_names: vec!["TP9".to_string(), "AF7".to_string()],
            nominal_rate: 4.0,
            sample_format: SampleFormat::Float32,
            output_sink: sink.to_path_buf(),
        });
        let (tx, rx) = stream_buffer(StreamKind::Eeg, 100);
        let writer =
            PersistenceWriter::new(descriptor, rx, TimestampCorrector::new(0.5, dejitter), 3);
        (tx, writer)
    }

    fn chunk(start: f64, n: usize) -> SampleChunk {
        SampleChunk {
            local_timestamps: (0..n).map(|i| start + i as f64 * 0.25).collect(),
            values: (0..n).map(|i| vec![i as f64, 1.5]).collect(),
        }
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_header_written_once_across_flushes() {
        let temp = TempDir::new().unwrap();
        let (tx, mut writer) = writer_for(temp.path(), false);

        tx.push(chunk(0.0, 2));
        let first = writer.flush(FlushMode::Continuous);
        assert_eq!(first.samples_written, 2);

        writer.flush(FlushMode::Continuous);

        tx.push(chunk(0.5, 2));
        let last = writer.flush(FlushMode::Final);
        assert_eq!(last.samples_written, 2);
        assert_eq!(last.total_rows, 4);

        let lines = read_lines(&temp.path().join("EEG_signal.csv"));
        assert_eq!(lines[0], "timestamp,TP9,AF7");
        assert_eq!(lines.len(), 5);
        assert_eq!(lines.iter().filter(|l| l.starts_with("timestamp")).count(), 1);
        assert_eq!(lines[1], "0.500,0.000,1.500");
        assert_eq!(lines[4], "1.250,1.000,1.500");
    }

    #[test]
    fn test_final_flush_on_empty_buffer_creates_header_only_file() {
        let temp = TempDir::new().unwrap();
        let (_tx, mut writer) = writer_for(temp.path(), true);

        let report = writer.flush(FlushMode::Final);
        assert_eq!(report.samples_written, 0);
        assert!(writer.header_written());

        let lines = read_lines(&temp.path().join("EEG_signal.csv"));
        assert_eq!(lines, vec!["timestamp,TP9,AF7".to_string()]);
    }

    #[test]
    fn test_second_final_flush_is_ignored() {
        let temp = TempDir::new().unwrap();
        let (tx, mut writer) = writer_for(temp.path(), false);

        tx.push(chunk(0.0, 3));
        assert_eq!(writer.flush(FlushMode::Final).samples_written, 3);

        tx.push(chunk(1.0, 3));
        let again = writer.flush(FlushMode::Final);
        assert_eq!(again.chunks_drained, 0);
        assert_eq!(again.total_rows, 3);
        assert_eq!(writer.finish().flushes, 1);
    }

    #[test]
    fn test_bad_chunk_is_skipped_and_writing_continues() {
        let temp = TempDir::new().unwrap();
        let (tx, mut writer) = writer_for(temp.path(), false);

        tx.push(chunk(0.0, 2));
        tx.push(SampleChunk {
            local_timestamps: vec![0.5],
            values: vec![vec![1.0]],
        });
        tx.push(chunk(0.75, 1));

        let report = writer.flush(FlushMode::Continuous);
        assert_eq!(report.chunks_drained, 3);
        assert_eq!(report.chunks_skipped, 1);
        assert_eq!(report.samples_skipped, 1);
        assert_eq!(report.samples_written, 3);

        tx.push(chunk(1.0, 2));
        writer.flush(FlushMode::Final);

        let totals = writer.finish();
        assert_eq!(totals.rows_written, 5);
        assert_eq!(totals.samples_skipped, 1);
        assert_eq!(
            read_lines(&temp.path().join("EEG_signal.csv")).len(),
            6
        );
    }

    #[test]
    fn test_existing_file_is_replaced_not_appended() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("EEG_signal.csv");
        std::fs::write(&path, "stale,content\n1,2\n").unwrap();

        let (tx, mut writer) = writer_for(temp.path(), false);
        tx.push(chunk(0.0, 1));
        writer.flush(FlushMode::Final);

        let lines = read_lines(&path);
        assert_eq!(lines[0], "timestamp,TP9,AF7");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_dejitter_spans_whole_batch() {
        let temp = TempDir::new().unwrap();
        let (tx, mut writer) = writer_for(temp.path(), true);

        tx.push(SampleChunk {
            local_timestamps: vec![0.0, 0.26],
            values: vec![vec![0.0, 0.0]; 2],
        });
        tx.push(SampleChunk {
            local_timestamps: vec![0.49, 0.75],
            values: vec![vec![0.0, 0.0]; 2],
        });
        writer.flush(FlushMode::Final);

        let timestamps: Vec<f64> = read_lines(&temp.path().join("EEG_signal.csv"))
            .iter()
            .skip(1)
            .map(|line| line.split(',').next().unwrap().parse().unwrap())
            .collect();
        let spacing: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(spacing.iter().all(|d| (d - spacing[0]).abs() < 2e-3));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_rows_rejected_by_the_device_are_skipped() {
        let (tx, mut writer) = writer_at(Path::new("/dev/full"), false);

        tx.push(chunk(0.0, 3));
        let report = writer.flush(FlushMode::Final);
        assert_eq!(report.samples_written, 0);
        assert_eq!(report.samples_skipped, 3);
        assert_eq!(report.chunks_skipped, 1);
        assert!(!writer.header_written());

        let totals = writer.finish();
        assert_eq!(totals.rows_written, 0);
        assert_eq!(totals.samples_skipped, 3);
    }

    #[test]
    fn test_header_follows_a_sink_that_failed_to_open() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("later");
        let (tx, mut writer) = writer_for(&dir, false);

        tx.push(chunk(0.0, 2));
        let failed = writer.flush(FlushMode::Continuous);
        assert_eq!(failed.samples_skipped, 2);
        assert!(!writer.header_written());

        std::fs::create_dir_all(&dir).unwrap();
        tx.push(chunk(0.5, 2));
        let report = writer.flush(FlushMode::Final);
        assert_eq!(report.samples_written, 2);
        assert_eq!(report.total_rows, 2);

        let lines = read_lines(&dir.join("EEG_signal.csv"));
        assert_eq!(lines[0], "timestamp,TP9,AF7");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "1.000,0.000,1.500");
    }
}
