// UDP multi-device listener
//
// Binds one socket per stream type. Each datagram carries one JSON-encoded
// chunk. Resolution waits (bounded) for the first datagram on the type's
// socket to learn the channel layout; that datagram is kept and delivered as
// the first pulled chunk, so nothing received during discovery is lost.
//
// Senders stamp samples with the receiver's reference clock, so the time
// correction of a UDP stream is always zero.

use super::{StreamInfo, StreamInlet, StreamTransport};
use crate::error::{CaptureError, CaptureResult};
use crate::types::{SampleChunk, SampleFormat, StreamKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

/// Smallest read timeout accepted by the socket API
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Address a stream type listens on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UdpBinding {
    pub kind: StreamKind,
    pub bind_addr: String,
}

impl UdpBinding {
    pub fn new(kind: StreamKind, bind_addr: impl Into<String>) -> Self {
        Self {
            kind,
            bind_addr: bind_addr.into(),
        }
    }
}

/// Wire format of one datagram
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDatagram {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub channel_names: Vec<String>,
    #[serde(default)]
    pub nominal_rate: f64,
    pub timestamps: Vec<f64>,
    pub values: Vec<Vec<f64>>,
}

impl ChunkDatagram {
    fn parse(data: &[u8]) -> CaptureResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    fn channel_count(&self) -> usize {
        if self.channel_names.is_empty() {
            self.values.first().map(|row| row.len()).unwrap_or(0)
        } else {
            self.channel_names.len()
        }
    }

    fn into_samples(self) -> CaptureResult<Vec<(f64, Vec<f64>)>> {
        if self.timestamps.len() != self.values.len() {
            return Err(CaptureError::Transport(format!(
                "datagram carries {} timestamps for {} samples",
                self.timestamps.len(),
                self.values.len()
            )));
        }
        Ok(self.timestamps.into_iter().zip(self.values).collect())
    }
}

struct ResolvedSocket {
    socket: UdpSocket,
    first: ChunkDatagram,
    peer: SocketAddr,
}

pub struct UdpTransport {
    bindings: BTreeMap<StreamKind, String>,
    buffer_size: usize,
    resolved: Mutex<BTreeMap<StreamKind, ResolvedSocket>>,
}

impl UdpTransport {
    pub fn new(bindings: Vec<UdpBinding>, buffer_size: usize) -> Self {
        Self {
            bindings: bindings
                .into_iter()
                .map(|binding| (binding.kind, binding.bind_addr))
                .collect(),
            buffer_size: buffer_size.max(1),
            resolved: Mutex::new(BTreeMap::new()),
        }
    }

    fn bind(&self, kind: StreamKind) -> CaptureResult<Option<UdpSocket>> {
        let Some(addr) = self.bindings.get(&kind) else {
            return Ok(None);
        };
        log::info!("Binding UDP socket for {} on {}", kind, addr);
        UdpSocket::bind(addr)
            .map(Some)
            .map_err(|e| CaptureError::Transport(format!("UDP bind {} failed: {}", addr, e)))
    }

    fn info_for(kind: StreamKind, datagram: &ChunkDatagram, peer: &SocketAddr) -> StreamInfo {
        StreamInfo {
            name: datagram
                .name
                .clone()
                .unwrap_or_else(|| format!("UDP-{}", kind)),
            kind,
            source_id: datagram
                .source_id
                .clone()
                .unwrap_or_else(|| peer.to_string()),
            hostname: peer.ip().to_string(),
            channel_count: datagram.channel_count(),
            channel_labels: datagram.channel_names.clone(),
            nominal_rate: datagram.nominal_rate,
            sample_format: SampleFormat::Float64,
        }
    }
}

impl StreamTransport for UdpTransport {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn resolve(&self, kind: StreamKind, timeout: Duration) -> CaptureResult<Vec<StreamInfo>> {
        if let Some(resolved) = self.resolved.lock().get(&kind) {
            return Ok(vec![Self::info_for(kind, &resolved.first, &resolved.peer)]);
        }

        let Some(socket) = self.bind(kind)? else {
            log::debug!("No UDP binding configured for {}", kind);
            return Ok(Vec::new());
        };

        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            socket.set_read_timeout(Some(remaining.max(MIN_READ_TIMEOUT)))?;

            match socket.recv_from(&mut buf) {
                Ok((len, peer)) => match ChunkDatagram::parse(&buf[..len]) {
                    Ok(first) => {
                        let info = Self::info_for(kind, &first, &peer);
                        self.resolved
                            .lock()
                            .insert(kind, ResolvedSocket { socket, first, peer });
                        return Ok(vec![info]);
                    }
                    Err(e) => {
                        log::warn!("Ignoring {} datagram from {}: {}", kind, peer, e);
                    }
                },
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(Vec::new());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn open_inlet(
        &self,
        info: &StreamInfo,
        _max_chunk_len: usize,
    ) -> CaptureResult<Box<dyn StreamInlet>> {
        let mut pending = VecDeque::new();
        let socket = match self.resolved.lock().remove(&info.kind) {
            Some(resolved) => {
                pending.extend(resolved.first.into_samples()?);
                resolved.socket
            }
            None => self.bind(info.kind)?.ok_or_else(|| {
                CaptureError::Transport(format!("no UDP binding for {}", info.kind))
            })?,
        };

        Ok(Box::new(UdpInlet {
            socket,
            pending,
            buf: vec![0u8; self.buffer_size],
        }))
    }
}

pub struct UdpInlet {
    socket: UdpSocket,
    /// Samples received but not yet handed out (datagrams may exceed max_samples)
    pending: VecDeque<(f64, Vec<f64>)>,
    buf: Vec<u8>,
}

impl UdpInlet {
    fn receive(&mut self, timeout: Duration) -> CaptureResult<bool> {
        self.socket
            .set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;
        match self.socket.recv(&mut self.buf) {
            Ok(len) => {
                let datagram = ChunkDatagram::parse(&self.buf[..len])?;
                self.pending.extend(datagram.into_samples()?);
                Ok(true)
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl StreamInlet for UdpInlet {
    fn pull_chunk(
        &mut self,
        timeout: Duration,
        max_samples: usize,
    ) -> CaptureResult<Option<SampleChunk>> {
        if self.pending.is_empty() && !self.receive(timeout)? {
            return Ok(None);
        }

        let count = self.pending.len().min(max_samples.max(1));
        if count == 0 {
            return Ok(None);
        }
        let (timestamps, values): (Vec<f64>, Vec<Vec<f64>>) =
            self.pending.drain(..count).unzip();
        Ok(Some(SampleChunk {
            local_timestamps: timestamps,
            values,
        }))
    }

    fn time_correction(&mut self, _timeout: Duration) -> CaptureResult<f64> {
        Ok(0.0)
    }
}
