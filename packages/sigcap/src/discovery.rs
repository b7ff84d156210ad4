// Stream discovery
//
// Resolves one stream per requested type. Every type is resolved on its own
// worker so a slow or misbehaving transport can never hold discovery past the
// configured timeout: a resolver that overruns is abandoned and its type is
// reported missing.

use crate::config::FALLBACK_NOMINAL_RATE;
use crate::error::{CaptureError, CaptureResult};
use crate::transport::{StreamInfo, StreamTransport};
use crate::types::StreamKind;
use crossbeam::channel;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Extra time granted to a resolver before it is considered hung
const RESOLVE_GRACE: Duration = Duration::from_millis(250);

/// Outcome of resolving all requested stream types
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    /// First stream found per type, ordered by type
    pub resolved: Vec<StreamInfo>,
    /// Requested types nothing was found for
    pub missing: Vec<StreamKind>,
}

/// Resolve the first stream of every requested type.
///
/// Missing types are logged as warnings. Fails with
/// [`CaptureError::NoSources`] only when none of the types resolved.
pub fn discover(
    transport: Arc<dyn StreamTransport>,
    kinds: &[StreamKind],
    timeout: Duration,
) -> CaptureResult<DiscoveryReport> {
    let requested: BTreeSet<StreamKind> = kinds.iter().copied().collect();
    let (tx, rx) = channel::unbounded();

    log::info!(
        "Resolving {} stream type(s) via {} transport (timeout {:.1}s)",
        requested.len(),
        transport.name(),
        timeout.as_secs_f64()
    );

    for kind in &requested {
        let kind = *kind;
        let transport = Arc::clone(&transport);
        let tx = tx.clone();
        std::thread::Builder::new()
            .name(format!("resolve-{}", kind))
            .spawn(move || {
                let result = transport.resolve(kind, timeout);
                // Receiver may already have given up on us
                let _ = tx.send((kind, result));
            })?;
    }
    drop(tx);

    let deadline = Instant::now() + timeout + RESOLVE_GRACE;
    let mut resolved = Vec::new();
    let mut answered = BTreeSet::new();

    while answered.len() < requested.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((kind, result)) => {
                answered.insert(kind);
                match result {
                    Ok(streams) => {
                        if let Some(info) = select_first(kind, streams) {
                            resolved.push(info);
                        }
                    }
                    Err(e) => {
                        log::error!("Error while resolving {} stream: {}", kind, e);
                    }
                }
            }
            Err(_) => {
                for kind in requested.difference(&answered) {
                    log::warn!(
                        "Resolving {} did not finish within {:.1}s; treating it as absent",
                        kind,
                        timeout.as_secs_f64()
                    );
                }
                break;
            }
        }
    }

    resolved.sort_by_key(|info| info.kind);
    let missing: Vec<StreamKind> = requested
        .iter()
        .copied()
        .filter(|kind| !resolved.iter().any(|info| info.kind == *kind))
        .collect();

    for kind in &missing {
        log::warn!("No {} stream found", kind);
    }

    if resolved.is_empty() {
        let names: Vec<&str> = requested.iter().map(|k| k.as_str()).collect();
        log::error!(
            "No streams found for any requested type ({}). Make sure the device is connected and streaming.",
            names.join(", ")
        );
        return Err(CaptureError::NoSources(names.join(", ")));
    }

    Ok(DiscoveryReport { resolved, missing })
}

fn select_first(kind: StreamKind, streams: Vec<StreamInfo>) -> Option<StreamInfo> {
    let found = streams.len();
    let mut matching = streams.into_iter().filter(|info| {
        if info.kind != kind {
            log::warn!(
                "Transport returned a {} stream while resolving {}; ignoring it",
                info.kind,
                kind
            );
        }
        info.kind == kind
    });

    let mut info = matching.next()?;
    if found > 1 {
        log::warn!("Multiple {} streams found ({}), using first match", kind, found);
    }

    if !(info.nominal_rate.is_finite() && info.nominal_rate > 0.0) {
        log::warn!(
            "{} stream declares no nominal rate; assuming {} Hz",
            kind,
            FALLBACK_NOMINAL_RATE
        );
        info.nominal_rate = FALLBACK_NOMINAL_RATE;
    }

    log::info!(
        "Found {} stream '{}' ({} channels @ {} Hz)",
        kind,
        info.name,
        info.channel_count,
        info.nominal_rate
    );
    Some(info)
}
