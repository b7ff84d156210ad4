// Stop conditions
//
// A session has exactly one stop signal. Whoever trips it first (duration
// limit, an interrupt or termination signal, the operator hotkey, or an
// embedding application) records the reason; later requests are no-ops.
// Everything else only reads it.

use crate::types::StopReason;
use parking_lot::Mutex;
use std::io::BufRead;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cooperative, write-once stop flag shared by every session component
#[derive(Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
    reason: Arc<Mutex<Option<StopReason>>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Returns `false` if a stop was already requested.
    pub fn request(&self, reason: StopReason) -> bool {
        let mut current = self.reason.lock();
        if current.is_some() {
            return false;
        }
        *current = Some(reason);
        drop(current);

        log::info!("Stop requested: {}", reason);
        self.token.cancel();
        true
    }

    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<StopReason> {
        *self.reason.lock()
    }

    /// Token handed to producers
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Watches the configured stop conditions and trips the stop signal
#[derive(Debug, Clone, Default)]
pub struct StopMonitor {
    duration_limit: Option<Duration>,
    watch_interrupt: bool,
    hotkey: Option<char>,
}

impl StopMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duration_limit(mut self, limit: Option<Duration>) -> Self {
        self.duration_limit = limit;
        self
    }

    pub fn with_interrupt(mut self, watch: bool) -> Self {
        self.watch_interrupt = watch;
        self
    }

    pub fn with_hotkey(mut self, hotkey: Option<char>) -> Self {
        self.hotkey = hotkey;
        self
    }

    /// Start watching. Must be called from within a tokio runtime.
    pub fn spawn(self, signal: StopSignal) -> MonitorHandle {
        let hotkeys = self.hotkey.map(|_| stdin_lines());
        let task = tokio::spawn(self.watch(signal, hotkeys));
        MonitorHandle { task }
    }

    async fn watch(self, signal: StopSignal, mut hotkeys: Option<broadcast::Receiver<String>>) {
        if let Some(limit) = self.duration_limit {
            log::info!("Collecting data for {:.1} seconds", limit.as_secs_f64());
        }
        if let Some(key) = self.hotkey {
            log::info!("Press '{}' then Enter to stop collection", key);
        }
        if self.watch_interrupt {
            log::info!("Press Ctrl+C to stop collection");
        }

        let deadline = self
            .duration_limit
            .and_then(|limit| tokio::time::Instant::now().checked_add(limit));

        let reason = tokio::select! {
            _ = signal.cancelled() => None,
            _ = sleep_until(deadline) => Some(StopReason::DurationElapsed),
            _ = interrupt(self.watch_interrupt) => Some(StopReason::Interrupted),
            _ = next_hotkey(&mut hotkeys, self.hotkey) => Some(StopReason::OperatorHotkey),
        };

        if let Some(reason) = reason {
            signal.request(reason);
        }
        drop(hotkeys);

        // Further interrupts while draining must not cut the final flush short
        if self.watch_interrupt {
            loop {
                if wait_for_interrupt().await.is_err() {
                    break;
                }
                log::warn!("Already stopping; waiting for buffered data to be saved");
            }
        }
    }
}

/// Running monitor. Dropping it leaves the task running until shutdown.
pub struct MonitorHandle {
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop watching and wait until the task has released its listeners
    pub async fn shutdown(self) {
        self.task.abort();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                log::warn!("Stop monitor ended abnormally: {}", e);
            }
        }
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn interrupt(enabled: bool) {
    if !enabled {
        return std::future::pending().await;
    }
    if let Err(e) = wait_for_interrupt().await {
        log::warn!("Unable to listen for interrupts: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Ctrl+C, plus termination and hangup on unix. Once installed the handlers
/// stay for the life of the process, so a later kill is never fatal.
#[cfg(unix)]
async fn wait_for_interrupt() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => {
            log::info!("Received SIGTERM");
            Ok(())
        }
        _ = hangup.recv() => {
            log::info!("Received SIGHUP");
            Ok(())
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_interrupt() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

async fn next_hotkey(lines: &mut Option<broadcast::Receiver<String>>, key: Option<char>) {
    let (Some(rx), Some(key)) = (lines.as_mut(), key) else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(line) if is_hotkey(&line, key) => return,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => {
                return std::future::pending().await;
            }
        }
    }
}

/// Lines read from stdin, shared by every monitor in the process.
///
/// One reader thread serves all sessions. A monitor subscribes when it
/// starts and unsubscribes when its task ends; lines typed while nobody is
/// subscribed are dropped.
fn stdin_hub() -> &'static broadcast::Sender<String> {
    static HUB: OnceLock<broadcast::Sender<String>> = OnceLock::new();
    HUB.get_or_init(|| {
        let (tx, _) = broadcast::channel(16);
        let reader = tx.clone();
        let spawned = std::thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    // Err only means no session is listening right now
                    let _ = reader.send(line);
                }
            });
        if let Err(e) = spawned {
            log::warn!("Unable to start hotkey listener: {}", e);
        }
        tx
    })
}

fn stdin_lines() -> broadcast::Receiver<String> {
    stdin_hub().subscribe()
}

fn is_hotkey(line: &str, key: char) -> bool {
    line.trim()
        .chars()
        .next()
        .is_some_and(|c| c.eq_ignore_ascii_case(&key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_wins() {
        let signal = StopSignal::new();
        assert!(!signal.is_requested());
        assert!(signal.request(StopReason::OperatorHotkey));
        assert!(!signal.request(StopReason::DurationElapsed));
        assert!(signal.is_requested());
        assert_eq!(signal.reason(), Some(StopReason::OperatorHotkey));
        assert!(signal.token().is_cancelled());
    }

    #[test]
    fn test_hotkey_matching() {
        assert!(is_hotkey("q", 'q'));
        assert!(is_hotkey("  Q \n", 'q'));
        assert!(!is_hotkey("", 'q'));
        assert!(!is_hotkey("x", 'q'));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_limit_trips_signal() {
        let signal = StopSignal::new();
        let handle = StopMonitor::new()
            .with_duration_limit(Some(Duration::from_secs(2)))
            .spawn(signal.clone());

        signal.cancelled().await;
        assert_eq!(signal.reason(), Some(StopReason::DurationElapsed));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_external_request_ends_monitor() {
        let signal = StopSignal::new();
        let handle = StopMonitor::new().spawn(signal.clone());

        assert!(signal.request(StopReason::External));
        tokio::time::timeout(Duration::from_secs(1), handle.task)
            .await
            .expect("monitor should exit")
            .unwrap();
        assert_eq!(signal.reason(), Some(StopReason::External));
    }

    #[tokio::test]
    async fn test_hotkey_reaches_each_sequential_monitor() {
        for _ in 0..2 {
            let signal = StopSignal::new();
            let handle = StopMonitor::new()
                .with_hotkey(Some('q'))
                .spawn(signal.clone());

            stdin_hub().send("x".to_string()).unwrap();
            stdin_hub().send("q".to_string()).unwrap();
            tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
                .await
                .expect("hotkey should stop the session");
            assert_eq!(signal.reason(), Some(StopReason::OperatorHotkey));

            handle.shutdown().await;
            assert_eq!(stdin_hub().receiver_count(), 0);
        }
    }
}
