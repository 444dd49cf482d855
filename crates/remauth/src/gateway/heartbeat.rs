//! Heartbeat/keepalive mechanism.
//!
//! The monitor sends `heartbeat` frames on its own timer and watches for the
//! matching `heartbeat_ack`. When an ack is overdue by more than one interval
//! plus a grace period and nothing else has arrived in that window, it cancels
//! the `stale` token it was given so the session can tear the connection down.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use remauth_proto::ClientFrame;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Number of round-trip samples kept for the average.
pub const LATENCY_WINDOW: usize = 20;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between heartbeats.
    pub interval: Duration,
    /// Extra time allowed for an ack beyond one interval.
    pub grace: Duration,
}

impl HeartbeatConfig {
    /// Build from the `heartbeat_interval` (milliseconds) of a `hello` frame.
    #[must_use]
    pub const fn from_hello(heartbeat_interval_ms: u64, grace: Duration) -> Self {
        Self {
            interval: Duration::from_millis(heartbeat_interval_ms),
            grace,
        }
    }

    /// How long an unacknowledged heartbeat may stay outstanding.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        self.interval + self.grace
    }
}

#[derive(Debug)]
struct HeartbeatStats {
    acked: bool,
    last_send: Option<Instant>,
    last_recv: Instant,
    next_due: Instant,
    latest: Option<Duration>,
    latencies: VecDeque<Duration>,
}

impl HeartbeatStats {
    fn new(now: Instant, interval: Duration) -> Self {
        Self {
            acked: true,
            last_send: None,
            last_recv: now,
            next_due: now + interval,
            latest: None,
            latencies: VecDeque::with_capacity(LATENCY_WINDOW),
        }
    }

    /// `last_send` keeps the oldest unacknowledged send so repeated
    /// heartbeats cannot push the stale deadline forward.
    fn record_sent(&mut self, now: Instant, interval: Duration) {
        if self.acked {
            self.last_send = Some(now);
        }
        self.acked = false;
        self.next_due = now + interval;
    }

    fn record_ack(&mut self, now: Instant) {
        self.acked = true;
        self.last_recv = now;
        if let Some(sent) = self.last_send {
            let latency = now.saturating_duration_since(sent);
            if self.latencies.len() == LATENCY_WINDOW {
                self.latencies.pop_front();
            }
            self.latencies.push_back(latency);
            self.latest = Some(latency);
        }
    }

    fn average(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let total: Duration = self.latencies.iter().sum();
        u32::try_from(self.latencies.len())
            .ok()
            .map(|count| total / count)
    }

    fn stale_deadline(&self, limit: Duration) -> Option<Instant> {
        if self.acked {
            return None;
        }
        let sent = self.last_send?;
        Some((sent + limit).max(self.last_recv + limit))
    }

    fn is_stale(&self, now: Instant, limit: Duration) -> bool {
        self.stale_deadline(limit).is_some_and(|deadline| now >= deadline)
    }
}

/// Heartbeat scheduler and latency tracker for one connection attempt.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    stats: Arc<Mutex<HeartbeatStats>>,
    stop: CancellationToken,
    stale: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    /// Create a monitor that will cancel `stale` when the gateway stops
    /// answering. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(config: HeartbeatConfig, stale: CancellationToken) -> Self {
        let stats = HeartbeatStats::new(Instant::now(), config.interval);
        Self {
            config,
            stats: Arc::new(Mutex::new(stats)),
            stop: CancellationToken::new(),
            stale,
            task: None,
        }
    }

    /// The monitor's configuration.
    #[must_use]
    pub const fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Spawn the timer task. Heartbeats are pushed into `outbound`, which
    /// must be drained by the single writer of the socket.
    ///
    /// Returns `false` if the monitor was already started or stopped.
    pub fn start(&mut self, outbound: mpsc::Sender<ClientFrame>) -> bool {
        if self.task.is_some() || self.stop.is_cancelled() {
            return false;
        }

        self.stats.lock().next_due = Instant::now() + self.config.interval;

        let stats = Arc::clone(&self.stats);
        let stop = self.stop.clone();
        let stale = self.stale.clone();
        let interval = self.config.interval;
        let limit = self.config.stale_after();

        self.task = Some(tokio::spawn(async move {
            loop {
                let wake = {
                    let s = stats.lock();
                    s.stale_deadline(limit)
                        .map_or(s.next_due, |deadline| deadline.min(s.next_due))
                };

                tokio::select! {
                    () = stop.cancelled() => break,
                    () = tokio::time::sleep_until(wake) => {}
                }

                let now = Instant::now();
                let due = {
                    let s = stats.lock();
                    if s.is_stale(now, limit) {
                        None
                    } else {
                        Some(now >= s.next_due)
                    }
                };

                match due {
                    None => {
                        warn!(
                            stale_after_ms = limit.as_millis() as u64,
                            "remote auth gateway stopped responding to heartbeats"
                        );
                        stale.cancel();
                        break;
                    }
                    Some(false) => continue,
                    Some(true) => {}
                }

                if outbound.send(ClientFrame::Heartbeat).await.is_err() {
                    debug!("heartbeat channel closed, stopping");
                    break;
                }
                stats.lock().record_sent(Instant::now(), interval);
                debug!("keeping remote auth websocket alive");
            }
        }));

        true
    }

    /// Record a heartbeat written outside the timer (the one sent on `hello`).
    pub fn mark_sent(&self) {
        self.stats.lock().record_sent(Instant::now(), self.config.interval);
    }

    /// Note that a frame arrived; the connection is alive.
    pub fn tick(&self) {
        self.stats.lock().last_recv = Instant::now();
    }

    /// Record a `heartbeat_ack`.
    pub fn ack(&self) {
        let mut stats = self.stats.lock();
        stats.record_ack(Instant::now());
        if let Some(latency) = stats.latest {
            debug!(latency_ms = latency.as_millis() as u64, "heartbeat acknowledged");
        }
    }

    /// Whether the last heartbeat has been acknowledged.
    #[must_use]
    pub fn is_acked(&self) -> bool {
        self.stats.lock().acked
    }

    /// Round trip of the most recent acknowledged heartbeat.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.stats.lock().latest
    }

    /// Mean round trip over the last [`LATENCY_WINDOW`] acks.
    #[must_use]
    pub fn average_latency(&self) -> Option<Duration> {
        self.stats.lock().average()
    }

    /// A read-only handle on the latency samples that outlives `&self`.
    #[must_use]
    pub fn latency_view(&self) -> LatencyView {
        LatencyView {
            stats: Arc::clone(&self.stats),
        }
    }

    /// Check if the timer task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signal the timer task to stop. Safe to call repeatedly.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Stop the timer task and wait for it to exit.
    pub async fn shutdown(&mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Cloneable view of a monitor's latency samples.
#[derive(Debug, Clone)]
pub struct LatencyView {
    stats: Arc<Mutex<HeartbeatStats>>,
}

impl LatencyView {
    /// Round trip of the most recent acknowledged heartbeat.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.stats.lock().latest
    }

    /// Mean round trip over the last [`LATENCY_WINDOW`] acks.
    #[must_use]
    pub fn average_latency(&self) -> Option<Duration> {
        self.stats.lock().average()
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_millis(20),
            grace: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_config_from_hello() {
        let config = HeartbeatConfig::from_hello(41_250, Duration::from_secs(5));
        assert_eq!(config.interval, Duration::from_millis(41_250));
        assert_eq!(config.stale_after(), Duration::from_millis(46_250));
    }

    #[tokio::test]
    async fn test_latency_window_is_bounded() {
        let monitor = HeartbeatMonitor::new(fast_config(), CancellationToken::new());
        assert!(monitor.latency().is_none());
        assert!(monitor.average_latency().is_none());

        for _ in 0..(LATENCY_WINDOW + 5) {
            monitor.mark_sent();
            monitor.ack();
        }

        assert_eq!(monitor.stats.lock().latencies.len(), LATENCY_WINDOW);
        assert!(monitor.latency().is_some());
        assert!(monitor.average_latency().is_some());

        let view = monitor.latency_view();
        drop(monitor);
        assert!(view.latency().is_some());
        assert!(view.average_latency().is_some());
    }

    #[tokio::test]
    async fn test_ack_flag_tracks_sends() {
        let monitor = HeartbeatMonitor::new(fast_config(), CancellationToken::new());
        assert!(monitor.is_acked());

        monitor.mark_sent();
        assert!(!monitor.is_acked());

        monitor.ack();
        assert!(monitor.is_acked());
    }

    #[tokio::test]
    async fn test_monitor_sends_heartbeats() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut monitor = HeartbeatMonitor::new(
            HeartbeatConfig {
                interval: Duration::from_millis(10),
                grace: Duration::from_secs(5),
            },
            CancellationToken::new(),
        );
        assert!(monitor.start(tx));

        for _ in 0..2 {
            let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("timeout waiting for heartbeat")
                .expect("channel closed");
            assert_eq!(frame, ClientFrame::Heartbeat);
            monitor.ack();
        }

        monitor.shutdown().await;
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_start_only_once() {
        let (tx, _rx) = mpsc::channel(8);
        let mut monitor = HeartbeatMonitor::new(fast_config(), CancellationToken::new());

        assert!(monitor.start(tx.clone()));
        assert!(!monitor.start(tx));
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (tx, _rx) = mpsc::channel(8);
        let mut monitor = HeartbeatMonitor::new(fast_config(), CancellationToken::new());
        monitor.start(tx);

        monitor.stop();
        monitor.stop();
        monitor.shutdown().await;
        monitor.shutdown().await;
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_missing_ack_marks_connection_stale() {
        let (tx, mut rx) = mpsc::channel(8);
        let stale = CancellationToken::new();
        let mut monitor = HeartbeatMonitor::new(fast_config(), stale.clone());
        monitor.start(tx);

        // Drain heartbeats without acknowledging.
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        tokio::time::timeout(Duration::from_secs(2), stale.cancelled())
            .await
            .expect("stale token should fire");
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_acked_connection_stays_fresh() {
        let (tx, mut rx) = mpsc::channel(8);
        let stale = CancellationToken::new();
        let mut monitor = HeartbeatMonitor::new(fast_config(), stale.clone());
        monitor.start(tx);

        for _ in 0..5 {
            let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("timeout waiting for heartbeat");
            assert!(frame.is_some());
            monitor.tick();
            monitor.ack();
        }

        assert!(!stale.is_cancelled());
        monitor.shutdown().await;
    }
}
