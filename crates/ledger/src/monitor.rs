//! Ledger monitor: drives cursor advancement and range scans from the
//! ledger-closed stream.
//!
//! Messages are handled strictly one at a time. A scan, and the handler it
//! feeds, completes before the next notification is looked at, so the cursor
//! only ever advances in order.

use crate::message::StreamEvent;
use crate::{ConnectionState, RangeScanner, RangeSource, WsMessage};
use async_trait::async_trait;
use tokenwatch_core::{CursorStep, LedgerCursor, LedgerIndex, LedgerRange, TrustLineCandidate};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Receives the trust-line candidates found in a scanned range.
#[async_trait]
pub trait CandidateHandler: Send + Sync {
    /// Called once per range with at least one candidate. The monitor waits
    /// for this to return before processing the next notification.
    async fn handle_candidates(&self, range: LedgerRange, candidates: Vec<TrustLineCandidate>);
}

/// Counters kept by the monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// Ledger-closed notifications processed.
    pub notifications: u64,
    /// Range scans started.
    pub scans: u64,
    /// Scans whose fetch failed (range skipped).
    pub scan_failures: u64,
    /// Candidates handed to the handler.
    pub candidates: u64,
    /// Notifications not ahead of the cursor.
    pub stale: u64,
    /// Notifications dropped because the link was not connected.
    pub ignored_offline: u64,
    /// Successful reconnects.
    pub reconnects: u64,
}

/// Owns the [`LedgerCursor`] and turns ledger-closed notifications into scans.
pub struct LedgerMonitor<S, H> {
    cursor: LedgerCursor,
    scanner: RangeScanner<S>,
    handler: H,
    link: ConnectionState,
    stats: MonitorStats,
}

impl<S, H> LedgerMonitor<S, H>
where
    S: RangeSource,
    H: CandidateHandler,
{
    pub fn new(scanner: RangeScanner<S>, handler: H) -> Self {
        Self {
            cursor: LedgerCursor::new(),
            scanner,
            handler,
            link: ConnectionState::Connecting,
            stats: MonitorStats::default(),
        }
    }

    /// Last processed ledger.
    pub fn cursor(&self) -> Option<LedgerIndex> {
        self.cursor.last()
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Process stream messages until the channel closes or `shutdown`
    /// flips to `true` (or its sender is dropped).
    ///
    /// A scan already in progress finishes first; queued messages are not
    /// drained once shutdown is requested.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<WsMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        info!("Starting ledger monitor");

        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle_message(msg).await,
                    None => break,
                },
            }
        }

        info!(
            cursor = ?self.cursor.last(),
            scans = self.stats.scans,
            scan_failures = self.stats.scan_failures,
            "Ledger monitor stopped"
        );
        self
    }

    /// Handle one message from the stream client.
    pub async fn handle_message(&mut self, msg: WsMessage) {
        match msg {
            WsMessage::Connected => {
                self.link = self.link.clone().on_connected();
            }
            WsMessage::Reconnected => {
                self.link = self.link.clone().on_connected();
                self.stats.reconnects += 1;
                info!(
                    cursor = ?self.cursor.last(),
                    "Ledger stream back, next notification scans the outage window"
                );
            }
            WsMessage::Disconnected(reason) => {
                debug!(reason = %reason, "Ledger stream down");
                self.link = self.link.clone().on_failure(reason);
            }
            WsMessage::Text(text) => match StreamEvent::parse(&text) {
                Ok(StreamEvent::LedgerClosed(closed)) => {
                    if !self.link.is_connected() {
                        // Frames queued from a connection that has since died.
                        self.stats.ignored_offline += 1;
                        debug!(
                            ledger_index = closed.ledger_index,
                            "Ignoring ledger notification while disconnected"
                        );
                        return;
                    }
                    self.on_ledger_closed(closed.ledger_index).await;
                }
                Ok(StreamEvent::Response(response)) if response.is_error() => {
                    warn!(error = %response.error_text(), "Ledger server rejected request");
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "Unparseable ledger stream frame");
                }
            },
        }
    }

    /// Apply a ledger-closed notification.
    ///
    /// Sets the baseline on first sight, otherwise scans `(cursor, index]`,
    /// hands candidates to the handler and advances the cursor whether or
    /// not the fetch succeeded.
    pub async fn on_ledger_closed(&mut self, index: LedgerIndex) -> CursorStep {
        self.stats.notifications += 1;

        let step = self.cursor.observe(index);
        match step {
            CursorStep::Baseline(index) => {
                info!(ledger_index = index, "Ledger cursor baseline set");
            }
            CursorStep::Stale { cursor, observed } => {
                self.stats.stale += 1;
                debug!(cursor, observed, "Ignoring ledger notification behind cursor");
            }
            CursorStep::Scan(range) => {
                if range.len() > 1 {
                    info!(%range, ledgers = range.len(), "Scanning multi-ledger range");
                }

                let outcome = self.scanner.scan(range).await;
                self.stats.scans += 1;
                if outcome.failed {
                    self.stats.scan_failures += 1;
                }

                if !outcome.candidates.is_empty() {
                    self.stats.candidates += outcome.candidates.len() as u64;
                    self.handler.handle_candidates(range, outcome.candidates).await;
                }

                self.cursor.advance(range.end);
            }
        }
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LedgerError;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct FakeSource {
        requested: Arc<Mutex<Vec<LedgerRange>>>,
        failing: Arc<Mutex<HashSet<LedgerIndex>>>,
    }

    impl FakeSource {
        fn fail_at(&self, end: LedgerIndex) {
            self.failing.lock().unwrap().insert(end);
        }

        fn requested(&self) -> Vec<LedgerRange> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RangeSource for FakeSource {
        async fn fetch_range(&self, range: LedgerRange) -> Result<Vec<Value>, LedgerError> {
            self.requested.lock().unwrap().push(range);
            if self.failing.lock().unwrap().contains(&range.end) {
                return Err(LedgerError::Timeout("simulated".into()));
            }
            // One trust line and one payment per ledger in the range.
            let mut txs = Vec::new();
            for index in range.start + 1..=range.end {
                txs.push(json!({
                    "TransactionType": "TrustSet",
                    "LimitAmount": {"currency": "ABC", "issuer": format!("rIssuer{}", index), "value": "1"},
                    "ledger_index": index,
                }));
                txs.push(json!({"TransactionType": "Payment", "ledger_index": index}));
            }
            Ok(txs)
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<(LedgerRange, Vec<TrustLineCandidate>)>>>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        delay: Option<Duration>,
    }

    impl Recorder {
        fn ranges(&self) -> Vec<LedgerRange> {
            self.calls.lock().unwrap().iter().map(|(r, _)| *r).collect()
        }
    }

    #[async_trait]
    impl CandidateHandler for Recorder {
        async fn handle_candidates(&self, range: LedgerRange, candidates: Vec<TrustLineCandidate>) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().unwrap().push((range, candidates));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn monitor(source: FakeSource, handler: Recorder) -> LedgerMonitor<FakeSource, Recorder> {
        LedgerMonitor::new(RangeScanner::new(source), handler)
    }

    fn closed(index: LedgerIndex) -> WsMessage {
        WsMessage::Text(json!({"type": "ledgerClosed", "ledger_index": index}).to_string())
    }

    #[tokio::test]
    async fn test_cold_start_sets_cursor_without_scan() {
        let source = FakeSource::default();
        let mut monitor = monitor(source.clone(), Recorder::default());

        let step = monitor.on_ledger_closed(1000).await;

        assert_eq!(step, CursorStep::Baseline(1000));
        assert_eq!(monitor.cursor(), Some(1000));
        assert!(source.requested().is_empty());
    }

    #[tokio::test]
    async fn test_increasing_notifications_scan_contiguous_ranges() {
        let source = FakeSource::default();
        let handler = Recorder::default();
        let mut monitor = monitor(source.clone(), handler.clone());

        for index in [1000, 1001, 1002, 1005, 1006] {
            monitor.on_ledger_closed(index).await;
        }

        assert_eq!(monitor.cursor(), Some(1006));
        assert_eq!(
            source.requested(),
            vec![
                LedgerRange::new(1000, 1001),
                LedgerRange::new(1001, 1002),
                LedgerRange::new(1002, 1005),
                LedgerRange::new(1005, 1006),
            ]
        );
        // Only trust lines reach the handler, one per ledger.
        let total: usize = handler.calls.lock().unwrap().iter().map(|(_, c)| c.len()).sum();
        assert_eq!(total, 6);
        assert_eq!(monitor.stats().candidates, 6);
    }

    #[tokio::test]
    async fn test_scan_failure_still_advances_cursor() {
        let source = FakeSource::default();
        source.fail_at(1003);
        let handler = Recorder::default();
        let mut monitor = monitor(source.clone(), handler.clone());

        monitor.on_ledger_closed(1000).await;
        monitor.on_ledger_closed(1003).await;

        assert_eq!(monitor.cursor(), Some(1003));
        assert!(handler.ranges().is_empty());
        assert_eq!(monitor.stats().scan_failures, 1);

        monitor.on_ledger_closed(1004).await;
        assert_eq!(
            source.requested(),
            vec![LedgerRange::new(1000, 1003), LedgerRange::new(1003, 1004)]
        );
        assert_eq!(handler.ranges(), vec![LedgerRange::new(1003, 1004)]);
    }

    #[tokio::test]
    async fn test_stale_notification_does_not_scan() {
        let source = FakeSource::default();
        let mut monitor = monitor(source.clone(), Recorder::default());

        monitor.on_ledger_closed(1000).await;
        monitor.on_ledger_closed(1002).await;
        let step = monitor.on_ledger_closed(1001).await;

        assert!(matches!(step, CursorStep::Stale { .. }));
        assert_eq!(monitor.cursor(), Some(1002));
        assert_eq!(source.requested().len(), 1);
        assert_eq!(monitor.stats().stale, 1);
    }

    #[tokio::test]
    async fn test_reconnect_scans_outage_as_one_range() {
        let source = FakeSource::default();
        let mut monitor = monitor(source.clone(), Recorder::default());

        monitor.handle_message(WsMessage::Connected).await;
        monitor.handle_message(closed(2000)).await;
        monitor.handle_message(closed(2001)).await;
        monitor
            .handle_message(WsMessage::Disconnected("reset".into()))
            .await;
        // Frame from the dead connection is not acted on.
        monitor.handle_message(closed(2002)).await;
        monitor.handle_message(WsMessage::Reconnected).await;
        monitor.handle_message(closed(2050)).await;

        assert_eq!(monitor.cursor(), Some(2050));
        assert_eq!(
            source.requested(),
            vec![LedgerRange::new(2000, 2001), LedgerRange::new(2001, 2050)]
        );
        assert_eq!(monitor.stats().ignored_offline, 1);
        assert_eq!(monitor.stats().reconnects, 1);
    }

    #[tokio::test]
    async fn test_notifications_before_connect_are_ignored() {
        let source = FakeSource::default();
        let mut monitor = monitor(source.clone(), Recorder::default());

        monitor.handle_message(closed(10)).await;
        assert_eq!(monitor.cursor(), None);
    }

    #[tokio::test]
    async fn test_non_ledger_frames_ignored() {
        let source = FakeSource::default();
        let mut monitor = monitor(source.clone(), Recorder::default());
        monitor.handle_message(WsMessage::Connected).await;

        monitor
            .handle_message(WsMessage::Text(
                r#"{"id":1,"status":"success","type":"response","result":{}}"#.into(),
            ))
            .await;
        monitor.handle_message(WsMessage::Text("garbage".into())).await;

        assert_eq!(monitor.cursor(), None);
        assert_eq!(monitor.stats().notifications, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_processes_notifications_sequentially() {
        let source = FakeSource::default();
        let handler = Recorder {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel(16);

        tx.send(WsMessage::Connected).await.unwrap();
        for index in 500..506 {
            tx.send(closed(index)).await.unwrap();
        }
        drop(tx);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor = monitor(source.clone(), handler.clone())
            .run(rx, shutdown_rx)
            .await;

        assert_eq!(monitor.cursor(), Some(505));
        assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(handler.ranges().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_without_draining_queue() {
        let source = FakeSource::default();
        let handler = Recorder {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(WsMessage::Connected).await.unwrap();
        tx.send(closed(700)).await.unwrap();
        tx.send(closed(701)).await.unwrap();

        let task = tokio::spawn(monitor(source.clone(), handler.clone()).run(rx, shutdown_rx));

        // Let the first scan start, then request shutdown while it is in flight.
        tokio::time::sleep(Duration::from_millis(10)).await;
        for index in 702..710 {
            tx.send(closed(index)).await.unwrap();
        }
        shutdown_tx.send(true).unwrap();

        let monitor = task.await.unwrap();
        assert_eq!(monitor.cursor(), Some(701));
        assert_eq!(handler.ranges(), vec![LedgerRange::new(700, 701)]);
        assert!(source.requested().iter().all(|r| r.end <= 701));
    }
}
