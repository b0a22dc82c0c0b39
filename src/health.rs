// =============================================================================
// Health Reporter — periodic structured status record
// =============================================================================
//
// Samples orchestrator-owned state (feed snapshot, each runner's published
// phase) at a fixed interval and emits one structured `health` log record.
// Stopped explicitly by the orchestrator after the feed, per the shutdown
// sequence — it is not driven by the same cancellation signal as the
// runners and feed, since it still needs to observe them mid-shutdown.
// =============================================================================

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::feed::MarketFeed;
use crate::runner::PhaseBoard;
use crate::strategy_state::Phase;

pub struct HealthReporter {
    feed: Arc<MarketFeed>,
    phase_board: PhaseBoard,
    interval: std::time::Duration,
    total_strategies: usize,
    cancel: CancellationToken,
}

impl HealthReporter {
    pub fn new(
        feed: Arc<MarketFeed>,
        phase_board: PhaseBoard,
        interval: std::time::Duration,
        total_strategies: usize,
    ) -> Self {
        Self {
            feed,
            phase_board,
            interval,
            total_strategies,
            cancel: CancellationToken::new(),
        }
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let reporter = self.clone();
        tokio::spawn(async move { reporter.run().await })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn run(&self) {
        let mut interval = tokio::time::interval(self.interval);
        let mut last_failed_count = self.failed_count();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => self.report(&mut last_failed_count),
            }
        }
    }

    fn failed_count(&self) -> usize {
        self.phase_board
            .read()
            .values()
            .filter(|p| **p == Phase::Failed)
            .count()
    }

    fn report(&self, last_failed_count: &mut usize) {
        let snapshot = self.feed.snapshot();
        let board = self.phase_board.read();

        let active_strategies = board.values().filter(|p| **p == Phase::Open).count();
        let non_terminal = board.values().filter(|p| !p.is_terminal()).count();
        let failed_count = board.values().filter(|p| **p == Phase::Failed).count();
        drop(board);

        let new_failures = failed_count > *last_failed_count;
        *last_failed_count = failed_count;

        let degraded = (!snapshot.active && non_terminal > 0) || new_failures;
        let status = if degraded { "degraded" } else { "healthy" };

        info!(
            status,
            active_strategies,
            total_strategies = self.total_strategies,
            market_feed_active = snapshot.active,
            dropped_ticks_total = snapshot.dropped_ticks_total,
            prices = ?snapshot.prices,
            "health"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::runner::new_phase_board;
    use crate::types::Instrument;
    use rust_decimal::Decimal;

    fn feed() -> Arc<MarketFeed> {
        let clock: Arc<dyn crate::clock::Clock> = Arc::new(SystemClock::new(chrono_tz::UTC));
        Arc::new(MarketFeed::new(
            Decimal::ZERO,
            std::time::Duration::from_secs(1),
            clock,
            CancellationToken::new(),
        ))
    }

    #[test]
    fn degraded_when_feed_inactive_with_open_strategies() {
        let feed = feed();
        let _sub = feed.subscribe(&Instrument::from("X"), Decimal::from(1), 4);
        let board = new_phase_board();
        board.write().insert("s1".to_string(), Phase::Open);

        let reporter = HealthReporter::new(feed, board, std::time::Duration::from_secs(30), 1);
        let mut last_failed = 0;
        // feed never started -> inactive, one non-terminal strategy -> degraded.
        reporter.report(&mut last_failed);
    }

    #[test]
    fn failed_count_increase_is_detected() {
        let feed = feed();
        let board = new_phase_board();
        board.write().insert("s1".to_string(), Phase::Open);
        let reporter = HealthReporter::new(feed, board.clone(), std::time::Duration::from_secs(30), 1);

        let mut last_failed = reporter.failed_count();
        assert_eq!(last_failed, 0);

        board.write().insert("s1".to_string(), Phase::Failed);
        let failed_now = reporter.failed_count();
        assert!(failed_now > last_failed);
        last_failed = failed_now;
        assert_eq!(last_failed, 1);
    }
}
