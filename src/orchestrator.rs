// =============================================================================
// Orchestrator — wires feed, strategies, clock and shutdown together
// =============================================================================
//
// Startup sequence (strict order):
//   1. Construct Clock, Feed.
//   2. For each strategy: create its Subscription (predicates were already
//      parsed and validated when the strategy file was loaded).
//   3. Start the Feed.
//   4. Start all Runners.
//   5. Start the Health Reporter.
//   6. Install shutdown triggers (SIGINT/SIGTERM, market-close wall clock).
//
// Shutdown sequence (strict order, idempotent):
//   1. Broadcast the shutdown signal to all Runners and the Feed.
//   2. Wait for Runners with a bounded deadline; late runners are abandoned.
//   3. Stop the Feed.
//   4. Stop the Health Reporter.
//   5. Emit the final summary.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, TimeOfDay};
use crate::errors::ShutdownTimeout;
use crate::evaluator::Atom;
use crate::feed::MarketFeed;
use crate::runner::{self, new_phase_board};
use crate::strategy_def::StrategyDefinition;
use crate::strategy_state::{ExitReason, Phase, StrategyState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SummaryStatus {
    Created,
    Open,
    Closed,
    ForceClosed,
    Failed,
    Abandoned,
}

impl From<Phase> for SummaryStatus {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Created => SummaryStatus::Created,
            Phase::Open => SummaryStatus::Open,
            Phase::Closed => SummaryStatus::Closed,
            Phase::ForceClosed => SummaryStatus::ForceClosed,
            Phase::Failed => SummaryStatus::Failed,
        }
    }
}

impl std::fmt::Display for SummaryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummaryStatus::Created => write!(f, "CREATED"),
            SummaryStatus::Open => write!(f, "OPEN"),
            SummaryStatus::Closed => write!(f, "CLOSED"),
            SummaryStatus::ForceClosed => write!(f, "FORCE_CLOSED"),
            SummaryStatus::Failed => write!(f, "FAILED"),
            SummaryStatus::Abandoned => write!(f, "ABANDONED"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategySummary {
    pub strategy_id: String,
    pub status: SummaryStatus,
    pub entry_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub realized_pnl: Option<Decimal>,
}

impl StrategySummary {
    fn from_state(state: StrategyState) -> Self {
        Self {
            strategy_id: state.strategy_id,
            status: state.phase.into(),
            entry_price: state.entry_price,
            exit_price: state.exit_price,
            exit_reason: state.exit_reason,
            realized_pnl: state.realized_pnl,
        }
    }

    fn abandoned(strategy_id: String) -> Self {
        Self {
            strategy_id,
            status: SummaryStatus::Abandoned,
            entry_price: None,
            exit_price: None,
            exit_reason: None,
            realized_pnl: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShutdownSummary {
    pub strategies: Vec<StrategySummary>,
    pub degraded: bool,
    pub counts_by_status: HashMap<String, u64>,
    pub counts_by_exit_reason: HashMap<String, u64>,
}

impl ShutdownSummary {
    fn build(strategies: Vec<StrategySummary>, degraded: bool) -> Self {
        let mut counts_by_status = HashMap::new();
        let mut counts_by_exit_reason = HashMap::new();
        for s in &strategies {
            *counts_by_status.entry(s.status.to_string()).or_insert(0u64) += 1;
            if let Some(reason) = s.exit_reason {
                *counts_by_exit_reason.entry(reason.to_string()).or_insert(0u64) += 1;
            }
        }
        Self {
            strategies,
            degraded,
            counts_by_status,
            counts_by_exit_reason,
        }
    }
}

pub struct Orchestrator {
    config: EngineConfig,
    strategies: Vec<StrategyDefinition>,
    clock: Arc<dyn Clock>,
    feed: Arc<MarketFeed>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: EngineConfig, strategies: Vec<StrategyDefinition>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.timezone));
        let cancel = CancellationToken::new();
        let feed = Arc::new(MarketFeed::new(
            config.price_volatility,
            config.tick_interval,
            clock.clone(),
            cancel.clone(),
        ));
        Self {
            config,
            strategies,
            clock,
            feed,
            cancel,
        }
    }

    pub async fn run(self) -> anyhow::Result<ShutdownSummary> {
        wait_for_market_open(&self.config, self.clock.as_ref()).await;

        let mut runner_inputs = Vec::with_capacity(self.strategies.len());
        for def in &self.strategies {
            let seed = seed_price_for(def);
            let subscription = self
                .feed
                .subscribe(&def.instrument, seed, self.config.subscription_capacity);
            runner_inputs.push((def.clone(), subscription));
        }

        self.feed.start();

        let phase_board = new_phase_board();
        let mut handles = Vec::with_capacity(runner_inputs.len());
        for (def, subscription) in runner_inputs {
            let strategy_id = def.strategy_id.clone();
            let clock = self.clock.clone();
            let cancel = self.cancel.clone();
            let board = phase_board.clone();
            handles.push((
                strategy_id,
                tokio::spawn(runner::run(def, subscription, clock, cancel, board)),
            ));
        }

        let health = Arc::new(crate::health::HealthReporter::new(
            self.feed.clone(),
            phase_board,
            self.config.health_interval,
            self.strategies.len(),
        ));
        health.spawn();

        let trigger = self.wait_for_shutdown_trigger().await;
        info!(trigger, "shutdown_begin");
        self.cancel.cancel();

        let summary = self.join_and_summarize(handles).await;

        self.feed.stop();
        health.stop();

        info!(
            degraded = summary.degraded,
            counts_by_status = ?summary.counts_by_status,
            counts_by_exit_reason = ?summary.counts_by_exit_reason,
            "shutdown_end"
        );

        Ok(summary)
    }

    async fn wait_for_shutdown_trigger(&self) -> &'static str {
        let close_at = next_occurrence(self.clock.now(), self.config.timezone, self.config.market_close, true);
        let wait = (close_at - self.clock.now()).to_std().unwrap_or(std::time::Duration::ZERO);

        tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = wait_for_sigterm() => "SIGTERM",
            _ = tokio::time::sleep(wait) => "MARKET_CLOSE",
            _ = self.cancel.cancelled() => "FEED_FAILURE",
        }
    }

    async fn join_and_summarize(
        &self,
        handles: Vec<(String, tokio::task::JoinHandle<StrategyState>)>,
    ) -> ShutdownSummary {
        let grace = self.config.shutdown_grace;

        let joins = futures_util::future::join_all(handles.into_iter().map(|(strategy_id, handle)| {
            let abort_handle = handle.abort_handle();
            async move {
                match tokio::time::timeout(grace, handle).await {
                    Ok(Ok(state)) => StrategySummary::from_state(state),
                    Ok(Err(join_error)) => {
                        error!(strategy_id = %strategy_id, error = %join_error, "error");
                        StrategySummary::abandoned(strategy_id)
                    }
                    Err(_elapsed) => {
                        abort_handle.abort();
                        let timeout = ShutdownTimeout {
                            strategy_id: strategy_id.clone(),
                            grace_secs: grace.as_secs(),
                        };
                        warn!(strategy_id = %strategy_id, error = %timeout, "error");
                        StrategySummary::abandoned(strategy_id)
                    }
                }
            }
        }));

        let second_signal = async {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = wait_for_sigterm() => {},
            }
        };

        tokio::pin!(joins);
        tokio::select! {
            strategies = &mut joins => {
                ShutdownSummary::build(strategies, self.feed.is_degraded())
            }
            _ = second_signal => {
                error!("second shutdown signal received, forcing immediate exit");
                std::process::exit(130);
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}

async fn wait_for_market_open(config: &EngineConfig, clock: &dyn Clock) {
    let open_at = next_occurrence(clock.now(), config.timezone, config.market_open, false);
    let now = clock.now();
    if open_at > now {
        let wait = (open_at - now).to_std().unwrap_or(std::time::Duration::ZERO);
        info!(seconds = wait.as_secs(), "waiting for market open");
        tokio::time::sleep(wait).await;
    }
}

/// Next wall-clock instant at which the local time equals `time_of_day`.
/// When `strictly_future` is true (market close), an instant that has
/// already passed today rolls to tomorrow — sessions that straddle local
/// midnight are handled correctly since the comparison is always on the
/// full instant, never time-of-day alone. When false (market open), a
/// `time_of_day` already passed today is returned as-is (the caller treats
/// a non-positive wait as "start immediately").
fn next_occurrence(
    now: DateTime<Utc>,
    tz: chrono_tz::Tz,
    time_of_day: TimeOfDay,
    strictly_future: bool,
) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let today = local_now.date_naive();
    let naive = today
        .and_hms_opt(time_of_day.hour, time_of_day.minute, 0)
        .expect("validated HH:MM is always a valid naive time");

    let mut candidate = match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None => tz.from_utc_datetime(&naive),
    };

    if strictly_future && candidate <= local_now {
        candidate += chrono::Duration::days(1);
    }

    candidate.with_timezone(&Utc)
}

/// Derives a seed price for an instrument from the first numeric literal
/// found in its strategy's entry predicate, falling back to a flat default
/// when the predicate only mentions `time`. The spec leaves the initial
/// price an open question; this engine resolves it by reading the
/// strategy's own entry condition rather than requiring a separate seed
/// table, so a strategy file is self-contained.
fn seed_price_for(def: &StrategyDefinition) -> Decimal {
    first_price_literal(&def.entry_condition)
        .or_else(|| first_price_literal(&def.exit_condition))
        .unwrap_or(Decimal::from(100))
}

fn first_price_literal(predicate: &crate::evaluator::Predicate) -> Option<Decimal> {
    use crate::evaluator::Predicate;
    match predicate {
        Predicate::Cmp { lhs, rhs, .. } => atom_literal(lhs).or_else(|| atom_literal(rhs)),
        Predicate::Logic { lhs, rhs, .. } => first_price_literal(lhs).or_else(|| first_price_literal(rhs)),
    }
}

fn atom_literal(atom: &Atom) -> Option<Decimal> {
    match atom {
        Atom::Number(n) => Some(*n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    #[test]
    fn market_close_rolls_to_next_day_when_already_past() {
        let now = chrono::Utc.with_ymd_and_hms(2026, 7, 27, 16, 0, 0).unwrap();
        let close = TimeOfDay { hour: 15, minute: 30 };
        let next = next_occurrence(now, chrono_tz::UTC, close, true);
        assert_eq!(next.date_naive(), now.date_naive().succ_opt().unwrap());
    }

    #[test]
    fn market_close_same_day_when_still_upcoming() {
        let now = chrono::Utc.with_ymd_and_hms(2026, 7, 27, 9, 0, 0).unwrap();
        let close = TimeOfDay { hour: 15, minute: 30 };
        let next = next_occurrence(now, chrono_tz::UTC, close, true);
        assert_eq!(next.date_naive(), now.date_naive());
    }

    #[test]
    fn seed_price_derives_from_entry_predicate_literal() {
        let def = StrategyDefinition {
            strategy_id: "s1".into(),
            instrument: crate::types::Instrument::from("X"),
            entry_condition: crate::evaluator::parse("price > 100").unwrap(),
            exit_condition: crate::evaluator::parse("price < 50").unwrap(),
            quantity: 1,
            max_loss: Decimal::ONE,
            max_profit: Decimal::ONE,
        };
        assert_eq!(seed_price_for(&def), Decimal::from(100));
    }
}
