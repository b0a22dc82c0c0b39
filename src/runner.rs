// =============================================================================
// Strategy Runner — per-strategy task driving the lifecycle state machine
// =============================================================================
//
// One task per strategy. Owns its `StrategyState` exclusively; no other
// component mutates it. The main loop suspends only on "next tick from my
// subscription" or "shutdown requested" — never polls a flag.
//
// Priority on a single OPEN tick: risk > exit predicate > continue. Any
// panic or logic error during tick processing is caught here and converts
// the strategy to FAILED with exit_reason ERROR; nothing a single strategy
// does can bring down the feed, the orchestrator, or a sibling runner.
// =============================================================================

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::clock::Clock;
use crate::evaluator::Environment;
use crate::feed::Subscription;
use crate::risk::{self, RiskOutcome, RiskPosition};
use crate::strategy_def::StrategyDefinition;
use crate::strategy_state::{ExitReason, Phase, StrategyState};
use crate::types::Tick;

/// Shared board of each strategy's current phase, published by its runner
/// and read (never written) by the health reporter. The one piece of
/// cross-runner shared state permitted by the concurrency model.
pub type PhaseBoard = Arc<RwLock<HashMap<String, Phase>>>;

pub fn new_phase_board() -> PhaseBoard {
    Arc::new(RwLock::new(HashMap::new()))
}

/// Run one strategy to completion. Returns its final `StrategyState` once
/// a terminal phase is reached (including via shutdown), for the
/// orchestrator to fold into the summary after the join barrier.
pub async fn run(
    def: StrategyDefinition,
    subscription: Subscription,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    phase_board: PhaseBoard,
) -> StrategyState {
    let mut state = StrategyState::new(def.strategy_id.clone());
    info!(
        strategy_id = %def.strategy_id,
        instrument = %def.instrument,
        "strategy_started"
    );
    publish_phase(&phase_board, &state);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                handle_shutdown(&mut state, &def, clock.now());
                publish_phase(&phase_board, &state);
                break;
            }

            tick = subscription.recv() => {
                if let Err(reason) = process_tick_isolated(&mut state, &def, &tick, clock.as_ref()) {
                    error!(
                        strategy_id = %def.strategy_id,
                        message = %reason,
                        "error"
                    );
                    state.fail(ExitReason::Error);
                }
                publish_phase(&phase_board, &state);
                if state.phase.is_terminal() {
                    break;
                }
            }
        }
    }

    state
}

fn publish_phase(board: &PhaseBoard, state: &StrategyState) {
    board.write().insert(state.strategy_id.clone(), state.phase);
}

/// Processes one tick, catching any panic raised by predicate evaluation
/// or arithmetic so it never escapes this task.
fn process_tick_isolated(
    state: &mut StrategyState,
    def: &StrategyDefinition,
    tick: &Tick,
    clock: &dyn Clock,
) -> Result<(), String> {
    std::panic::catch_unwind(AssertUnwindSafe(|| process_tick(state, def, tick, clock)))
        .map_err(|payload| describe_panic(&payload))
}

fn describe_panic(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic during tick processing".to_string()
    }
}

fn process_tick(state: &mut StrategyState, def: &StrategyDefinition, tick: &Tick, clock: &dyn Clock) {
    let env = Environment {
        price: tick.price,
        time: clock.minutes_since_midnight(tick.ts),
    };

    match state.phase {
        Phase::Created => {
            if def.entry_condition.eval(env) {
                state.open(tick.price, tick.ts);
                info!(
                    strategy_id = %def.strategy_id,
                    price = %tick.price,
                    "entry"
                );
            }
        }
        Phase::Open => {
            state.last_price = Some(tick.price);

            let risk_position = RiskPosition {
                entry_price: state
                    .entry_price
                    .expect("OPEN strategy must have an entry_price"),
                quantity: def.quantity,
                max_loss: def.max_loss,
                max_profit: def.max_profit,
            };

            let reason = match risk::check(risk_position, tick.price) {
                RiskOutcome::StopLoss => Some(ExitReason::StopLoss),
                RiskOutcome::TargetHit => Some(ExitReason::TargetHit),
                RiskOutcome::None => {
                    if def.exit_condition.eval(env) {
                        Some(ExitReason::ExitCondition)
                    } else {
                        None
                    }
                }
            };

            if let Some(reason) = reason {
                state.exit(tick.price, tick.ts, reason, def.quantity, false);
                info!(
                    strategy_id = %def.strategy_id,
                    price = %tick.price,
                    reason = %reason,
                    "exit"
                );
            }
        }
        Phase::Closed | Phase::ForceClosed | Phase::Failed => {
            // Terminal — the runner loop breaks before a further tick is
            // processed. Reachable only if the loop body above changes;
            // kept as a no-op rather than a debug_assert so a stray tick
            // delivered after a terminal transition is never a panic.
        }
    }
}

fn handle_shutdown(state: &mut StrategyState, def: &StrategyDefinition, at: DateTime<Utc>) {
    match state.phase {
        Phase::Created => state.close_without_entry(),
        Phase::Open => {
            let last_price = state
                .last_price
                .expect("OPEN strategy must have observed at least one tick");
            state.exit(last_price, at, ExitReason::MarketClose, def.quantity, true);
            info!(
                strategy_id = %def.strategy_id,
                price = %last_price,
                reason = %ExitReason::MarketClose,
                "exit"
            );
        }
        Phase::Closed | Phase::ForceClosed | Phase::Failed => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::evaluator::parse;
    use crate::types::Instrument;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn def(entry: &str, exit: &str, quantity: u64, max_loss: &str, max_profit: &str) -> StrategyDefinition {
        StrategyDefinition {
            strategy_id: "s1".to_string(),
            instrument: Instrument::from("X"),
            entry_condition: parse(entry).unwrap(),
            exit_condition: parse(exit).unwrap(),
            quantity,
            max_loss: Decimal::from_str(max_loss).unwrap(),
            max_profit: Decimal::from_str(max_profit).unwrap(),
        }
    }

    fn tick(price: &str, minute: i64) -> Tick {
        Tick::new(
            Instrument::from("X"),
            Decimal::from_str(price).unwrap(),
            Utc.with_ymd_and_hms(2026, 7, 27, 0, 0, 0).unwrap() + chrono::Duration::minutes(minute),
        )
    }

    #[test]
    fn entry_then_stop_loss_matches_spec_scenario_1() {
        let d = def("price > 100", "price < 50", 10, "200", "1000");
        let clock = FixedClock::new(chrono_tz::UTC, Utc::now());
        let mut state = StrategyState::new(d.strategy_id.clone());

        for (price, expected_phase) in [
            ("99", Phase::Created),
            ("101", Phase::Open),
            ("101", Phase::Open),
            ("80", Phase::Closed),
        ] {
            process_tick(&mut state, &d, &tick(price, 0), &clock);
            assert_eq!(state.phase, expected_phase, "after price {price}");
        }

        assert_eq!(state.exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(state.realized_pnl, Some(Decimal::from_str("-210").unwrap()));
    }

    #[test]
    fn target_hit_wins_over_exit_predicate_matches_spec_scenario_2() {
        let d = def("price > 100", "time >= 15:20", 1, "1000", "50");
        let clock = FixedClock::new(chrono_tz::UTC, Utc::now());
        let mut state = StrategyState::new(d.strategy_id.clone());

        process_tick(&mut state, &d, &tick("100", 10 * 60), &clock);
        assert_eq!(state.phase, Phase::Created);
        process_tick(&mut state, &d, &tick("101", 10 * 60), &clock);
        assert_eq!(state.phase, Phase::Open);
        process_tick(&mut state, &d, &tick("160", 10 * 60), &clock);

        assert_eq!(state.phase, Phase::Closed);
        assert_eq!(state.exit_reason, Some(ExitReason::TargetHit));
    }

    #[test]
    fn market_close_uses_last_observed_price_when_open_matches_spec_scenario_3() {
        let d = def("price > 100", "price < 0", 1, "10000", "10000");
        let clock = FixedClock::new(chrono_tz::UTC, Utc::now());
        let mut state = StrategyState::new(d.strategy_id.clone());

        process_tick(&mut state, &d, &tick("200", 0), &clock);
        process_tick(&mut state, &d, &tick("210", 0), &clock); // still no exit
        assert_eq!(state.phase, Phase::Open);

        handle_shutdown(&mut state, &d, Utc::now());
        assert_eq!(state.phase, Phase::ForceClosed);
        assert_eq!(state.exit_price, Some(Decimal::from_str("210").unwrap()));
        assert_eq!(state.exit_reason, Some(ExitReason::MarketClose));
    }

    #[test]
    fn shutdown_before_entry_closes_without_opening() {
        let d = def("price > 100000", "price < 0", 1, "10", "10");
        let mut state = StrategyState::new(d.strategy_id.clone());
        handle_shutdown(&mut state, &d, Utc::now());
        assert_eq!(state.phase, Phase::Closed);
        assert!(state.entry_price.is_none());
    }

    #[test]
    fn time_boundary_is_exact_matches_spec_scenario_6() {
        let predicate = parse("time >= 15:20").unwrap();
        assert!(predicate.eval(Environment { price: Decimal::ZERO, time: 15 * 60 + 20 }));
        assert!(!predicate.eval(Environment { price: Decimal::ZERO, time: 15 * 60 + 19 }));
    }

    #[test]
    fn a_panicking_tick_fails_that_strategy_without_poisoning_a_sibling_matches_spec_scenario_4() {
        // quantity::MAX makes the P&L multiplication in risk::check overflow
        // Decimal's range once the position is open, the way an arithmetic
        // bug in one strategy's runtime behaves in practice. Its sibling
        // runs the identical tick stream through its own isolated state and
        // is unaffected.
        let failing = def("price > 100", "price < 0", u64::MAX, "1", "1");
        let sibling = def("price > 100", "price < 0", 1, "1000", "100000000000000000000000000");
        let clock = FixedClock::new(chrono_tz::UTC, Utc::now());

        let mut failing_state = StrategyState::new(failing.strategy_id.clone());
        let mut sibling_state = StrategyState::new(sibling.strategy_id.clone());

        for price in ["99", "101", "200000000000000000000"] {
            let t = tick(price, 0);
            let result = process_tick_isolated(&mut failing_state, &failing, &t, &clock);
            if result.is_err() {
                failing_state.fail(ExitReason::Error);
            }
            process_tick_isolated(&mut sibling_state, &sibling, &t, &clock).unwrap();
        }

        assert_eq!(failing_state.phase, Phase::Failed);
        assert_eq!(failing_state.exit_reason, Some(ExitReason::Error));
        assert_eq!(sibling_state.phase, Phase::Open);
    }
}
