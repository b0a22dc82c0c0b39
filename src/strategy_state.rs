// =============================================================================
// Strategy State — the per-strategy lifecycle state machine
// =============================================================================
//
// Owned exclusively by that strategy's runner; no other component mutates it.
// Transitions only along:
//
//   CREATED -> OPEN -> { CLOSED, FORCE_CLOSED }
//   CREATED -> FAILED
//   OPEN    -> FAILED
//
// Terminal phases (CLOSED, FORCE_CLOSED, FAILED) are absorbing.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Created,
    Open,
    Closed,
    ForceClosed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Closed | Phase::ForceClosed | Phase::Failed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Created => "CREATED",
            Phase::Open => "OPEN",
            Phase::Closed => "CLOSED",
            Phase::ForceClosed => "FORCE_CLOSED",
            Phase::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    ExitCondition,
    StopLoss,
    TargetHit,
    MarketClose,
    Error,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::ExitCondition => "EXIT_CONDITION",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TargetHit => "TARGET_HIT",
            ExitReason::MarketClose => "MARKET_CLOSE",
            ExitReason::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// Mutable per-strategy state. `entry_price`/`entry_time` are defined iff
/// `phase` has ever been OPEN; `realized_pnl` is defined iff `phase` is
/// CLOSED or FORCE_CLOSED.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyState {
    pub strategy_id: String,
    pub phase: Phase,
    pub entry_price: Option<Decimal>,
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    pub last_price: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
}

impl StrategyState {
    pub fn new(strategy_id: String) -> Self {
        Self {
            strategy_id,
            phase: Phase::Created,
            entry_price: None,
            entry_time: None,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            last_price: None,
            realized_pnl: None,
        }
    }

    /// CREATED -> OPEN.
    pub fn open(&mut self, price: Decimal, at: DateTime<Utc>) {
        debug_assert_eq!(self.phase, Phase::Created);
        self.entry_price = Some(price);
        self.entry_time = Some(at);
        self.last_price = Some(price);
        self.phase = Phase::Open;
    }

    /// OPEN -> { CLOSED, FORCE_CLOSED }. `quantity` is the strategy's fixed
    /// position size, supplied by the caller rather than stored here since
    /// it belongs to the (immutable) strategy definition.
    pub fn exit(
        &mut self,
        price: Decimal,
        at: DateTime<Utc>,
        reason: ExitReason,
        quantity: u64,
        forced: bool,
    ) {
        debug_assert_eq!(self.phase, Phase::Open);
        let entry_price = self
            .entry_price
            .expect("exit() called on a strategy that was never opened");
        self.exit_price = Some(price);
        self.exit_time = Some(at);
        self.exit_reason = Some(reason);
        self.realized_pnl = Some((price - entry_price) * Decimal::from(quantity));
        self.phase = if forced {
            Phase::ForceClosed
        } else {
            Phase::Closed
        };
    }

    /// CREATED -> CLOSED, on shutdown before any entry fired. Not a failure
    /// and not force-closed — there was never a position to force-close.
    pub fn close_without_entry(&mut self) {
        debug_assert_eq!(self.phase, Phase::Created);
        self.phase = Phase::Closed;
    }

    /// Any non-terminal phase -> FAILED.
    pub fn fail(&mut self, reason: ExitReason) {
        debug_assert!(!self.phase.is_terminal());
        self.exit_reason = Some(reason);
        self.phase = Phase::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn at(mins: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 27, 0, 0, 0).unwrap() + chrono::Duration::minutes(mins)
    }

    #[test]
    fn full_lifecycle_computes_expected_pnl() {
        let mut s = StrategyState::new("s1".into());
        s.open(Decimal::from_str("101").unwrap(), at(0));
        assert_eq!(s.phase, Phase::Open);
        s.exit(Decimal::from_str("80").unwrap(), at(5), ExitReason::StopLoss, 10, false);
        assert_eq!(s.phase, Phase::Closed);
        assert_eq!(s.realized_pnl, Some(Decimal::from_str("-210").unwrap()));
    }

    #[test]
    fn force_close_is_distinct_terminal_phase() {
        let mut s = StrategyState::new("s1".into());
        s.open(Decimal::from_str("200").unwrap(), at(0));
        s.exit(Decimal::from_str("210").unwrap(), at(10), ExitReason::MarketClose, 1, true);
        assert_eq!(s.phase, Phase::ForceClosed);
        assert!(s.phase.is_terminal());
    }

    #[test]
    fn created_can_close_without_ever_opening() {
        let mut s = StrategyState::new("s1".into());
        s.close_without_entry();
        assert_eq!(s.phase, Phase::Closed);
        assert!(s.entry_price.is_none());
        assert!(s.realized_pnl.is_none());
    }

    #[test]
    fn fail_is_terminal_from_any_non_terminal_phase() {
        let mut s = StrategyState::new("s1".into());
        s.fail(ExitReason::Error);
        assert_eq!(s.phase, Phase::Failed);
        assert_eq!(s.exit_reason, Some(ExitReason::Error));
    }
}
