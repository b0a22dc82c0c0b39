// =============================================================================
// Risk Monitor — per-tick stop-loss / target-hit check
// =============================================================================
//
// Pure function, no interior state: given an open position's entry price and
// quantity plus a fresh tick, decides whether a risk-exit condition fires.
// Checked on every tick while a strategy is OPEN, before its exit predicate.
//
// STOP_LOSS is evaluated before TARGET_HIT so that a tick straddling both
// thresholds (a strategy with an inverted or overlapping configuration)
// always protects capital first.
// =============================================================================

use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskOutcome {
    None,
    StopLoss,
    TargetHit,
}

/// The subset of an open position's state the risk check needs.
#[derive(Debug, Clone, Copy)]
pub struct RiskPosition {
    pub entry_price: Decimal,
    pub quantity: u64,
    pub max_loss: Decimal,
    pub max_profit: Decimal,
}

/// `pnl = (price - entry_price) * quantity`.
pub fn unrealized_pnl(entry_price: Decimal, quantity: u64, price: Decimal) -> Decimal {
    (price - entry_price) * Decimal::from(quantity)
}

pub fn check(position: RiskPosition, price: Decimal) -> RiskOutcome {
    let pnl = unrealized_pnl(position.entry_price, position.quantity, price);

    if pnl <= -position.max_loss {
        RiskOutcome::StopLoss
    } else if pnl >= position.max_profit {
        RiskOutcome::TargetHit
    } else {
        RiskOutcome::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn pos(entry: &str, qty: u64, max_loss: &str, max_profit: &str) -> RiskPosition {
        RiskPosition {
            entry_price: Decimal::from_str(entry).unwrap(),
            quantity: qty,
            max_loss: Decimal::from_str(max_loss).unwrap(),
            max_profit: Decimal::from_str(max_profit).unwrap(),
        }
    }

    #[test]
    fn stop_loss_fires_when_pnl_at_or_below_negative_max_loss() {
        let p = pos("101", 10, "200", "1000");
        assert_eq!(check(p, Decimal::from_str("80").unwrap()), RiskOutcome::StopLoss);
        assert_eq!(
            unrealized_pnl(p.entry_price, p.quantity, Decimal::from_str("80").unwrap()),
            Decimal::from_str("-210").unwrap()
        );
    }

    #[test]
    fn target_hit_fires_when_pnl_at_or_above_max_profit() {
        let p = pos("100", 1, "1000", "50");
        assert_eq!(check(p, Decimal::from_str("160").unwrap()), RiskOutcome::TargetHit);
    }

    #[test]
    fn stop_loss_takes_precedence_when_both_straddle() {
        // Pathological config: max_loss and max_profit both trip on the
        // same tick. Stop-loss must win.
        let p = pos("100", 1, "5", "5");
        assert_eq!(check(p, Decimal::from_str("95").unwrap()), RiskOutcome::StopLoss);
    }

    #[test]
    fn none_when_within_bounds() {
        let p = pos("100", 10, "200", "1000");
        assert_eq!(check(p, Decimal::from_str("105").unwrap()), RiskOutcome::None);
    }
}
