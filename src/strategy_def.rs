// =============================================================================
// Strategy Definition — immutable input loaded from the strategy file
// =============================================================================
//
// The strategy file is a JSON array of strategy objects. Unknown fields are
// rejected; missing required fields are rejected; predicates are parsed
// (fail-fast) before the engine starts a single task.
// =============================================================================

use std::collections::HashSet;
use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use crate::errors::ConfigError;
use crate::evaluator::{self, Predicate};
use crate::types::Instrument;

/// The JSON shape of a single strategy object, before predicate parsing.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStrategy {
    strategy_id: String,
    instrument: String,
    entry_condition: String,
    exit_condition: String,
    quantity: u64,
    max_loss: Decimal,
    max_profit: Decimal,
}

/// A fully validated, immutable strategy definition. Constructed once at
/// startup and shared (read-only) with the strategy's runner.
#[derive(Debug, Clone)]
pub struct StrategyDefinition {
    pub strategy_id: String,
    pub instrument: Instrument,
    pub entry_condition: Predicate,
    pub exit_condition: Predicate,
    pub quantity: u64,
    pub max_loss: Decimal,
    pub max_profit: Decimal,
}

/// Load and validate every strategy in `path`. Fails on the first invalid
/// strategy — this engine fails the whole process rather than silently
/// dropping a malformed strategy.
pub fn load_strategies(path: &Path) -> Result<Vec<StrategyDefinition>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::StrategyFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_strategies(&text).map_err(|reason| ConfigError::StrategyFile {
        path: path.display().to_string(),
        reason,
    })
}

fn parse_strategies(text: &str) -> Result<Vec<StrategyDefinition>, String> {
    let raw: Vec<RawStrategy> =
        serde_json::from_str(text).map_err(|e| format!("invalid strategy file JSON: {e}"))?;

    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());

    for r in raw {
        if !seen_ids.insert(r.strategy_id.clone()) {
            return Err(ConfigError::DuplicateStrategyId(r.strategy_id).to_string());
        }
        let def = validate(r).map_err(|e| e.to_string())?;
        out.push(def);
    }

    Ok(out)
}

fn validate(raw: RawStrategy) -> Result<StrategyDefinition, ConfigError> {
    let strategy_id = raw.strategy_id;

    if strategy_id.trim().is_empty() {
        return Err(ConfigError::Strategy {
            strategy_id: "<empty>".to_string(),
            reason: "strategy_id must not be empty".to_string(),
        });
    }
    if raw.instrument.trim().is_empty() {
        return Err(ConfigError::Strategy {
            strategy_id,
            reason: "instrument must not be empty".to_string(),
        });
    }
    if raw.quantity == 0 {
        return Err(ConfigError::Strategy {
            strategy_id,
            reason: "quantity must be positive".to_string(),
        });
    }
    if raw.max_loss <= Decimal::ZERO {
        return Err(ConfigError::Strategy {
            strategy_id,
            reason: "max_loss must be positive".to_string(),
        });
    }
    if raw.max_profit <= Decimal::ZERO {
        return Err(ConfigError::Strategy {
            strategy_id,
            reason: "max_profit must be positive".to_string(),
        });
    }

    let entry_condition = evaluator::parse(&raw.entry_condition).map_err(|e| ConfigError::Strategy {
        strategy_id: strategy_id.clone(),
        reason: format!("entry_condition: {e}"),
    })?;
    let exit_condition = evaluator::parse(&raw.exit_condition).map_err(|e| ConfigError::Strategy {
        strategy_id: strategy_id.clone(),
        reason: format!("exit_condition: {e}"),
    })?;

    for (label, predicate) in [("entry_condition", &entry_condition), ("exit_condition", &exit_condition)] {
        if predicate.uses_price_equality() {
            warn!(
                strategy_id = %strategy_id,
                field = label,
                "predicate uses `==` on price — decimal equality on a continuously \
                 moving price rarely fires as intended; prefer <= or >="
            );
        }
    }

    Ok(StrategyDefinition {
        strategy_id,
        instrument: Instrument::from(raw.instrument),
        entry_condition,
        exit_condition,
        quantity: raw.quantity,
        max_loss: raw.max_loss,
        max_profit: raw.max_profit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_strategy_array() {
        let json = r#"[
            {
                "strategy_id": "s1",
                "instrument": "X",
                "entry_condition": "price > 100",
                "exit_condition": "price < 50",
                "quantity": 10,
                "max_loss": 200,
                "max_profit": 1000
            }
        ]"#;
        let defs = parse_strategies(json).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].strategy_id, "s1");
        assert_eq!(defs[0].instrument, Instrument::from("X"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let json = r#"[{
            "strategy_id": "s1", "instrument": "X",
            "entry_condition": "price > 100", "exit_condition": "price < 50",
            "quantity": 10, "max_loss": 200, "max_profit": 1000,
            "typo_field": true
        }]"#;
        assert!(parse_strategies(json).is_err());
    }

    #[test]
    fn rejects_duplicate_strategy_ids() {
        let json = r#"[
            {"strategy_id": "s1", "instrument": "X", "entry_condition": "price > 100",
             "exit_condition": "price < 50", "quantity": 1, "max_loss": 1, "max_profit": 1},
            {"strategy_id": "s1", "instrument": "Y", "entry_condition": "price > 100",
             "exit_condition": "price < 50", "quantity": 1, "max_loss": 1, "max_profit": 1}
        ]"#;
        let err = parse_strategies(json).unwrap_err();
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn rejects_malformed_predicate() {
        let json = r#"[{
            "strategy_id": "s1", "instrument": "X",
            "entry_condition": "volume > 100", "exit_condition": "price < 50",
            "quantity": 1, "max_loss": 1, "max_profit": 1
        }]"#;
        assert!(parse_strategies(json).is_err());
    }

    #[test]
    fn rejects_non_positive_quantity() {
        let json = r#"[{
            "strategy_id": "s1", "instrument": "X",
            "entry_condition": "price > 100", "exit_condition": "price < 50",
            "quantity": 0, "max_loss": 1, "max_profit": 1
        }]"#;
        assert!(parse_strategies(json).is_err());
    }
}
