// =============================================================================
// Error taxonomy
// =============================================================================
//
// Kinds, not type hierarchies. Each is a small hand-rolled enum implementing
// `std::error::Error`, in the style the rest of this engine uses for
// domain errors — no `thiserror`, matching the stack this engine is built
// from. Fatal startup errors are wrapped in `anyhow::Error` at the CLI
// boundary; the others stay local to the component that raises them.
// =============================================================================

use std::fmt;

/// Invalid environment variable, unreadable strategy file, or a strategy
/// object that fails schema validation. Fatal at startup — the process
/// exits nonzero before any task is spawned.
#[derive(Debug)]
pub enum ConfigError {
    Env { name: &'static str, reason: String },
    StrategyFile { path: String, reason: String },
    Strategy { strategy_id: String, reason: String },
    DuplicateStrategyId(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Env { name, reason } => {
                write!(f, "invalid configuration for {name}: {reason}")
            }
            ConfigError::StrategyFile { path, reason } => {
                write!(f, "failed to load strategy file '{path}': {reason}")
            }
            ConfigError::Strategy { strategy_id, reason } => {
                write!(f, "strategy '{strategy_id}' is invalid: {reason}")
            }
            ConfigError::DuplicateStrategyId(id) => {
                write!(f, "duplicate strategy_id '{id}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// An exception during runner operation: a panic caught at the task
/// boundary, or an internal logic error (e.g. arithmetic overflow building
/// a P&L). Caught at the runner boundary, transitions the strategy to
/// FAILED, logged, never propagates to the orchestrator.
#[derive(Debug)]
pub struct RuntimeStrategyError {
    pub strategy_id: String,
    pub reason: String,
}

impl fmt::Display for RuntimeStrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "strategy '{}' failed at runtime: {}",
            self.strategy_id, self.reason
        )
    }
}

impl std::error::Error for RuntimeStrategyError {}

/// An exception in the feed task for one instrument. Logged; the
/// orchestrator attempts exactly one restart of that instrument's feed
/// task, and escalates to a degraded shutdown if the restart also fails.
#[derive(Debug)]
pub struct FeedError {
    pub instrument: String,
    pub reason: String,
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "market feed for '{}' failed: {}",
            self.instrument, self.reason
        )
    }
}

impl std::error::Error for FeedError {}

/// A runner did not complete within the shutdown grace period. Logged; the
/// strategy is recorded ABANDONED in the summary. The process still exits
/// 0 — an abandoned runner is not a process-level failure.
#[derive(Debug)]
pub struct ShutdownTimeout {
    pub strategy_id: String,
    pub grace_secs: u64,
}

impl fmt::Display for ShutdownTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "strategy '{}' did not finish within the {}s shutdown grace period",
            self.strategy_id, self.grace_secs
        )
    }
}

impl std::error::Error for ShutdownTimeout {}
