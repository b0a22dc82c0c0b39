// =============================================================================
// Aurora Strategy Engine — Main Entry Point
// =============================================================================
//
// Single entry point, no subcommands.
//
// Exit codes:
//   0 — normal shutdown (including abandoned runners past their grace period)
//   1 — configuration error (bad env var, bad strategy file)
//   2 — unhandled error in the orchestrator
// =============================================================================

mod clock;
mod config;
mod errors;
mod evaluator;
mod feed;
mod health;
mod orchestrator;
mod risk;
mod runner;
mod strategy_def;
mod strategy_state;
mod types;

use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;
use crate::orchestrator::Orchestrator;

#[tokio::main]
async fn main() {
    let _ = dotenv::dotenv();

    let config = match EngineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            init_logging("info");
            error!(error = %e, "configuration error");
            std::process::exit(1);
        }
    };

    init_logging(&config.log_level);

    let strategies = match strategy_def::load_strategies(&config.strategies_file) {
        Ok(s) if s.is_empty() => {
            error!("strategy file contains no strategies");
            std::process::exit(1);
        }
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "configuration error");
            std::process::exit(1);
        }
    };

    tracing::info!(
        strategy_count = strategies.len(),
        market_open = %config.market_open,
        market_close = %config.market_close,
        "engine starting"
    );

    let orchestrator = Orchestrator::new(config, strategies);

    match orchestrator.run().await {
        Ok(_summary) => std::process::exit(0),
        Err(e) => {
            error!(error = %e, "unhandled orchestrator error");
            std::process::exit(2);
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
