// =============================================================================
// Configuration — environment-variable loading and validation
// =============================================================================
//
// Every tunable the engine needs lives here, loaded once at startup via
// `EngineConfig::from_env`. Each field has a sensible default so the engine
// can run with zero configuration beyond `STRATEGIES_FILE`. Following this
// stack's convention of small `default_x()` helpers rather than a single
// monolithic parse function.
// =============================================================================

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use rust_decimal::Decimal;

use crate::errors::ConfigError;

fn default_tick_interval() -> Duration {
    Duration::from_secs_f64(1.0)
}

fn default_volatility() -> Decimal {
    Decimal::new(2, 3) // 0.002
}

fn default_health_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_subscription_capacity() -> usize {
    64
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_timezone() -> Tz {
    chrono_tz::UTC
}

/// `HH:MM` wall-clock time of day, used for `MARKET_OPEN`/`MARKET_CLOSE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn minutes_since_midnight(self) -> i64 {
        i64::from(self.hour) * 60 + i64::from(self.minute)
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| format!("expected HH:MM, got '{s}'"))?;
        let hour: u32 = h.parse().map_err(|_| format!("invalid hour in '{s}'"))?;
        let minute: u32 = m.parse().map_err(|_| format!("invalid minute in '{s}'"))?;
        if hour > 23 || minute > 59 {
            return Err(format!("time of day out of range: '{s}'"));
        }
        Ok(TimeOfDay { hour, minute })
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub market_open: TimeOfDay,
    pub market_close: TimeOfDay,
    pub tick_interval: Duration,
    pub price_volatility: Decimal,
    pub strategies_file: PathBuf,
    pub log_level: String,
    pub health_interval: Duration,
    pub subscription_capacity: usize,
    pub shutdown_grace: Duration,
    pub timezone: Tz,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let market_open = parse_env("MARKET_OPEN", TimeOfDay { hour: 9, minute: 15 })?;
        let market_close = parse_env("MARKET_CLOSE", TimeOfDay { hour: 15, minute: 30 })?;
        let tick_interval = parse_env_with(
            "TICK_INTERVAL",
            default_tick_interval(),
            |s| s.parse::<f64>().map(Duration::from_secs_f64).map_err(|e| e.to_string()),
        )?;
        let price_volatility = parse_env("PRICE_VOLATILITY", default_volatility())?;
        let strategies_file = std::env::var("STRATEGIES_FILE")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::Env {
                name: "STRATEGIES_FILE",
                reason: "must be set to the path of the strategy file".to_string(),
            })?;
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());
        let health_interval = parse_env_with(
            "HEALTH_INTERVAL",
            default_health_interval(),
            |s| s.parse::<u64>().map(Duration::from_secs).map_err(|e| e.to_string()),
        )?;
        let subscription_capacity = parse_env("SUBSCRIPTION_CAPACITY", default_subscription_capacity())?;
        let shutdown_grace = parse_env_with(
            "SHUTDOWN_GRACE",
            default_shutdown_grace(),
            |s| s.parse::<u64>().map(Duration::from_secs).map_err(|e| e.to_string()),
        )?;
        let timezone = parse_env_with("MARKET_TIMEZONE", default_timezone(), |s| {
            s.parse::<Tz>().map_err(|e| e.to_string())
        })?;

        Ok(Self {
            market_open,
            market_close,
            tick_interval,
            price_volatility,
            strategies_file,
            log_level,
            health_interval,
            subscription_capacity,
            shutdown_grace,
            timezone,
        })
    }
}

fn parse_env<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_env_with(name, default, |s| s.parse::<T>().map_err(|e| e.to_string()))
}

fn parse_env_with<T>(
    name: &'static str,
    default: T,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => parse(&raw).map_err(|reason| ConfigError::Env { name, reason }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_of_day_parses_hh_mm() {
        let t: TimeOfDay = "15:20".parse().unwrap();
        assert_eq!(t.hour, 15);
        assert_eq!(t.minute, 20);
        assert_eq!(t.minutes_since_midnight(), 15 * 60 + 20);
    }

    #[test]
    fn time_of_day_rejects_out_of_range() {
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("10:60".parse::<TimeOfDay>().is_err());
    }
}
