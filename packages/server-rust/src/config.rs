//! Bridge configuration types.

use std::time::Duration;

/// Pipeline-wide execution mode for outbound calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Outbound calls block the calling task until answered or timed out.
    Synchronous,
    /// Outbound calls return immediately and resume when the answer arrives.
    #[default]
    Asynchronous,
}

impl ExecutionMode {
    /// The synchronous mode wins when either side asks for it.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        if self == Self::Synchronous || other == Self::Synchronous {
            Self::Synchronous
        } else {
            Self::Asynchronous
        }
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Filter directives used when `RUST_LOG` is unset.
    pub default_directives: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Plain,
            default_directives: "info".to_string(),
        }
    }
}

/// Top-level configuration of the exchange bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Pipeline-wide mode; individual routes may still force synchronous calls.
    pub execution_mode: ExecutionMode,
    /// Timeout for outbound sends whose consumes declaration sets none.
    pub default_send_timeout: Duration,
    /// Maximum number of inbound exchanges dispatched concurrently before load shedding.
    pub max_concurrent_exchanges: u32,
    /// Interval between correlation sweeps.
    pub sweep_interval: Duration,
    /// How long past its deadline an entry may linger before the sweeper times it out.
    pub sweep_grace: Duration,
    /// Subscriber settings applied by `Bridge::init_logging`. Hosts that
    /// install their own subscriber leave it unused.
    pub log: LogConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Asynchronous,
            default_send_timeout: Duration::from_secs(30),
            max_concurrent_exchanges: 1000,
            sweep_interval: Duration::from_secs(1),
            sweep_grace: Duration::from_secs(1),
            log: LogConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_config_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.execution_mode, ExecutionMode::Asynchronous);
        assert_eq!(config.default_send_timeout, Duration::from_secs(30));
        assert_eq!(config.max_concurrent_exchanges, 1000);
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        assert_eq!(config.log.format, LogFormat::Plain);
        assert_eq!(config.log.default_directives, "info");
    }

    #[test]
    fn synchronous_mode_wins() {
        use ExecutionMode::{Asynchronous, Synchronous};
        assert_eq!(Asynchronous.combine(Asynchronous), Asynchronous);
        assert_eq!(Synchronous.combine(Asynchronous), Synchronous);
        assert_eq!(Asynchronous.combine(Synchronous), Synchronous);
    }
}
