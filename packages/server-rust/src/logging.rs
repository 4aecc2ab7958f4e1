//! Tracing subscriber installation.

use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LogFormat};

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.default_directives`.
///
/// # Errors
///
/// Returns an error if the directives are invalid or a global subscriber is
/// already installed.
pub fn init_tracing(config: &LogConfig) -> anyhow::Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.is_empty() => EnvFilter::try_new(directives)?,
        _ => EnvFilter::try_new(&config.default_directives)?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.format {
        LogFormat::Plain => builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("tracing init failed: {e}")),
        LogFormat::Json => builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("tracing init failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_fails() {
        let config = LogConfig::default();
        // The first call may fail if another test installed a subscriber already.
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
