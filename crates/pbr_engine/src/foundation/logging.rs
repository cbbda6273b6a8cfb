//! Logging sink setup
//!
//! The engine logs through the `log` facade only. The application creates one
//! [`LoggingContext`] at startup, which installs `env_logger` as the sink and is handed to
//! [`Engine::new`](crate::Engine::new) so the validation messenger can match its
//! severity mask to the configured level.

pub use log::{debug, error, info, trace, warn};

use crate::config::{ConfigError, LoggingConfig};

/// Installed log sink
#[derive(Debug)]
pub struct LoggingContext {
    level: log::LevelFilter,
    installed: bool,
}

impl LoggingContext {
    /// Install `env_logger` with the configured filters. `RUST_LOG` takes precedence when set.
    ///
    /// If another logger is already installed (for example by a test harness) that logger is
    /// kept and the context only records the configured level.
    pub fn init(config: &LoggingConfig) -> Result<Self, ConfigError> {
        let configured = config.level_filter()?;
        let directives = config.filter_directives();

        let env = env_logger::Env::default().default_filter_or(directives);
        let installed = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .is_test(cfg!(test))
            .try_init()
            .is_ok();

        let level = if installed { log::max_level() } else { configured };
        if installed {
            log::debug!("Logging initialized at level {level}");
        }

        Ok(Self { level, installed })
    }

    /// Effective maximum level
    pub const fn level(&self) -> log::LevelFilter {
        self.level
    }

    /// Whether this context installed the global sink
    pub const fn is_installed(&self) -> bool {
        self.installed
    }
}

impl Drop for LoggingContext {
    fn drop(&mut self) {
        log::logger().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_rejected() {
        let config = LoggingConfig {
            level: "verbose".to_string(),
            ..LoggingConfig::default()
        };
        assert!(LoggingContext::init(&config).is_err());
    }

    #[test]
    fn test_second_init_keeps_first_sink() {
        let config = LoggingConfig::default();
        let first = LoggingContext::init(&config).unwrap();
        let second = LoggingContext::init(&config).unwrap();
        assert!(!(first.is_installed() && second.is_installed()));
        assert_ne!(second.level(), log::LevelFilter::Off);
    }
}
