//! Runtime environment detection.
//!
//! `SPILLWATCH_ENV` is the single source of truth for whether the relay runs
//! under test, in development or in production:
//!
//! - `test` - test mode (config directory redirected into the crate's `tmp/`)
//! - `development` or `dev` - development mode (debug logging by default)
//! - anything else or unset - production

/// Name of the environment variable selecting the runtime environment.
pub const ENV_VAR: &str = "SPILLWATCH_ENV";

/// Runtime environment for the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment.
    Test,
}

impl Environment {
    /// Detect the current environment from `SPILLWATCH_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(std::env::var(ENV_VAR).ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            Some("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }

    /// Default log filter when `RUST_LOG` is unset.
    #[must_use]
    pub fn default_log_filter(self) -> &'static str {
        match self {
            Self::Development => "debug",
            Self::Production | Self::Test => "info",
        }
    }
}

/// Convenience check for test mode.
#[must_use]
pub fn is_test_mode() -> bool {
    Environment::current().is_test()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_values() {
        assert_eq!(Environment::parse(Some("test")), Environment::Test);
        assert_eq!(Environment::parse(Some("development")), Environment::Development);
        assert_eq!(Environment::parse(Some("dev")), Environment::Development);
    }

    #[test]
    fn test_parse_defaults_to_production() {
        assert_eq!(Environment::parse(None), Environment::Production);
        assert_eq!(Environment::parse(Some("")), Environment::Production);
        assert_eq!(Environment::parse(Some("TEST")), Environment::Production);
    }

    #[test]
    fn test_default_log_filter() {
        assert_eq!(Environment::Production.default_log_filter(), "info");
        assert_eq!(Environment::Development.default_log_filter(), "debug");
    }
}
