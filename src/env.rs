//! Runtime environment detection.
//!
//! Single source of truth for the runtime environment (test, development,
//! production), read from the `STRACK_ENV` environment variable.
//!
//! # Usage
//!
//! ```rust
//! use strack::env::Environment;
//!
//! if Environment::current().is_test() {
//!     // Keep config under the repo's tmp/ directory
//! }
//! ```
//!
//! # Environment Variable
//!
//! Set `STRACK_ENV` to one of:
//! - `test` - Test mode (config kept under the repo's `tmp/`)
//! - `development` or `dev` - Development mode (debug logging by default)
//! - (anything else or unset) - Production mode

/// Runtime environment for the CLI.
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
    /// Detect current environment from `STRACK_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(std::env::var("STRACK_ENV").ok().as_deref())
    }

    /// Map a `STRACK_ENV` value to an environment.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
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

    /// Default `env_logger` filter for this environment.
    #[must_use]
    pub fn default_log_filter(self) -> &'static str {
        match self {
            Self::Development => "debug",
            Self::Production | Self::Test => "info",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Convenience function to check if running in test mode.
///
/// Equivalent to `Environment::current().is_test()`.
#[must_use]
pub fn is_test_mode() -> bool {
    Environment::current().is_test()
}
