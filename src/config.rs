//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::model::RetentionPolicy;

/// Tool configuration derived from environment variables, configuration
/// files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "YC")]
pub struct AppConfig {
    /// OAuth token exchanged for a short-lived IAM token at startup. This
    /// value is required.
    pub oauth_token: String,
    /// Instances the snapshot workflows operate on.
    #[ortho_config(default = Vec::new())]
    pub instance_ids: Vec<String>,
    /// Instances the watchdog supervises. May overlap with
    /// `instance_ids`.
    #[ortho_config(default = Vec::new())]
    pub target_ids: Vec<String>,
    /// Snapshot lifetime in days; snapshots at least this old are deleted.
    #[ortho_config(default = 365)]
    pub lifetime_days: u32,
    /// Seconds between watchdog checks of each target.
    #[ortho_config(default = 10)]
    pub watchdog_delay_seconds: u64,
}

impl AppConfig {
    /// Loads configuration without attempting to parse CLI arguments, since
    /// the binaries reserve the command line for their own flags. Values
    /// merge defaults, configuration files, and environment variables in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("snapwarden")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the OAuth token is empty
    /// and [`ConfigError::InvalidValue`] when the retention lifetime is
    /// zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.oauth_token.trim().is_empty() {
            return Err(ConfigError::MissingField(String::from(
                "missing OAuth token: set YC_OAUTH_TOKEN or add oauth_token to the config file",
            )));
        }
        if self.lifetime_days == 0 {
            return Err(ConfigError::InvalidValue(String::from(
                "lifetime_days must be greater than zero",
            )));
        }
        Ok(())
    }

    /// Configured instances with blank entries removed.
    #[must_use]
    pub fn instances(&self) -> Vec<String> {
        Self::non_blank(&self.instance_ids)
    }

    /// Configured watch targets with blank entries removed.
    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        Self::non_blank(&self.target_ids)
    }

    /// Retention policy derived from `lifetime_days`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the lifetime is zero.
    pub fn retention_policy(&self) -> Result<RetentionPolicy, ConfigError> {
        RetentionPolicy::new(self.lifetime_days).ok_or_else(|| {
            ConfigError::InvalidValue(String::from("lifetime_days must be greater than zero"))
        })
    }

    /// Delay between watchdog checks.
    #[must_use]
    pub const fn watchdog_delay(&self) -> Duration {
        Duration::from_secs(self.watchdog_delay_seconds)
    }

    fn non_blank(values: &[String]) -> Vec<String> {
        values
            .iter()
            .filter(|value| !value.trim().is_empty())
            .cloned()
            .collect()
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field is present but semantically invalid.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn base_config() -> AppConfig {
        AppConfig {
            oauth_token: String::from("token"),
            instance_ids: vec![String::from("i-1"), String::new(), String::from("i-2")],
            target_ids: vec![String::from(" ")],
            lifetime_days: 365,
            watchdog_delay_seconds: 10,
        }
    }

    #[rstest]
    fn validate_accepts_complete_config(base_config: AppConfig) {
        assert!(base_config.validate().is_ok());
    }

    #[rstest]
    fn validate_rejects_blank_token(mut base_config: AppConfig) {
        base_config.oauth_token = String::from("  ");
        let err = base_config.validate().expect_err("token is required");
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[rstest]
    fn validate_rejects_zero_lifetime(mut base_config: AppConfig) {
        base_config.lifetime_days = 0;
        let err = base_config.validate().expect_err("zero lifetime invalid");
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[rstest]
    fn blank_ids_are_filtered_out(base_config: AppConfig) {
        assert_eq!(
            base_config.instances(),
            vec![String::from("i-1"), String::from("i-2")]
        );
        assert!(base_config.targets().is_empty());
    }

    #[rstest]
    fn retention_policy_carries_the_configured_lifetime(base_config: AppConfig) {
        let policy = base_config.retention_policy().expect("valid lifetime");
        assert_eq!(policy.lifetime_days(), 365);
        assert_eq!(base_config.watchdog_delay(), Duration::from_secs(10));
    }
}
