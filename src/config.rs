//! Launcher settings loaded via `ortho-config`, and the configuration error
//! shared by every pre-submission stage.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default `aws` CLI binary name.
pub const DEFAULT_AWS_BIN: &str = "aws";

/// Default fixed polling interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// User data above this size is known to stall EC2 spot requests silently.
pub const DEFAULT_USER_DATA_WARN_BYTES: u64 = 16 * 1024;

/// Launcher settings derived from defaults, configuration files and
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SPOTLAUNCH")]
pub struct LauncherConfig {
    /// Path or name of the `aws` CLI binary used to reach EC2.
    #[ortho_config(default = DEFAULT_AWS_BIN.to_owned())]
    pub aws_bin: String,
    /// Seconds between two status polls. Must be at least one.
    #[ortho_config(default = DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval_secs: u64,
    /// Size in bytes above which user data triggers a stall warning.
    #[ortho_config(default = DEFAULT_USER_DATA_WARN_BYTES)]
    pub user_data_warn_bytes: u64,
}

impl LauncherConfig {
    /// Returns the built-in defaults without consulting any source.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            aws_bin: DEFAULT_AWS_BIN.to_owned(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            user_data_warn_bytes: DEFAULT_USER_DATA_WARN_BYTES,
        }
    }

    /// Loads settings without attempting to parse CLI arguments. Values merge
    /// defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails, or the validation
    /// error when a merged value is unusable.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        let config = Self::load_from_iter([std::ffi::OsString::from("spotlaunch")])
            .map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the `aws` binary is blank and
    /// [`ConfigError::InvalidField`] when the poll interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aws_bin.trim().is_empty() {
            return Err(ConfigError::MissingField(String::from(
                "missing aws CLI binary: set SPOTLAUNCH_AWS_BIN or add aws_bin to spotlaunch.toml",
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidField {
                field: String::from("poll_interval_secs"),
                message: String::from("must be at least 1 second"),
            });
        }
        Ok(())
    }

    /// Returns the poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Errors raised before any provider call is made.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field is present but unusable.
    #[error("invalid {field}: {message}")]
    InvalidField {
        /// Name of the offending field.
        field: String,
        /// Why the value was rejected.
        message: String,
    },
    /// Surfaces document and loader parse failures.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when a configuration file cannot be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: String,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when none of the region sources yields a value.
    #[error(
        "no region resolved: set Placement.AvailabilityZone in the launch spec, add \
         'region = ...' under [default] in the AWS config file, or set AWS_DEFAULT_REGION"
    )]
    NoRegionResolved,
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn default_settings_validate() {
        let config = LauncherConfig::builtin();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
    }

    #[rstest]
    fn blank_aws_bin_is_actionable() {
        let config = LauncherConfig {
            aws_bin: String::from("  "),
            ..LauncherConfig::builtin()
        };
        let err = config.validate().expect_err("blank binary should fail");
        let ConfigError::MissingField(message) = err else {
            panic!("expected MissingField, got {err:?}");
        };
        assert!(message.contains("SPOTLAUNCH_AWS_BIN"), "message: {message}");
    }

    #[rstest]
    fn zero_poll_interval_is_rejected() {
        let config = LauncherConfig {
            poll_interval_secs: 0,
            ..LauncherConfig::builtin()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField { ref field, .. }) if field == "poll_interval_secs"
        ));
    }
}
