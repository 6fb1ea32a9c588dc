use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    check_digits, totp::OtpParameters, OtpHashAlgorithm, SecretEncoding, Truncation,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not read the settings file")]
    Io(#[from] std::io::Error),
    #[error("Could not parse the settings")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Period used when a service does not name one
    pub default_period: u64,
    /// Digit count used when a service does not name one
    pub default_digits: u32,
    pub algorithm: OtpHashAlgorithm,
    pub secret_encoding: SecretEncoding,
    pub truncation: Truncation,
    pub tick_interval_ms: u64,
    /// Show codes as `123 456`
    pub group_codes: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_period: 30,
            default_digits: 6,
            algorithm: OtpHashAlgorithm::SHA1,
            secret_encoding: SecretEncoding::Raw,
            truncation: Truncation::FixedWindow,
            tick_interval_ms: 1000,
            group_codes: true,
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;

        Self::from_toml_str(&raw)
    }

    /// Like [`Settings::load`], falling back to the defaults when the file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        Self::load(path)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(raw)?;
        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_period == 0 {
            return Err(ConfigError::Invalid(
                "default_period",
                "must be at least one second".into(),
            ));
        }

        check_digits(self.default_digits)
            .map_err(|e| ConfigError::Invalid("default_digits", e.to_string()))?;

        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms",
                "must be at least one millisecond".into(),
            ));
        }

        Ok(())
    }

    pub fn otp_parameters(&self) -> OtpParameters {
        OtpParameters {
            period: self.default_period,
            digits: self.default_digits,
            algorithm: self.algorithm,
            encoding: self.secret_encoding,
            truncation: self.truncation,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
