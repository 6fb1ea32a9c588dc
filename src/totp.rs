use std::time::Duration;

use crate::{
    check_digits,
    uri_helper::{self, otp_to_uri, OtpType, OtpUriInput},
    Otp, OtpCode, OtpError, OtpHashAlgorithm, SecretEncoding, Truncation,
};

/// Everything besides the secret that goes into a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpParameters {
    /// Length of a time step in seconds
    pub period: u64,
    /// How many digits to generate
    pub digits: u32,
    pub algorithm: OtpHashAlgorithm,
    pub encoding: SecretEncoding,
    pub truncation: Truncation,
}

impl Default for OtpParameters {
    fn default() -> Self {
        Self {
            period: 30,
            digits: 6,
            algorithm: OtpHashAlgorithm::SHA1,
            encoding: SecretEncoding::Raw,
            truncation: Truncation::FixedWindow,
        }
    }
}

impl OtpParameters {
    pub fn validate(&self) -> Result<(), OtpError> {
        if self.period == 0 {
            return Err(OtpError::InvalidPeriod);
        }

        check_digits(self.digits)
    }
}

#[derive(Clone, PartialEq)]
pub struct Totp {
    pub(crate) secret: String,
    pub(crate) params: OtpParameters,
}

impl std::fmt::Debug for Totp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Totp")
            .field("secret", &"<redacted>")
            .field("params", &self.params)
            .finish()
    }
}

impl Otp for Totp {
    fn to_uri(&self, user: &str, issuer: Option<&str>) -> Result<String, OtpError> {
        otp_to_uri(OtpUriInput::Totp(self), user, issuer)
    }

    fn from_uri(uri: &str) -> Result<Self, OtpError> {
        let parsed = uri_helper::otp_from_uri(uri, OtpType::Totp)?;

        // otpauth links carry RFC secrets: base32 keys, dynamic truncation
        let mut totp = Totp::new(parsed.secret);
        totp.with_algorithm(parsed.algorithm)
            .with_encoding(SecretEncoding::Base32)
            .with_truncation(Truncation::Dynamic)
            .with_digits(parsed.digits)
            .with_period(parsed.period.unwrap_or(30));

        Ok(totp)
    }
}

impl Totp {
    /// Creates the config for the [Time-based One-time Password Algorithm](http://en.wikipedia.org/wiki/Time-based_One-time_Password_Algorithm)
    /// (TOTP) from a secret whose UTF-8 bytes are used as the HMAC key.
    ///
    /// Obs.: This method defaults to the SHA1 hash, a 6-digit code, a period of 30 seconds
    /// and the fixed-window truncation
    pub fn new(secret: String) -> Self {
        Self::from_parameters(secret, OtpParameters::default())
    }

    pub fn from_parameters(secret: String, params: OtpParameters) -> Self {
        Self { secret, params }
    }

    pub fn parameters(&self) -> &OtpParameters {
        &self.params
    }

    ///  Sets hashing algorithm
    pub fn with_algorithm(&mut self, algorithm: OtpHashAlgorithm) -> &mut Self {
        self.params.algorithm = algorithm;

        self
    }

    ///  Sets the period in seconds
    pub fn with_period(&mut self, period: u64) -> &mut Self {
        self.params.period = period;

        self
    }

    ///  Sets the number of digits to generate
    pub fn with_digits(&mut self, digits: u32) -> &mut Self {
        self.params.digits = digits;

        self
    }

    ///  Sets how the secret is turned into key bytes
    pub fn with_encoding(&mut self, encoding: SecretEncoding) -> &mut Self {
        self.params.encoding = encoding;

        self
    }

    ///  Sets where the code is read from in the digest
    pub fn with_truncation(&mut self, truncation: Truncation) -> &mut Self {
        self.params.truncation = truncation;

        self
    }

    /// The time step index for the given seconds since the UNIX epoch,
    /// shifted by `delta_steps` whole periods
    pub fn counter(&self, seconds_since_epoch: u64, delta_steps: i64) -> Result<u64, OtpError> {
        if self.params.period == 0 {
            return Err(OtpError::InvalidPeriod);
        }

        let counter = seconds_since_epoch / self.params.period;
        let shifted = if delta_steps >= 0 {
            counter.checked_add(delta_steps.unsigned_abs())
        } else {
            counter.checked_sub(delta_steps.unsigned_abs())
        };

        shifted.ok_or(OtpError::CounterUnderflow {
            counter,
            delta: delta_steps,
        })
    }

    /// Generates a Totp from the provided seconds since the UNIX epoch
    /// truncated to the specified number of digits
    pub fn generate(&self, seconds_since_epoch: u64) -> Result<OtpCode, OtpError> {
        self.generate_at_offset(seconds_since_epoch, 0)
    }

    /// Generates the code of the time step `delta_steps` periods away from
    /// the one containing `seconds_since_epoch`.
    /// `-1`, `0` and `1` give the previous, current and next code.
    pub fn generate_at_offset(
        &self,
        seconds_since_epoch: u64,
        delta_steps: i64,
    ) -> Result<OtpCode, OtpError> {
        self.params.validate()?;
        let counter = self.counter(seconds_since_epoch, delta_steps)?;

        self.generate_for_counter(counter)
    }

    pub(crate) fn generate_for_counter(&self, counter: u64) -> Result<OtpCode, OtpError> {
        let decoded = Self::decode_secret(self.secret.as_str(), self.params.encoding)?;
        let digest = Self::calc_digest(decoded.as_slice(), self.params.algorithm, counter)?;

        let code =
            Self::encode_digest_truncated(digest.as_ref(), self.params.digits, self.params.truncation)?;

        Ok(OtpCode {
            code,
            digits: self.params.digits,
        })
    }

    /// Seconds until the current code expires
    pub fn remaining_seconds(&self, seconds_since_epoch: u64) -> u64 {
        countdown(Duration::from_secs(seconds_since_epoch), self.params.period)
    }

    /// Validates a code in the given window
    /// Returning the step offset it was found at or None if the code is invalid
    ///
    /// Obs.: the RFC recommends a window of 1 frame in the future and 1 in the past,
    /// but this function accepts any window you would like
    pub fn validate_window(
        &self,
        otp_to_validate: u32,
        seconds_since_epoch: u64,
        past_frames: u64,
        future_frames: u64,
    ) -> Result<Option<i64>, OtpError> {
        self.params.validate()?;

        // Nothing exists before the first step or after the last one
        let current = seconds_since_epoch / self.params.period;
        let past = i64::try_from(past_frames.min(current)).unwrap_or(i64::MAX);
        let future = i64::try_from(future_frames.min(u64::MAX - current)).unwrap_or(i64::MAX);

        let deltas = std::iter::once(0)
            .chain((1..=past).map(|i| -i))
            .chain(1..=future);

        for delta in deltas {
            let counter = self.counter(seconds_since_epoch, delta)?;
            log::trace!("validating against counter {counter}");

            if self.generate_for_counter(counter)?.integer() == otp_to_validate {
                return Ok(Some(delta));
            }
        }

        Ok(None)
    }
}

/// Seconds left in the current period: `period - (round(epoch) mod period)`.
///
/// Always in `1..=period`, dropping by one every second and jumping back
/// to `period` right at a step boundary. A zero period yields zero.
pub fn countdown(since_epoch: Duration, period: u64) -> u64 {
    if period == 0 {
        return 0;
    }

    let rounded = (since_epoch.as_millis() + 500) / 1000;

    period - (rounded % period as u128) as u64
}
