pub mod clock;
pub mod config;
pub mod display;
pub mod hotp;
pub mod scheduler;
pub mod service;
pub mod totp;
pub(crate) mod uri_helper;

use core::num;
use std::{fmt::Display, str::FromStr};

use hmac::{digest::KeyInit, Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("Secret decode error")]
    SecretDecode(data_encoding::DecodeError),
    #[error("HMAC primitive unavailable: {0}")]
    CryptoUnavailable(hmac::digest::InvalidLength),
    #[error("Invalid digest")]
    InvalidDigest(Vec<u8>),
    #[error("Invalid hashing algorithm, found {0}. Expected one of: SHA1, SHA256 or SHA512")]
    InvalidHashingAlgorithm(String),
    #[error("Invalid secret encoding, found {0}. Expected one of: raw or base32")]
    InvalidSecretEncoding(String),
    #[error("Invalid truncation, found {0}. Expected one of: fixed-window or dynamic")]
    InvalidTruncation(String),
    #[error("The period must be at least one second")]
    InvalidPeriod,
    #[error("Invalid digit count {0}. Expected a value between 1 and 9")]
    InvalidDigits(u32),
    #[error("Counter {counter} offset by {delta} steps is negative")]
    CounterUnderflow { counter: u64, delta: i64 },
    #[error("The system clock is set before the UNIX epoch")]
    ClockBeforeEpoch,
    #[error("The provided URI is not from valid, found {0}. Expected: {1}")]
    InvalidUriType(String, String),
    #[error("Could not parse the URI")]
    UriParseError(url::ParseError),
    #[error("Could not retrieve the secret from the URI")]
    UriMissingSecret,
    #[error("Could not retrieve the counter from the URI")]
    UriMissingHotpCounter,
    #[error("Could not parse an integer. Failed parsing: {1}")]
    IntegerParseError(num::ParseIntError, String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum OtpHashAlgorithm {
    #[default]
    SHA1,
    SHA256,
    SHA512,
}

impl Display for OtpHashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SHA1 => write!(f, "SHA1"),
            Self::SHA256 => write!(f, "SHA256"),
            Self::SHA512 => write!(f, "SHA512"),
        }
    }
}

impl FromStr for OtpHashAlgorithm {
    type Err = OtpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_uppercase().replace('-', "");

        match normalized.as_str() {
            "SHA1" => Ok(Self::SHA1),
            "SHA256" => Ok(Self::SHA256),
            "SHA512" => Ok(Self::SHA512),
            _ => Err(OtpError::InvalidHashingAlgorithm(s.to_string())),
        }
    }
}

impl TryFrom<String> for OtpHashAlgorithm {
    type Error = OtpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OtpHashAlgorithm> for String {
    fn from(value: OtpHashAlgorithm) -> Self {
        value.to_string()
    }
}

/// How a secret string is turned into HMAC key bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum SecretEncoding {
    /// The UTF-8 bytes of the secret, used as-is.
    #[default]
    Raw,
    /// RFC4648 base32 without padding, as found in `otpauth://` links.
    Base32,
}

impl Display for SecretEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Base32 => write!(f, "base32"),
        }
    }
}

impl FromStr for SecretEncoding {
    type Err = OtpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" | "utf8" | "utf-8" => Ok(Self::Raw),
            "base32" => Ok(Self::Base32),
            _ => Err(OtpError::InvalidSecretEncoding(s.to_string())),
        }
    }
}

impl TryFrom<String> for SecretEncoding {
    type Error = OtpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SecretEncoding> for String {
    fn from(value: SecretEncoding) -> Self {
        value.to_string()
    }
}

/// Where the 4-byte window is read from the HMAC digest.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum Truncation {
    /// Always the last 4 bytes of the digest. Needed to stay compatible
    /// with the backend that issues the secrets.
    #[default]
    FixedWindow,
    /// RFC4226 dynamic truncation, offset taken from the low nibble
    /// of the last digest byte.
    Dynamic,
}

impl Display for Truncation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FixedWindow => write!(f, "fixed-window"),
            Self::Dynamic => write!(f, "dynamic"),
        }
    }
}

impl FromStr for Truncation {
    type Err = OtpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "fixed-window" | "fixed" => Ok(Self::FixedWindow),
            "dynamic" | "rfc4226" => Ok(Self::Dynamic),
            _ => Err(OtpError::InvalidTruncation(s.to_string())),
        }
    }
}

impl TryFrom<String> for Truncation {
    type Error = OtpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Truncation> for String {
    fn from(value: Truncation) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OtpCode {
    code: u32,
    digits: u32,
}

impl OtpCode {
    pub fn new(code: u32, digits: u32) -> Self {
        Self { code, digits }
    }

    pub fn integer(&self) -> u32 {
        self.code
    }

    pub fn digits(&self) -> u32 {
        self.digits
    }

    /// The zero-padded code split into runs of 3 separated by a space,
    /// e.g. `123 456` or `123 45`.
    pub fn grouped(&self) -> String {
        group_digits(&self.to_string())
    }
}

impl Display for OtpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:0padding$}",
            self.code,
            padding = (self.digits as usize)
        )
    }
}

/// Groups a code string into runs of 3 characters separated by a single space.
/// The last group holds whatever is left (1 to 3 characters).
pub fn group_digits(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();

    chars
        .chunks(3)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

pub trait Otp {
    /// Converts a secret into the key bytes fed to the HMAC
    fn decode_secret(secret: &str, encoding: SecretEncoding) -> Result<Vec<u8>, OtpError> {
        match encoding {
            SecretEncoding::Raw => Ok(secret.as_bytes().to_vec()),
            SecretEncoding::Base32 => data_encoding::BASE32_NOPAD
                .decode(secret.trim_end_matches('=').as_bytes())
                .map_err(OtpError::SecretDecode),
        }
    }

    /// Calculates the HMAC digest of the big-endian encoded counter.
    fn calc_digest(
        decoded_secret: &[u8],
        algorithm: OtpHashAlgorithm,
        counter: u64,
    ) -> Result<Vec<u8>, OtpError> {
        let data = counter.to_be_bytes();

        match algorithm {
            OtpHashAlgorithm::SHA1 => sign::<Hmac<Sha1>>(decoded_secret, &data),
            OtpHashAlgorithm::SHA256 => sign::<Hmac<Sha256>>(decoded_secret, &data),
            OtpHashAlgorithm::SHA512 => sign::<Hmac<Sha512>>(decoded_secret, &data),
        }
    }

    /// Encodes the HMAC digest into a truncated integer.
    fn encode_digest_truncated(
        digest: &[u8],
        target_digits_count: u32,
        truncation: Truncation,
    ) -> Result<u32, OtpError> {
        let offset = match truncation {
            Truncation::FixedWindow => digest.len().checked_sub(4),
            Truncation::Dynamic => digest.last().map(|x| (*x & 0xf) as usize),
        }
        .ok_or_else(|| OtpError::InvalidDigest(Vec::from(digest)))?;

        // Gets the 4 bytes that will compose the code
        let code_bytes: [u8; 4] = match digest.get(offset..offset + 4) {
            Some(window) => [window[0], window[1], window[2], window[3]],
            None => return Err(OtpError::InvalidDigest(Vec::from(digest))),
        };

        let code = u32::from_be_bytes(code_bytes);
        let truncation_factor = 10u32
            .checked_pow(target_digits_count)
            .ok_or(OtpError::InvalidDigits(target_digits_count))?;

        Ok((code & 0x7fffffff) % truncation_factor)
    }

    fn to_uri(&self, user: &str, issuer: Option<&str>) -> Result<String, OtpError>;
    fn from_uri(uri: &str) -> Result<Self, OtpError>
    where
        Self: std::marker::Sized;
}

fn sign<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, OtpError> {
    let mut mac = <M as Mac>::new_from_slice(key).map_err(OtpError::CryptoUnavailable)?;
    mac.update(data);

    Ok(mac.finalize().into_bytes().to_vec())
}

/// Rejects parameters the engine cannot compute a code for.
pub(crate) fn check_digits(digits: u32) -> Result<(), OtpError> {
    if (1..=9).contains(&digits) {
        Ok(())
    } else {
        Err(OtpError::InvalidDigits(digits))
    }
}
