use std::{borrow::Cow, str::FromStr};

use crate::{hotp::Hotp, totp::Totp, OtpError, OtpHashAlgorithm};

const TOTP_TYPE: &str = "totp";
const HOTP_TYPE: &str = "hotp";

const URI_SECRET_QUERY: &str = "secret";
const URI_ISSUER_QUERY: &str = "issuer";
const URI_HASH_QUERY: &str = "algorithm";
const URI_PERIOD_QUERY: &str = "period";
const URI_COUNTER_QUERY: &str = "counter";
const URI_DIGITS_QUERY: &str = "digits";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OtpType {
    Totp,
    Hotp,
}

impl OtpType {
    fn as_str(&self) -> &'static str {
        match self {
            OtpType::Totp => TOTP_TYPE,
            OtpType::Hotp => HOTP_TYPE,
        }
    }
}

/// The parameters carried by an `otpauth://` link.
/// Fields the link leaves out hold the usual defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOtpUri {
    pub secret: String,
    pub algorithm: OtpHashAlgorithm,
    pub digits: u32,
    pub period: Option<u64>,
    pub counter: Option<u64>,
}

pub enum OtpUriInput<'a> {
    Totp(&'a Totp),
    Hotp(&'a Hotp),
}

fn parse_number<T: FromStr<Err = std::num::ParseIntError>>(
    value: &str,
    field: &str,
) -> Result<T, OtpError> {
    T::from_str(value).map_err(|e| OtpError::IntegerParseError(e, field.into()))
}

pub fn otp_from_uri(uri: &str, otp_type: OtpType) -> Result<ParsedOtpUri, OtpError> {
    let uri = url::Url::parse(uri).map_err(OtpError::UriParseError)?;

    let expected = otp_type.as_str();
    let domain = uri.domain();
    if domain.is_none() || domain.is_some_and(|d| !d.eq_ignore_ascii_case(expected)) {
        return Err(OtpError::InvalidUriType(
            domain.unwrap_or("None").into(),
            expected.into(),
        ));
    }

    let mut parsed = ParsedOtpUri {
        secret: String::new(),
        algorithm: OtpHashAlgorithm::default(),
        digits: 6,
        period: None,
        counter: None,
    };

    for (key, value) in uri.query_pairs() {
        match key {
            Cow::Borrowed(URI_SECRET_QUERY) => parsed.secret = value.to_string(),
            Cow::Borrowed(URI_HASH_QUERY) => {
                parsed.algorithm = OtpHashAlgorithm::from_str(value.as_ref())?
            }
            Cow::Borrowed(URI_PERIOD_QUERY) => {
                parsed.period = Some(parse_number(value.as_ref(), URI_PERIOD_QUERY)?)
            }
            Cow::Borrowed(URI_DIGITS_QUERY) => {
                parsed.digits = parse_number(value.as_ref(), URI_DIGITS_QUERY)?
            }
            Cow::Borrowed(URI_COUNTER_QUERY) => {
                parsed.counter = Some(parse_number(value.as_ref(), URI_COUNTER_QUERY)?)
            }
            _ => (),
        }
    }

    if parsed.secret.is_empty() {
        return Err(OtpError::UriMissingSecret);
    }

    Ok(parsed)
}

pub fn otp_to_uri(
    input: OtpUriInput,
    user: &str,
    issuer: Option<&str>,
) -> Result<String, OtpError> {
    let otp_type = match input {
        OtpUriInput::Totp(_) => OtpType::Totp,
        OtpUriInput::Hotp(_) => OtpType::Hotp,
    };

    let mut uri = url::Url::parse(&format!("otpauth://{}/", otp_type.as_str()))
        .map_err(OtpError::UriParseError)?;

    let issuer = issuer.filter(|i| !i.is_empty());
    match issuer {
        Some(issuer) => uri.set_path(&format!("{issuer}:{user}")),
        None => uri.set_path(user),
    }

    let (secret, algorithm, digits, trailing) = match input {
        OtpUriInput::Totp(inner) => (
            inner.secret.as_str(),
            inner.params.algorithm,
            inner.params.digits,
            (URI_PERIOD_QUERY, inner.params.period),
        ),
        OtpUriInput::Hotp(inner) => (
            inner.secret.as_str(),
            inner.algorithm,
            inner.digits,
            (URI_COUNTER_QUERY, inner.counter),
        ),
    };

    {
        let mut query_params = uri.query_pairs_mut();

        query_params.append_pair(URI_SECRET_QUERY, secret);

        if let Some(issuer) = issuer {
            query_params.append_pair(URI_ISSUER_QUERY, issuer);
        }

        query_params
            .append_pair(URI_HASH_QUERY, &algorithm.to_string())
            .append_pair(URI_DIGITS_QUERY, &digits.to_string())
            .append_pair(trailing.0, &trailing.1.to_string());
    }

    Ok(uri.to_string())
}
