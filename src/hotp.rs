use crate::{
    check_digits,
    uri_helper::{self, otp_to_uri, OtpType, OtpUriInput},
    Otp, OtpCode, OtpError, OtpHashAlgorithm, SecretEncoding, Truncation,
};

#[derive(Clone, PartialEq)]
pub struct Hotp {
    pub(crate) secret: String,
    pub(crate) algorithm: OtpHashAlgorithm,
    pub(crate) encoding: SecretEncoding,
    pub(crate) truncation: Truncation,
    // How many digits to generate
    pub(crate) digits: u32,
    // The internal counter, used to generate the URI
    pub(crate) counter: u64,
}

impl std::fmt::Debug for Hotp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hotp")
            .field("secret", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("encoding", &self.encoding)
            .field("truncation", &self.truncation)
            .field("digits", &self.digits)
            .field("counter", &self.counter)
            .finish()
    }
}

impl Otp for Hotp {
    fn to_uri(&self, user: &str, issuer: Option<&str>) -> Result<String, OtpError> {
        otp_to_uri(OtpUriInput::Hotp(self), user, issuer)
    }

    fn from_uri(uri: &str) -> Result<Self, OtpError> {
        let parsed = uri_helper::otp_from_uri(uri, OtpType::Hotp)?;
        let counter = parsed.counter.ok_or(OtpError::UriMissingHotpCounter)?;

        let mut hotp = Hotp::new(parsed.secret, parsed.algorithm);
        hotp.with_encoding(SecretEncoding::Base32)
            .with_truncation(Truncation::Dynamic)
            .with_digits(parsed.digits)
            .with_counter(counter);

        Ok(hotp)
    }
}

impl Hotp {
    /// Creates the config for the [HMAC-based One-time Password Algorithm](http://en.wikipedia.org/wiki/HMAC-based_One-time_Password_Algorithm)
    /// (HOTP) from a secret whose UTF-8 bytes are used as the HMAC key.
    ///
    /// Obs.: This method defaults to a 6-digit code and the fixed-window truncation.
    pub fn new(secret: String, algorithm: OtpHashAlgorithm) -> Self {
        Self {
            secret,
            algorithm,
            encoding: SecretEncoding::Raw,
            truncation: Truncation::FixedWindow,
            digits: 6,
            counter: 0,
        }
    }

    ///  Sets the number of digits to generate
    pub fn with_digits(&mut self, digits: u32) -> &mut Self {
        self.digits = digits;

        self
    }

    ///  Sets the internal counter
    pub fn with_counter(&mut self, counter: u64) -> &mut Self {
        self.counter = counter;

        self
    }

    ///  Sets how the secret is turned into key bytes
    pub fn with_encoding(&mut self, encoding: SecretEncoding) -> &mut Self {
        self.encoding = encoding;

        self
    }

    ///  Sets where the code is read from in the digest
    pub fn with_truncation(&mut self, truncation: Truncation) -> &mut Self {
        self.truncation = truncation;

        self
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Generates a HOTP from the provided counter
    /// truncated to the specified number of digits
    pub fn generate(&self, counter: u64) -> Result<OtpCode, OtpError> {
        check_digits(self.digits)?;

        let decoded = Self::decode_secret(self.secret.as_str(), self.encoding)?;
        let digest = Self::calc_digest(decoded.as_slice(), self.algorithm, counter)?;

        let code = Self::encode_digest_truncated(digest.as_ref(), self.digits, self.truncation)?;

        Ok(OtpCode {
            code,
            digits: self.digits,
        })
    }

    /// Generates a HOTP from the provided counter
    /// truncated to the specified number of digits
    ///
    /// Also updates the internal counter
    pub fn generate_and_update_counter(&mut self, counter: u64) -> Result<OtpCode, OtpError> {
        self.with_counter(counter);
        self.generate(counter)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::{hotp::Hotp, Otp, OtpHashAlgorithm, SecretEncoding, Truncation};

    /// RFC4226 appendix D
    #[rstest]
    #[case(0, 755224)]
    #[case(1, 287082)]
    #[case(2, 359152)]
    #[case(3, 969429)]
    #[case(4, 338314)]
    #[case(5, 254676)]
    #[case(6, 287922)]
    #[case(7, 162583)]
    #[case(8, 399871)]
    #[case(9, 520489)]
    fn hotp_rfc(#[case] counter: u64, #[case] expected: u32) {
        let mut hotp = Hotp::new(
            "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ".to_string(),
            OtpHashAlgorithm::SHA1,
        );
        hotp.with_encoding(SecretEncoding::Base32)
            .with_truncation(Truncation::Dynamic);

        assert_eq!(hotp.generate(counter).unwrap().integer(), expected);
    }

    #[rstest]
    #[case(0, "240304")]
    #[case(1, "782699")]
    #[case(2, "616004")]
    #[case(3, "314510")]
    fn hotp_fixed_window(#[case] counter: u64, #[case] expected: &str) {
        let hotp = Hotp::new("12345678901234567890".to_string(), OtpHashAlgorithm::SHA1);

        assert_eq!(hotp.generate(counter).unwrap().to_string(), expected);
    }

    #[test]
    fn generate_and_update_counter_moves_counter() {
        let mut hotp = Hotp::new("12345678901234567890".to_string(), OtpHashAlgorithm::SHA1);

        let code = hotp.generate_and_update_counter(3).unwrap();

        assert_eq!(3, hotp.counter());
        assert_eq!("314510", code.to_string());
    }

    #[rstest]
    #[case("sha1", 6, 30,
        "otpauth://hotp/ACME%20Co:john.doe@email.com?secret=HXDMVJECJJWSRB3HWIZR4IFUGFTMXBOZ&issuer=ACME+Co&algorithm=SHA1&digits=6&counter=30")]
    #[case("sha256", 8, 30,
        "otpauth://hotp/ACME%20Co:john.doe@email.com?secret=HXDMVJECJJWSRB3HWIZR4IFUGFTMXBOZ&issuer=ACME+Co&algorithm=SHA256&digits=8&counter=30")]
    fn to_uri_test(
        #[case] hash: OtpHashAlgorithm,
        #[case] digits: u32,
        #[case] counter: u64,
        #[case] expected: &str,
    ) {
        let mut hotp_base = Hotp::new("HXDMVJECJJWSRB3HWIZR4IFUGFTMXBOZ".to_string(), hash);
        hotp_base.with_digits(digits).with_counter(counter);

        let generated_uri = hotp_base
            .to_uri("john.doe@email.com", Some("ACME Co"))
            .unwrap();

        assert_eq!(expected, generated_uri)
    }

    #[rstest]
    #[case("sha1", 6, 30,
        "otpauth://hotp/ACME%20Co:john.doe@email.com?secret=HXDMVJECJJWSRB3HWIZR4IFUGFTMXBOZ&issuer=ACME%20Co&algorithm=SHA1&digits=6&counter=30")]
    #[case("sha512", 6, 10,
        "otpauth://hotp/ACME%20Co:john.doe@email.com?secret=HXDMVJECJJWSRB3HWIZR4IFUGFTMXBOZ&issuer=ACME%20Co&algorithm=SHA512&digits=6&counter=10")]
    fn from_uri_test(
        #[case] hash: OtpHashAlgorithm,
        #[case] digits: u32,
        #[case] counter: u64,
        #[case] input_uri: &str,
    ) {
        let mut expected_hotp = Hotp::new("HXDMVJECJJWSRB3HWIZR4IFUGFTMXBOZ".to_string(), hash);
        expected_hotp
            .with_encoding(SecretEncoding::Base32)
            .with_truncation(Truncation::Dynamic)
            .with_digits(digits)
            .with_counter(counter);

        let generated_hotp = Hotp::from_uri(input_uri).unwrap();

        assert_eq!(expected_hotp, generated_hotp);
        assert_eq!(
            expected_hotp.generate(expected_hotp.counter).unwrap(),
            generated_hotp.generate(generated_hotp.counter).unwrap()
        );
    }

    #[test]
    fn otpauth_link_follows_rfc4226() {
        let hotp = Hotp::from_uri(
            "otpauth://hotp/john?secret=GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ&counter=1",
        )
        .unwrap();

        assert_eq!("287082", hotp.generate(hotp.counter()).unwrap().to_string());
    }

    #[test]
    fn from_uri_requires_counter() {
        let result = Hotp::from_uri("otpauth://hotp/john?secret=HXDMVJECJJWSRB3HWIZR4IFUGFTMXBOZ");

        assert!(matches!(
            result,
            Err(crate::OtpError::UriMissingHotpCounter)
        ));
    }
}
