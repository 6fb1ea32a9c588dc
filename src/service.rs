use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    clock::Clock,
    totp::{OtpParameters, Totp},
    uri_helper::{self, OtpType},
    OtpCode, OtpError,
};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpDetails {
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub digits: Option<u32>,
    #[serde(default)]
    pub period: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IconCollection {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IconDetails {
    #[serde(default)]
    pub selected: Option<String>,
    pub icon_collection: IconCollection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct OrderDetails {
    pub position: u32,
}

/// One secret-bearing service, in the shape of the decrypted vault JSON.
#[derive(Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub name: String,
    pub secret: String,
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default, rename = "serviceTypeID")]
    pub service_type_id: Option<String>,
    #[serde(default)]
    pub otp: OtpDetails,
    #[serde(default)]
    pub order: OrderDetails,
    #[serde(default)]
    pub icon: Option<IconDetails>,
    #[serde(default)]
    pub group_id: Option<String>,
}

impl std::fmt::Debug for ServiceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRecord")
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .field("otp", &self.otp)
            .field("order", &self.order)
            .field("icon", &self.icon)
            .finish_non_exhaustive()
    }
}

impl ServiceRecord {
    /// The account shown under the service name.
    pub fn account_label(&self) -> Option<&str> {
        self.otp
            .account
            .as_deref()
            .or(self.otp.label.as_deref())
            .filter(|label| !label.is_empty())
    }

    pub fn icon_reference(&self) -> Option<&str> {
        self.icon.as_ref().map(|icon| icon.icon_collection.id.as_str())
    }

    /// Parameters for this service: the explicit `otp` fields win,
    /// then the hash named in the otpauth link, then `defaults`.
    pub fn parameters(&self, defaults: &OtpParameters) -> OtpParameters {
        let mut params = *defaults;

        if let Some(link) = self.otp.link.as_deref() {
            match uri_helper::otp_from_uri(link, OtpType::Totp) {
                Ok(parsed) => params.algorithm = parsed.algorithm,
                Err(e) => log::debug!("Ignoring the otp link of {}: {e}", self.name),
            }
        }

        if let Some(digits) = self.otp.digits {
            params.digits = digits;
        }

        if let Some(period) = self.otp.period {
            params.period = period;
        }

        params
    }

    pub fn totp(&self, defaults: &OtpParameters) -> Totp {
        Totp::from_parameters(self.secret.clone(), self.parameters(defaults))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Could not read the services from {1}")]
    Io(#[source] std::io::Error, PathBuf),
    #[error("Could not parse the services")]
    Json(#[source] serde_json::Error),
}

/// Whatever hands out the list of services.
pub trait ServiceSource {
    fn list_services(&self) -> Result<Vec<ServiceRecord>, ServiceError>;
}

/// Parses a JSON array of services, ordered by their `order.position`.
pub fn parse_services(json: &str) -> Result<Vec<ServiceRecord>, ServiceError> {
    let mut services: Vec<ServiceRecord> =
        serde_json::from_str(json).map_err(ServiceError::Json)?;
    services.sort_by_key(|service| service.order.position);

    Ok(services)
}

/// Services stored as a decrypted JSON file.
#[derive(Debug, Clone)]
pub struct JsonServiceSource {
    path: PathBuf,
}

impl JsonServiceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ServiceSource for JsonServiceSource {
    fn list_services(&self) -> Result<Vec<ServiceRecord>, ServiceError> {
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| ServiceError::Io(e, self.path.clone()))?;

        let services = parse_services(&raw)?;
        log::info!("Loaded {} services from {}", services.len(), self.path.display());

        Ok(services)
    }
}

/// Computes the code `delta_steps` periods away from the current one.
///
/// This is the one entry point callers outside the crate need, whether
/// they live in-process or behind an IPC boundary.
pub fn compute_code_at_offset(
    secret: &str,
    params: &OtpParameters,
    delta_steps: i64,
    clock: &dyn Clock,
) -> Result<OtpCode, OtpError> {
    let now = clock.now()?;

    Totp::from_parameters(secret.to_string(), *params).generate_at_offset(now.as_secs(), delta_steps)
}
