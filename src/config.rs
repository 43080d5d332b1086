//! Credentials and run-time options, read once at startup.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::VcrMode;

/// Subscription id used when `AZURE_SUBSCRIPTION_ID` is not set.
pub const PLACEHOLDER_SUBSCRIPTION_ID: &str = "11111111-1111-1111-1111-111111111111";

const CI_IDENTITY: &str = "11111111-1111-1111-1111-111111111111";
const CI_SECRET: &str = "SECRET";

pub const DEFAULT_CASSETTE_DIR: &str = "tests/cassettes";

/// Service principal identity, validated.
#[derive(Clone, PartialEq, Eq)]
pub struct ServicePrincipal {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for ServicePrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePrincipal")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Everything the example and the test harness read from the environment.
///
/// Identity values stay optional here; [`Settings::service_principal`] is the
/// fail-fast check, called before any request is sent.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub subscription_id: String,
    /// Resource manager endpoint override; triggers metadata discovery.
    pub arm_endpoint: Option<String>,
    /// Fixed wait between long-running-operation polls, overriding
    /// `Retry-After`.
    pub retry_timeout: Option<Duration>,
    pub vcr_mode: VcrMode,
    pub cassette_dir: String,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("subscription_id", &self.subscription_id)
            .field("arm_endpoint", &self.arm_endpoint)
            .field("retry_timeout", &self.retry_timeout)
            .field("vcr_mode", &self.vcr_mode)
            .field("cassette_dir", &self.cassette_dir)
            .finish()
    }
}

impl Settings {
    /// Read from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through an arbitrary lookup, so tests can inject fixtures
    /// without touching the process environment.
    ///
    /// When `CI` is set every identity is replaced by a fixed dummy value and
    /// polling waits default to zero, so recorded cassettes replay as-is.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let ci = get("CI").is_some();

        let retry_timeout = match get("RETRY_TIMEOUT") {
            Some(raw) => Some(Duration::from_secs(raw.trim().parse().map_err(|_| {
                Error::Configuration(format!("RETRY_TIMEOUT must be a number of seconds, got '{raw}'"))
            })?)),
            None if ci => Some(Duration::ZERO),
            None => None,
        };

        let vcr_mode = match get("VCR_MODE") {
            Some(raw) => raw.parse()?,
            None => VcrMode::RecordOnce,
        };

        let settings = if ci {
            Self {
                tenant_id: Some(CI_IDENTITY.to_string()),
                client_id: Some(CI_IDENTITY.to_string()),
                client_secret: Some(CI_SECRET.to_string()),
                subscription_id: CI_IDENTITY.to_string(),
                arm_endpoint: get("ARM_ENDPOINT"),
                retry_timeout,
                vcr_mode,
                cassette_dir: get("VCR_CASSETTE_DIR").unwrap_or_else(|| DEFAULT_CASSETTE_DIR.to_string()),
            }
        } else {
            Self {
                tenant_id: get("AZURE_TENANT_ID"),
                client_id: get("AZURE_CLIENT_ID"),
                client_secret: get("AZURE_CLIENT_SECRET"),
                subscription_id: get("AZURE_SUBSCRIPTION_ID")
                    .unwrap_or_else(|| PLACEHOLDER_SUBSCRIPTION_ID.to_string()),
                arm_endpoint: get("ARM_ENDPOINT"),
                retry_timeout,
                vcr_mode,
                cassette_dir: get("VCR_CASSETTE_DIR").unwrap_or_else(|| DEFAULT_CASSETTE_DIR.to_string()),
            }
        };

        log::debug!("Loaded settings: {settings:?}");
        Ok(settings)
    }

    /// Validated identity, checked in tenant, client, secret order.
    pub fn service_principal(&self) -> Result<ServicePrincipal> {
        let tenant_id = self
            .tenant_id
            .clone()
            .ok_or_else(|| Error::Configuration("Tenant id cannot be empty (AZURE_TENANT_ID)".to_string()))?;
        let client_id = self
            .client_id
            .clone()
            .ok_or_else(|| Error::Configuration("Client id cannot be empty (AZURE_CLIENT_ID)".to_string()))?;
        let client_secret = self.client_secret.clone().ok_or_else(|| {
            Error::Configuration("Client secret cannot be empty (AZURE_CLIENT_SECRET)".to_string())
        })?;

        Ok(ServicePrincipal {
            tenant_id,
            client_id,
            client_secret,
        })
    }
}

impl FromStr for VcrMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" | "record_once" | "record-once" => Ok(Self::RecordOnce),
            "replay" | "replay_only" | "replay-only" | "none" => Ok(Self::ReplayOnly),
            "bypass" | "skip" | "off" => Ok(Self::Bypass),
            other => Err(Error::Configuration(format!(
                "unknown VCR mode '{other}', expected once, replay or bypass"
            ))),
        }
    }
}
