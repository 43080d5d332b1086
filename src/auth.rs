//! Service principal authentication against the identity endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use http_client::{HttpClient, Request};
use http_types::{Method, Url};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{ServicePrincipal, Settings};
use crate::error::{Error, Result};
use crate::form_data::encode_form_data;
use crate::serializable::insert_header;

pub const DEFAULT_LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com/";
pub const DEFAULT_TOKEN_AUDIENCE: &str = "https://management.core.windows.net/";

/// Where tokens come from and who they are for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDirectorySettings {
    pub authentication_endpoint: String,
    pub token_audience: String,
}

impl Default for ActiveDirectorySettings {
    fn default() -> Self {
        Self {
            authentication_endpoint: DEFAULT_LOGIN_ENDPOINT.to_string(),
            token_audience: DEFAULT_TOKEN_AUDIENCE.to_string(),
        }
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    raw.parse()
        .map_err(|e| Error::Configuration(format!("invalid URL '{raw}': {e}")))
}

/// Fetch `{endpoint}/metadata/endpoints?api-version=1.0` and read the login
/// endpoint and token audience from it. Fields missing from the document keep
/// their public-cloud defaults.
pub async fn discover_active_directory_settings(
    client: &dyn HttpClient,
    endpoint: &str,
) -> Result<ActiveDirectorySettings> {
    let url = parse_url(&format!(
        "{}/metadata/endpoints?api-version=1.0",
        endpoint.trim_end_matches('/')
    ))?;
    log::info!("Discovering identity endpoints from {url}");

    let mut response = client
        .send(Request::new(Method::Get, url))
        .await
        .map_err(Error::from_http)?;
    let status: u16 = response.status().into();
    let body = response
        .body_string()
        .await
        .map_err(|e| Error::Transport(format!("Failed to read metadata response: {e}")))?;

    if status != 200 {
        return Err(Error::Configuration(format!(
            "Getting resource manager metadata endpoints failed ({status}): {body}"
        )));
    }

    let document: Value = serde_json::from_str(&body)?;
    let mut settings = ActiveDirectorySettings::default();
    if let Some(login) = document["authentication"]["loginEndpoint"].as_str() {
        settings.authentication_endpoint = login.to_string();
    }
    if let Some(audience) = document["authentication"]["audiences"][0].as_str() {
        settings.token_audience = audience.to_string();
    }
    log::debug!("Discovered {settings:?}");
    Ok(settings)
}

#[async_trait]
pub trait TokenProvider: Debug + Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// A fixed token, for tests and pre-authenticated callers.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider(pub String);

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl CachedToken {
    /// Returns true if the token is expired or will expire within the grace period.
    fn is_expired(&self, grace_period: Duration) -> bool {
        Utc::now() + grace_period >= self.expires_at
    }
}

/// Client-credentials token provider for a service principal.
#[derive(Debug)]
pub struct ApplicationTokenProvider {
    principal: ServicePrincipal,
    directory: ActiveDirectorySettings,
    client: Arc<dyn HttpClient>,
    cached_token: RwLock<Option<CachedToken>>,
    grace_period: Duration,
}

impl ApplicationTokenProvider {
    /// Fails with [`Error::Configuration`] before any request if the tenant,
    /// client id or client secret is missing.
    pub fn new(
        settings: &Settings,
        directory: ActiveDirectorySettings,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        Ok(Self {
            principal: settings.service_principal()?,
            directory,
            client,
            cached_token: RwLock::new(None),
            grace_period: Duration::minutes(5),
        })
    }

    fn token_url(&self) -> Result<Url> {
        let base = &self.directory.authentication_endpoint;
        let separator = if base.ends_with('/') { "" } else { "/" };
        parse_url(&format!("{base}{separator}{}/oauth2/token", self.principal.tenant_id))
    }

    async fn acquire_token(&self) -> Result<CachedToken> {
        let mut request = Request::new(Method::Post, self.token_url()?);
        request.set_body(encode_form_data(&[
            ("grant_type", "client_credentials"),
            ("client_id", &self.principal.client_id),
            ("client_secret", &self.principal.client_secret),
            ("resource", &self.directory.token_audience),
        ]));
        insert_header(&mut request, "Content-Type", "application/x-www-form-urlencoded")?;

        let mut response = self.client.send(request).await.map_err(Error::from_http)?;
        let status: u16 = response.status().into();
        let body = response
            .body_string()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read token response: {e}")))?;

        if !(200..300).contains(&status) {
            let document: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
            return Err(Error::Service {
                status,
                code: document["error"].as_str().unwrap_or("Unknown").to_string(),
                message: document["error_description"]
                    .as_str()
                    .unwrap_or("token request failed")
                    .to_string(),
            });
        }

        let document: Value = serde_json::from_str(&body)?;
        let access_token = document["access_token"]
            .as_str()
            .ok_or_else(|| Error::Transport("token response has no access_token".to_string()))?
            .to_string();
        // v1 endpoints send expires_in as a string.
        let expires_in = document["expires_in"]
            .as_i64()
            .or_else(|| document["expires_in"].as_str().and_then(|s| s.parse().ok()))
            .unwrap_or(3600);

        let expires_at = Utc::now() + Duration::seconds(expires_in);
        log::debug!(
            "Acquired new token, expires at {}",
            expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        Ok(CachedToken {
            access_token,
            expires_at,
        })
    }

    /// Invalidates the cached token, forcing a refresh on next use.
    pub async fn invalidate(&self) {
        *self.cached_token.write().await = None;
    }
}

#[async_trait]
impl TokenProvider for ApplicationTokenProvider {
    async fn token(&self) -> Result<String> {
        {
            let cache = self.cached_token.read().await;
            if let Some(ref token) = *cache {
                if !token.is_expired(self.grace_period) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let token = self.acquire_token().await?;
        let access_token = token.access_token.clone();
        *self.cached_token.write().await = Some(token);
        Ok(access_token)
    }
}
