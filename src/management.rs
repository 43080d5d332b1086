//! Typed calls against the resource manager REST API.

use http_client::{HttpClient, Request};
use http_types::{Method, Url};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenProvider;
use crate::error::{Error, Result};
use crate::serializable::{header_values, insert_header, SerializableResponse};

pub const DEFAULT_RESOURCE_MANAGER_ENDPOINT: &str = "https://management.azure.com";
pub const RESOURCES_API_VERSION: &str = "2017-05-10";

const DEFAULT_POLL_DELAY: Duration = Duration::from_secs(30);
const MAX_POLLS: usize = 120;

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub location: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl ResourceGroup {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportTemplateRequest {
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
}

impl ExportTemplateRequest {
    /// Export every resource in the group.
    pub fn all() -> Self {
        Self {
            resources: vec!["*".to_string()],
            options: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroupExportResult {
    #[serde(default)]
    pub template: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceGroupListResult {
    #[serde(default)]
    value: Vec<ResourceGroup>,
    next_link: Option<String>,
}

/// Status, polling headers and JSON body of one call.
#[derive(Debug)]
struct ArmResponse {
    status: u16,
    location: Option<String>,
    async_operation: Option<String>,
    retry_after: Option<u64>,
    body: Value,
}

impl ArmResponse {
    fn from_serializable(response: SerializableResponse) -> Self {
        let header = |name: &str| {
            header_values(&response.headers, name).and_then(|values| values.first().cloned())
        };
        let body = match response.body.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
            }
            _ => Value::Null,
        };
        Self {
            status: response.status,
            location: header("Location"),
            async_operation: header("Azure-AsyncOperation"),
            retry_after: header("Retry-After").and_then(|v| v.trim().parse().ok()),
            body,
        }
    }

    fn service_error(&self) -> Error {
        let err = self
            .body
            .get("error")
            .or_else(|| self.body.get("Error"))
            .unwrap_or(&self.body);
        Error::Service {
            status: self.status,
            code: err["code"].as_str().unwrap_or("Unknown").to_string(),
            message: err["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| self.body.to_string()),
        }
    }

    /// A polled operation that ended in `Failed` or `Canceled`.
    fn operation_failed(&self) -> Error {
        match self.service_error() {
            Error::Service { code, message, .. } => Error::Service {
                status: 500,
                code,
                message,
            },
            other => other,
        }
    }
}

/// Resource manager client for one subscription.
///
/// Every request carries a bearer token from the [`TokenProvider`] and goes
/// through the supplied `HttpClient`, which is where a cassette session plugs
/// in.
#[derive(Debug, Clone)]
pub struct ResourceManagementClient {
    client: Arc<dyn HttpClient>,
    credentials: Arc<dyn TokenProvider>,
    subscription_id: String,
    base_url: String,
    retry_timeout: Option<Duration>,
}

impl ResourceManagementClient {
    pub fn new(
        client: Arc<dyn HttpClient>,
        credentials: Arc<dyn TokenProvider>,
        subscription_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            credentials,
            subscription_id: subscription_id.into(),
            base_url: DEFAULT_RESOURCE_MANAGER_ENDPOINT.to_string(),
            retry_timeout: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Wait this long between polls instead of honouring `Retry-After`.
    pub fn with_retry_timeout(mut self, retry_timeout: Option<Duration>) -> Self {
        self.retry_timeout = retry_timeout;
        self
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    fn group_url(&self, group: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourcegroups/{}",
            self.base_url,
            self.subscription_id,
            urlencoding::encode(group)
        )
    }

    pub async fn list_resource_groups(&self) -> Result<Vec<ResourceGroup>> {
        let mut groups = Vec::new();
        let mut next = Some(format!(
            "{}/subscriptions/{}/resourcegroups?api-version={RESOURCES_API_VERSION}",
            self.base_url, self.subscription_id
        ));

        while let Some(url) = next {
            let response = self.call(Method::Get, &url, None).await?;
            let page: ResourceGroupListResult = serde_json::from_value(response.body)?;
            groups.extend(page.value);
            next = page.next_link.filter(|link| !link.is_empty());
        }

        log::debug!("Listed {} resource groups", groups.len());
        Ok(groups)
    }

    pub async fn create_or_update_resource_group(
        &self,
        name: &str,
        parameters: &ResourceGroup,
    ) -> Result<ResourceGroup> {
        let url = format!("{}?api-version={RESOURCES_API_VERSION}", self.group_url(name));
        let body = serde_json::to_value(parameters)?;
        let response = self.call(Method::Put, &url, Some(&body)).await?;
        let result = self.wait_for_completion(response, Some(&url)).await?;
        Ok(serde_json::from_value(result)?)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_or_update_resource(
        &self,
        group: &str,
        provider_namespace: &str,
        parent_resource_path: &str,
        resource_type: &str,
        resource_name: &str,
        api_version: &str,
        parameters: &GenericResource,
    ) -> Result<GenericResource> {
        let mut path = format!("{}/providers/{provider_namespace}", self.group_url(group));
        let parent = parent_resource_path.trim_matches('/');
        if !parent.is_empty() {
            path.push('/');
            path.push_str(parent);
        }
        let url = format!(
            "{path}/{resource_type}/{}?api-version={api_version}",
            urlencoding::encode(resource_name)
        );

        let body = serde_json::to_value(parameters)?;
        let response = self.call(Method::Put, &url, Some(&body)).await?;
        let result = self.wait_for_completion(response, Some(&url)).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn export_template(
        &self,
        group: &str,
        parameters: &ExportTemplateRequest,
    ) -> Result<ResourceGroupExportResult> {
        let url = format!(
            "{}/exportTemplate?api-version={RESOURCES_API_VERSION}",
            self.group_url(group)
        );
        let body = serde_json::to_value(parameters)?;
        let response = self.call(Method::Post, &url, Some(&body)).await?;
        let result = self.wait_for_completion(response, None).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Delete a group and wait for the deletion to finish.
    pub async fn delete_resource_group(&self, name: &str) -> Result<()> {
        let url = format!("{}?api-version={RESOURCES_API_VERSION}", self.group_url(name));
        let response = self.call(Method::Delete, &url, None).await?;
        self.wait_for_completion(response, None).await?;
        Ok(())
    }

    async fn call(&self, method: Method, url: &str, body: Option<&Value>) -> Result<ArmResponse> {
        let parsed: Url = url
            .parse()
            .map_err(|e| Error::Configuration(format!("invalid URL '{url}': {e}")))?;
        let token = self.credentials.token().await?;

        let mut request = Request::new(method, parsed);
        if let Some(body) = body {
            request.set_body(serde_json::to_vec(body)?);
            insert_header(&mut request, "Content-Type", "application/json; charset=utf-8")?;
        }
        insert_header(&mut request, "Authorization", &format!("Bearer {token}"))?;
        insert_header(&mut request, "Accept", "application/json")?;

        log::debug!("{} {url}", request.method());
        let mut response = self.client.send(request).await.map_err(Error::from_http)?;
        let response = ArmResponse::from_serializable(SerializableResponse::capture(&mut response).await?);

        if response.status >= 400 {
            return Err(response.service_error());
        }
        Ok(response)
    }

    fn poll_delay(&self, retry_after: Option<u64>) -> Duration {
        self.retry_timeout
            .or_else(|| retry_after.map(Duration::from_secs))
            .unwrap_or(DEFAULT_POLL_DELAY)
    }

    /// Follow `Azure-AsyncOperation` or a `202` answer's `Location` until the
    /// operation settles. When `resource_url` is given, the finished resource
    /// is fetched from it afterwards.
    async fn wait_for_completion(&self, initial: ArmResponse, resource_url: Option<&str>) -> Result<Value> {
        let (mut poll_url, track_status) = match (&initial.async_operation, &initial.location) {
            (Some(url), _) => (url.clone(), true),
            (None, Some(url)) if initial.status == 202 => (url.clone(), false),
            _ => return Ok(initial.body),
        };
        let mut retry_after = initial.retry_after;
        let mut polls = 0;

        let last = loop {
            if polls == MAX_POLLS {
                return Err(Error::Service {
                    status: 504,
                    code: "OperationTimedOut".to_string(),
                    message: format!("operation did not finish after {MAX_POLLS} polls: {poll_url}"),
                });
            }
            polls += 1;
            tokio::time::sleep(self.poll_delay(retry_after)).await;

            let response = self.call(Method::Get, &poll_url, None).await?;
            if track_status {
                match response.body["status"].as_str().unwrap_or("InProgress") {
                    "Succeeded" => break response,
                    "Failed" | "Canceled" => return Err(response.operation_failed()),
                    _ => {}
                }
            } else if response.status != 202 {
                break response;
            } else if let Some(location) = &response.location {
                poll_url = location.clone();
            }

            retry_after = response.retry_after;
            log::debug!("Operation still running after {polls} polls: {poll_url}");
        };

        match resource_url {
            Some(url) => Ok(self.call(Method::Get, url, None).await?.body),
            None => Ok(last.body),
        }
    }
}
