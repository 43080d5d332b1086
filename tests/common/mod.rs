#![allow(dead_code)]

use async_trait::async_trait;
use http_client::{Error, HttpClient, Request, Response};
use resource_manager_vcr::Settings;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const TENANT_ID: &str = "72f988bf-86f1-41af-91ab-2d7cd011db47";
pub const CLIENT_ID: &str = "5c8a1f0e-3b7d-4e92-a6c4-9d21e0f7b3a8";
pub const CLIENT_SECRET: &str = "Sup3r-S3cret-Value";
pub const SUBSCRIPTION_ID: &str = "0b1f6471-1bf0-4dda-aec3-cb9272f09590";
pub const ACCESS_TOKEN: &str = "eyJ0eXAiOiJKV1QiLCJhbGciOiJSUzI1NiJ9.live";

#[derive(Debug, Clone)]
pub struct Canned {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Canned {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }
}

#[derive(Debug)]
struct Route {
    method: String,
    path: String,
    /// The last response keeps being served once the others are used up.
    responses: VecDeque<Canned>,
}

/// A request the fake received.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: String,
    pub url: String,
    pub body: String,
}

#[derive(Debug, Default)]
struct State {
    routes: Vec<Route>,
    calls: Vec<Call>,
}

/// Scripted stand-in for the identity and resource manager endpoints.
/// Routes match on method and URL path.
#[derive(Debug, Clone, Default)]
pub struct FakeResourceManager {
    state: Arc<Mutex<State>>,
}

impl FakeResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, method: &str, path: &str, responses: Vec<Canned>) -> Self {
        self.state.lock().unwrap().routes.push(Route {
            method: method.to_string(),
            path: path.to_string(),
            responses: responses.into(),
        });
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    /// Token endpoint, list, two group PUTs, the key vault PUT, export and a
    /// delete that is polled once before it finishes.
    pub fn example_script() -> Self {
        let sub = SUBSCRIPTION_ID;
        let group = format!("/subscriptions/{sub}/resourcegroups/azure-sample-group");
        let group_id = format!("/subscriptions/{sub}/resourceGroups/azure-sample-group");
        let operation = format!(
            "https://management.azure.com/subscriptions/{sub}/operationresults/eyJqb2JJZCI6IlJFU09VUkNF?api-version=2017-05-10"
        );

        Self::new()
            .on("POST", &format!("/{TENANT_ID}/oauth2/token"), vec![token_response()])
            .on(
                "GET",
                &format!("/subscriptions/{sub}/resourcegroups"),
                vec![Canned::new(
                    200,
                    format!(
                        r#"{{"value":[{{"id":"/subscriptions/{sub}/resourceGroups/existing","name":"existing","location":"eastus","tags":null,"properties":{{"provisioningState":"Succeeded"}}}}]}}"#
                    ),
                )
                .header("Content-Type", "application/json; charset=utf-8")],
            )
            .on(
                "PUT",
                &group,
                vec![
                    Canned::new(
                        201,
                        format!(
                            r#"{{"id":"{group_id}","name":"azure-sample-group","location":"westus","properties":{{"provisioningState":"Succeeded"}}}}"#
                        ),
                    ),
                    Canned::new(
                        200,
                        format!(
                            r#"{{"id":"{group_id}","name":"azure-sample-group","location":"westus","tags":{{"hello":"world"}},"properties":{{"provisioningState":"Succeeded"}}}}"#
                        ),
                    ),
                ],
            )
            .on(
                "PUT",
                &format!("{group}/providers/Microsoft.KeyVault/vaults/azureSampleVault1"),
                vec![Canned::new(
                    200,
                    format!(
                        r#"{{"id":"{group_id}/providers/Microsoft.KeyVault/vaults/azureSampleVault1","name":"azureSampleVault1","type":"Microsoft.KeyVault/vaults","location":"westus","properties":{{"sku":{{"family":"A","name":"standard"}},"tenantId":"{TENANT_ID}","accessPolicies":[],"enabledForDeployment":true,"vaultUri":"https://azuresamplevault1.vault.azure.net/"}}}}"#
                    ),
                )],
            )
            .on(
                "POST",
                &format!("{group}/exportTemplate"),
                vec![Canned::new(
                    200,
                    r#"{"template":{"$schema":"https://schema.management.azure.com/schemas/2015-01-01/deploymentTemplate.json#","contentVersion":"1.0.0.0","resources":[{"type":"Microsoft.KeyVault/vaults","name":"azureSampleVault1"}]}}"#,
                )],
            )
            .on(
                "DELETE",
                &group,
                vec![Canned::new(202, "")
                    .header("Location", operation.clone())
                    .header("Retry-After", "15")],
            )
            .on(
                "GET",
                &format!("/subscriptions/{sub}/operationresults/eyJqb2JJZCI6IlJFU09VUkNF"),
                vec![
                    Canned::new(202, "")
                        .header("Location", operation)
                        .header("Retry-After", "15"),
                    Canned::new(200, ""),
                ],
            )
    }
}

pub fn token_response() -> Canned {
    Canned::new(
        200,
        format!(
            r#"{{"token_type":"Bearer","expires_in":"3599","ext_expires_in":"3599","resource":"https://management.core.windows.net/","access_token":"{ACCESS_TOKEN}"}}"#
        ),
    )
    .header("Content-Type", "application/json; charset=utf-8")
}

#[async_trait]
impl HttpClient for FakeResourceManager {
    async fn send(&self, mut req: Request) -> Result<Response, Error> {
        let body = req.body_string().await.unwrap_or_default();
        let method = req.method().to_string();
        let path = req.url().path().to_string();

        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            method: method.clone(),
            url: req.url().to_string(),
            body,
        });

        let route = state
            .routes
            .iter_mut()
            .find(|route| route.method == method && route.path == path)
            .ok_or_else(|| Error::from_str(404, format!("no route for {method} {path}")))?;
        let canned = if route.responses.len() > 1 {
            route.responses.pop_front()
        } else {
            route.responses.front().cloned()
        }
        .ok_or_else(|| Error::from_str(500, format!("route {method} {path} has no responses")))?;

        let mut response = Response::new(canned.status);
        if !canned.body.is_empty() {
            response.set_body(canned.body);
        }
        for (name, value) in canned.headers {
            response.insert_header(name.as_str(), value.as_str());
        }
        Ok(response)
    }
}

pub fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let pairs: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

/// Live-looking credentials, with polling waits disabled.
pub fn settings() -> Settings {
    Settings::from_lookup(lookup(&[
        ("AZURE_TENANT_ID", TENANT_ID),
        ("AZURE_CLIENT_ID", CLIENT_ID),
        ("AZURE_CLIENT_SECRET", CLIENT_SECRET),
        ("AZURE_SUBSCRIPTION_ID", SUBSCRIPTION_ID),
        ("RETRY_TIMEOUT", "0"),
    ]))
    .unwrap()
}
