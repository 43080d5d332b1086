//! The real transport and its stand-in for strict replay.

use async_trait::async_trait;
use http_client::{Config, Error, HttpClient, Request, Response};
use http_types::StatusCode;

/// Sends requests over the network with `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
    config: Config,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            config: Config::new(),
        }
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, mut req: Request) -> Result<Response, Error> {
        let method = reqwest::Method::from_bytes(req.method().to_string().as_bytes())
            .map_err(|e| Error::from_str(400, format!("Unsupported method: {e}")))?;

        let mut reqwest_req = self.client.request(method, req.url().as_str());

        for (name, values) in req.iter() {
            for value in values.iter() {
                reqwest_req = reqwest_req.header(name.as_str(), value.as_str());
            }
        }

        let body = req.take_body().into_bytes().await?;
        if !body.is_empty() {
            reqwest_req = reqwest_req.body(body);
        }

        log::debug!("Sending {} {}", req.method(), req.url());
        let reqwest_resp = reqwest_req
            .send()
            .await
            .map_err(|e| Error::from_str(502, e.to_string()))?;

        let status = StatusCode::try_from(reqwest_resp.status().as_u16())
            .map_err(|e| Error::from_str(502, format!("Unsupported status: {e}")))?;
        let mut response = Response::new(status);

        let headers: Vec<(String, String)> = reqwest_resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body_bytes = reqwest_resp
            .bytes()
            .await
            .map_err(|e| Error::from_str(502, e.to_string()))?;
        response.set_body(body_bytes.to_vec());

        // After the body, so the server's Content-Type replaces the inferred one.
        let mut seen = Vec::new();
        for (name, value) in headers {
            if !seen.contains(&name) {
                response.remove_header(name.as_str());
                seen.push(name.clone());
            }
            response
                .append_header(name.as_str(), value.as_str())
                .map_err(|e| Error::from_str(502, format!("Invalid header {name}: {e}")))?;
        }

        Ok(response)
    }

    fn set_config(&mut self, config: Config) -> Result<(), Error> {
        self.config = config;
        Ok(())
    }

    fn config(&self) -> &Config {
        &self.config
    }
}

/// A client that refuses every request.
///
/// Used as the inner transport for replay-only sessions so that a request
/// missing from the cassette can never reach the network.
#[derive(Debug, Clone)]
pub struct NoOpClient {
    error_message: String,
    config: Config,
}

impl NoOpClient {
    pub fn new() -> Self {
        Self {
            error_message: "NoOpClient: real HTTP requests are not allowed while replaying.".to_string(),
            config: Config::new(),
        }
    }
}

impl Default for NoOpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for NoOpClient {
    async fn send(&self, req: Request) -> Result<Response, Error> {
        Err(Error::from_str(
            500,
            format!(
                "{} Attempted request: {} {}",
                self.error_message,
                req.method(),
                req.url()
            ),
        ))
    }

    fn set_config(&mut self, config: Config) -> Result<(), Error> {
        self.config = config;
        Ok(())
    }

    fn config(&self) -> &Config {
        &self.config
    }
}
