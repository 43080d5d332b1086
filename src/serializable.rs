use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http_client::{Request, Response};
use http_types::headers::HeaderName;
use http_types::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Header map as stored in a cassette. Names keep the casing they were
/// captured with; lookups go through [`header_values`].
pub type Headers = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableRequest {
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_base64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_base64: Option<String>,
}

/// Case-insensitive header lookup.
pub fn header_values<'a>(headers: &'a Headers, name: &str) -> Option<&'a Vec<String>> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, values)| values)
}

fn collect_headers<'a>(
    iter: impl Iterator<Item = (&'a http_types::headers::HeaderName, &'a http_types::headers::HeaderValues)>,
) -> Headers {
    let mut headers = Headers::new();
    for (name, values) in iter {
        let header_values: Vec<String> = values.iter().map(|v| v.as_str().to_string()).collect();
        headers
            .entry(name.as_str().to_string())
            .or_default()
            .extend(header_values);
    }
    headers
}

/// Split raw body bytes into the text or base64 field.
fn encode_body(bytes: Vec<u8>) -> (Option<String>, Option<String>) {
    if bytes.is_empty() {
        return (None, None);
    }
    match String::from_utf8(bytes) {
        Ok(text) => (Some(text), None),
        Err(e) => (None, Some(STANDARD.encode(e.into_bytes()))),
    }
}

fn decode_body(body: &Option<String>, body_base64: &Option<String>) -> Result<Option<Vec<u8>>> {
    if let Some(text) = body {
        return Ok(Some(text.clone().into_bytes()));
    }
    match body_base64 {
        Some(encoded) => STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|e| Error::Transport(format!("invalid base64 body: {e}"))),
        None => Ok(None),
    }
}

impl SerializableRequest {
    /// Capture a request, leaving its body intact for sending.
    pub async fn capture(req: &mut Request) -> Result<Self> {
        let headers = collect_headers(req.iter());
        let bytes = req
            .take_body()
            .into_bytes()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read request body: {e}")))?;
        let (body, body_base64) = encode_body(bytes.clone());
        if !bytes.is_empty() {
            req.set_body(bytes);
        }

        Ok(Self {
            method: req.method().to_string(),
            uri: req.url().to_string(),
            headers,
            body,
            body_base64,
        })
    }

    pub fn body_bytes(&self) -> Result<Option<Vec<u8>>> {
        decode_body(&self.body, &self.body_base64)
    }
}

impl SerializableResponse {
    /// Read a live response into its serializable form. The body is consumed.
    pub async fn capture(res: &mut Response) -> Result<Self> {
        let bytes = res
            .body_bytes()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read response body: {e}")))?;
        let (body, body_base64) = encode_body(bytes);

        Ok(Self {
            status: res.status().into(),
            headers: collect_headers(res.iter()),
            body,
            body_base64,
        })
    }

    pub fn body_bytes(&self) -> Result<Option<Vec<u8>>> {
        decode_body(&self.body, &self.body_base64)
    }

    pub fn status_code(&self) -> Result<StatusCode> {
        StatusCode::try_from(self.status)
            .map_err(|_| Error::Transport(format!("unsupported status code {}", self.status)))
    }

    /// Build a fresh response. Headers are applied after the body so the
    /// stored `Content-Type` wins over the one inferred from the body.
    pub fn to_response(&self) -> Result<Response> {
        let mut res = Response::new(self.status_code()?);

        if let Some(bytes) = self.body_bytes()? {
            res.set_body(bytes);
        }

        for (name, values) in &self.headers {
            let header: HeaderName = name
                .parse()
                .map_err(|e| Error::Transport(format!("invalid header name {name:?}: {e}")))?;
            res.remove_header(&header);
            for value in values {
                res.append_header(&header, value.as_str())
                    .map_err(|e| Error::Transport(format!("invalid value for header {name}: {e}")))?;
            }
        }

        Ok(res)
    }
}

/// Set a header on an outgoing request, failing instead of sending the request
/// without it.
pub(crate) fn insert_header(request: &mut Request, name: &str, value: &str) -> Result<()> {
    request
        .insert_header(name, value)
        .map(drop)
        .map_err(|e| Error::Configuration(format!("invalid value for header {name}: {e}")))
}
