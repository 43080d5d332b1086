use crate::serializable::{header_values, SerializableRequest};
use std::fmt::Debug;
use url::Url;

pub trait RequestMatcher: Debug + Send + Sync {
    fn matches(&self, request: &SerializableRequest, recorded_request: &SerializableRequest) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMatch {
    /// Same parameters, any order.
    Unordered,
    /// Query string ignored entirely.
    Ignore,
}

/// Method + URI matching, the way cassettes are replayed by default.
#[derive(Debug, Clone)]
pub struct DefaultMatcher {
    query: QueryMatch,
    match_headers: Vec<String>,
}

impl DefaultMatcher {
    pub fn new() -> Self {
        Self {
            query: QueryMatch::Unordered,
            match_headers: Vec::new(),
        }
    }

    pub fn ignore_query(mut self) -> Self {
        self.query = QueryMatch::Ignore;
        self
    }

    /// Also require these headers to carry the same values.
    pub fn with_headers(mut self, headers: Vec<String>) -> Self {
        self.match_headers = headers;
        self
    }

    fn uris_match(&self, left: &str, right: &str) -> bool {
        if left == right {
            return true;
        }
        let (Ok(left), Ok(right)) = (Url::parse(left), Url::parse(right)) else {
            return false;
        };

        let base = |url: &Url| {
            (
                url.scheme().to_string(),
                url.host_str().map(str::to_ascii_lowercase),
                url.port_or_known_default(),
                url.path().to_string(),
            )
        };
        if base(&left) != base(&right) {
            log::debug!("URL mismatch: {left} != {right}");
            return false;
        }

        match self.query {
            QueryMatch::Ignore => true,
            QueryMatch::Unordered => {
                let sorted = |url: &Url| {
                    let mut pairs: Vec<(String, String)> = url
                        .query_pairs()
                        .map(|(k, v)| (k.into_owned(), v.into_owned()))
                        .collect();
                    pairs.sort();
                    pairs
                };
                sorted(&left) == sorted(&right)
            }
        }
    }
}

impl Default for DefaultMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestMatcher for DefaultMatcher {
    fn matches(&self, request: &SerializableRequest, recorded_request: &SerializableRequest) -> bool {
        if !request.method.eq_ignore_ascii_case(&recorded_request.method) {
            return false;
        }

        if !self.uris_match(&request.uri, &recorded_request.uri) {
            return false;
        }

        for header_name in &self.match_headers {
            let request_header = header_values(&request.headers, header_name);
            let recorded_header = header_values(&recorded_request.headers, header_name);
            if request_header != recorded_header {
                log::debug!(
                    "Header '{header_name}' mismatch: request={request_header:?}, recorded={recorded_header:?}"
                );
                return false;
            }
        }

        true
    }
}

/// Byte-for-byte method, URI and header equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatcher;

impl RequestMatcher for ExactMatcher {
    fn matches(&self, request: &SerializableRequest, recorded_request: &SerializableRequest) -> bool {
        request.method == recorded_request.method
            && request.uri == recorded_request.uri
            && request.headers == recorded_request.headers
    }
}
