use crate::cassette::Interaction;
use crate::config::Settings;
use crate::serializable::{Headers, SerializableRequest, SerializableResponse};
use regex::Regex;
use std::fmt::{self, Debug};
use std::sync::Arc;

pub const ACCESS_TOKEN_PLACEHOLDER: &str = "<ACCESS_TOKEN>";

/// Header value written in place of any `Retry-After` before persisting.
pub const MINIMAL_RETRY_AFTER: &str = "1";

/// A transformation applied to interactions before they are persisted.
///
/// `restore_*` is the inverse applied to loaded interactions before replay.
/// Most filters are one-way and keep the default no-op.
pub trait Filter: Debug + Send + Sync {
    fn filter_request(&self, request: &mut SerializableRequest);
    fn filter_response(&self, response: &mut SerializableResponse);

    fn restore_request(&self, _request: &mut SerializableRequest) {}
    fn restore_response(&self, _response: &mut SerializableResponse) {}
}

#[derive(Debug, Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// The pipeline used for resource manager cassettes: strip authorization,
    /// redact access tokens, swap credential identifiers for placeholders and
    /// pin `Retry-After`.
    pub fn resource_manager(settings: &Settings) -> Self {
        Self::new()
            .add_filter(Box::new(HeaderFilter::new().remove_auth_headers()))
            .add_filter(Box::new(BodyFilter::new().redact_access_token(ACCESS_TOKEN_PLACEHOLDER)))
            .add_filter(Box::new(SensitiveDataFilter::from_settings(settings)))
            .add_filter(Box::new(RetryAfterFilter::new(MINIMAL_RETRY_AFTER)))
    }

    pub fn add_filter(mut self, filter: Box<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn filter_interaction(&self, interaction: &mut Interaction) {
        for filter in &self.filters {
            filter.filter_request(&mut interaction.request);
            filter.filter_response(&mut interaction.response);
        }
    }

    /// Undo reversible filters, last filter first.
    pub fn restore_interaction(&self, interaction: &mut Interaction) {
        for filter in self.filters.iter().rev() {
            filter.restore_request(&mut interaction.request);
            filter.restore_response(&mut interaction.response);
        }
    }
}

#[derive(Debug, Default)]
pub struct HeaderFilter {
    headers_to_remove: Vec<String>,
    headers_to_replace: Vec<(String, String)>,
}

impl HeaderFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove_header(mut self, header: impl Into<String>) -> Self {
        self.headers_to_remove.push(header.into());
        self
    }

    pub fn replace_header(
        mut self,
        header: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        self.headers_to_replace
            .push((header.into(), replacement.into()));
        self
    }

    pub fn remove_auth_headers(self) -> Self {
        self.remove_header("Authorization")
    }

    fn filter_headers(&self, headers: &mut Headers) {
        headers.retain(|name, _| {
            !self
                .headers_to_remove
                .iter()
                .any(|removed| removed.eq_ignore_ascii_case(name))
        });

        for (header, replacement) in &self.headers_to_replace {
            for (name, values) in headers.iter_mut() {
                if name.eq_ignore_ascii_case(header) {
                    values.clear();
                    values.push(replacement.clone());
                }
            }
        }
    }
}

impl Filter for HeaderFilter {
    fn filter_request(&self, request: &mut SerializableRequest) {
        self.filter_headers(&mut request.headers);
    }

    fn filter_response(&self, response: &mut SerializableResponse) {
        self.filter_headers(&mut response.headers);
    }
}

/// Rewrites `Retry-After` (any casing) so replayed polling does not wait.
#[derive(Debug)]
pub struct RetryAfterFilter {
    inner: HeaderFilter,
}

impl RetryAfterFilter {
    pub fn new(delay: impl Into<String>) -> Self {
        Self {
            inner: HeaderFilter::new().replace_header("Retry-After", delay),
        }
    }
}

impl Filter for RetryAfterFilter {
    fn filter_request(&self, _request: &mut SerializableRequest) {}

    fn filter_response(&self, response: &mut SerializableResponse) {
        self.inner.filter_response(response);
    }
}

/// Text-level body rewriting. Works on the raw body so bytes outside the
/// matches are preserved exactly.
#[derive(Debug, Default)]
pub struct BodyFilter {
    regex_replacements: Vec<(Regex, String)>,
}

impl BodyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the value of every `"access_token"` JSON field, at any depth.
    pub fn redact_access_token(mut self, placeholder: &str) -> Self {
        // Literal pattern, cannot fail to compile.
        if let Ok(regex) = Regex::new(r#""access_token"(\s*):(\s*)"(?:[^"\\]|\\.)*""#) {
            let replacement = format!(r#""access_token"${{1}}:${{2}}"{}""#, placeholder.replace('$', "$$"));
            self.regex_replacements.push((regex, replacement));
        }
        self
    }

    fn filter_body(&self, body: &mut Option<String>) {
        if let Some(body_str) = body {
            for (regex, replacement) in &self.regex_replacements {
                if regex.is_match(body_str) {
                    *body_str = regex.replace_all(body_str, replacement.as_str()).into_owned();
                }
            }
        }
    }
}

impl Filter for BodyFilter {
    fn filter_request(&self, request: &mut SerializableRequest) {
        self.filter_body(&mut request.body);
    }

    fn filter_response(&self, response: &mut SerializableResponse) {
        self.filter_body(&mut response.body);
    }
}

type ValueProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Placeholder substitution for secrets: live values become placeholders on
/// save and placeholders become live values again on load.
///
/// Providers are called every time a filter runs, so a value that changes
/// between recording and replay (a CI dummy, say) is picked up.
#[derive(Clone, Default)]
pub struct SensitiveDataFilter {
    rules: Vec<(String, ValueProvider)>,
}

impl Debug for SensitiveDataFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let placeholders: Vec<&str> = self.rules.iter().map(|(p, _)| p.as_str()).collect();
        f.debug_struct("SensitiveDataFilter")
            .field("placeholders", &placeholders)
            .finish()
    }
}

impl SensitiveDataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn placeholder<F>(mut self, placeholder: impl Into<String>, provider: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        self.rules.push((placeholder.into(), Arc::new(provider)));
        self
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let tenant = settings.tenant_id.clone();
        let client = settings.client_id.clone();
        let secret = settings.client_secret.clone();
        let subscription = settings.subscription_id.clone();
        Self::new()
            .placeholder("<AZURE_TENANT_ID>", move || tenant.clone())
            .placeholder("<AZURE_CLIENT_ID>", move || client.clone())
            .placeholder("<AZURE_CLIENT_SECRET>", move || secret.clone())
            .placeholder("<AZURE_SUBSCRIPTION_ID>", move || Some(subscription.clone()))
    }

    /// Resolved (placeholder, live value) pairs, longest live value first so
    /// a value that contains another is replaced whole.
    ///
    /// Rules sharing one live value (the `CI` dummies) resolve to the rule
    /// registered last, so from [`Self::from_settings`] they all persist as
    /// `<AZURE_SUBSCRIPTION_ID>`. Restoring is unaffected since every such
    /// placeholder maps back to the same value.
    pub fn resolved(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(usize, String, String)> = self
            .rules
            .iter()
            .enumerate()
            .filter_map(|(index, (placeholder, provider))| {
                provider()
                    .filter(|value| !value.is_empty())
                    .map(|value| (index, placeholder.clone(), value))
            })
            .collect();
        pairs.sort_by(|a, b| b.2.len().cmp(&a.2.len()).then(b.0.cmp(&a.0)));
        pairs
            .into_iter()
            .map(|(_, placeholder, value)| (placeholder, value))
            .collect()
    }

    fn live_forms(value: &str) -> Vec<String> {
        let mut forms = vec![value.to_string()];
        let encoded = urlencoding::encode(value).into_owned();
        if encoded != value {
            forms.push(encoded);
        }
        forms
    }

    fn scrub(text: &mut String, pairs: &[(String, String)]) {
        for (placeholder, value) in pairs {
            for form in Self::live_forms(value) {
                if text.contains(&form) {
                    *text = text.replace(&form, placeholder);
                }
            }
        }
    }

    fn unscrub(text: &mut String, pairs: &[(String, String)]) {
        for (placeholder, value) in pairs {
            if text.contains(placeholder.as_str()) {
                *text = text.replace(placeholder.as_str(), value);
            }
        }
    }

    fn apply(
        uri: Option<&mut String>,
        headers: &mut Headers,
        body: &mut Option<String>,
        pairs: &[(String, String)],
        op: fn(&mut String, &[(String, String)]),
    ) {
        if pairs.is_empty() {
            return;
        }
        if let Some(uri) = uri {
            op(uri, pairs);
        }
        for values in headers.values_mut() {
            for value in values.iter_mut() {
                op(value, pairs);
            }
        }
        if let Some(body) = body {
            op(body, pairs);
        }
    }

    /// Placeholders that still occur anywhere in the text.
    pub fn leaked_in(&self, text: &str) -> Vec<String> {
        self.resolved()
            .into_iter()
            .filter(|(_, value)| Self::live_forms(value).iter().any(|form| text.contains(form)))
            .map(|(placeholder, _)| placeholder)
            .collect()
    }
}

impl Filter for SensitiveDataFilter {
    fn filter_request(&self, request: &mut SerializableRequest) {
        let pairs = self.resolved();
        Self::apply(Some(&mut request.uri), &mut request.headers, &mut request.body, &pairs, Self::scrub);
    }

    fn filter_response(&self, response: &mut SerializableResponse) {
        let pairs = self.resolved();
        Self::apply(None, &mut response.headers, &mut response.body, &pairs, Self::scrub);
    }

    fn restore_request(&self, request: &mut SerializableRequest) {
        let pairs = self.resolved();
        Self::apply(Some(&mut request.uri), &mut request.headers, &mut request.body, &pairs, Self::unscrub);
    }

    fn restore_response(&self, response: &mut SerializableResponse) {
        let pairs = self.resolved();
        Self::apply(None, &mut response.headers, &mut response.body, &pairs, Self::unscrub);
    }
}
