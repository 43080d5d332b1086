use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::cassette::{Cassette, CASSETTE_EXTENSION};
use crate::error::{Error, Result};
use crate::filter::{SensitiveDataFilter, ACCESS_TOKEN_PLACEHOLDER};
use crate::form_data::{looks_like_form, parse_form_data};
use crate::serializable::Headers;

const SECRET_FORM_FIELDS: [&str; 5] = [
    "client_secret",
    "password",
    "access_token",
    "refresh_token",
    "client_assertion",
];

fn access_token_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""access_token"\s*:\s*"((?:[^"\\]|\\.)*)""#).ok())
        .as_ref()
}

fn is_placeholder(value: &str) -> bool {
    value.len() > 2 && value.starts_with('<') && value.ends_with('>')
}

/// What [`analyze_cassette_file`] found in one cassette.
#[derive(Debug)]
pub struct CassetteAnalysis {
    pub file_path: PathBuf,
    pub total_interactions: usize,
    /// `(interaction, header)` for every stored authorization header.
    pub authorization_headers: Vec<(usize, String)>,
    /// `(interaction, "request"|"response")` for bodies with a live access token.
    pub unredacted_tokens: Vec<(usize, String)>,
    /// `(interaction, field)` for form fields carrying a secret.
    pub form_secrets: Vec<(usize, String)>,
    /// `(interaction, placeholder)` for live credential values still present.
    pub leaked_values: Vec<(usize, String)>,
}

impl CassetteAnalysis {
    pub fn is_clean(&self) -> bool {
        self.authorization_headers.is_empty()
            && self.unredacted_tokens.is_empty()
            && self.form_secrets.is_empty()
            && self.leaked_values.is_empty()
    }

    /// Log the findings; warnings for problems, info for a clean file.
    pub fn print_report(&self) {
        if self.is_clean() {
            log::info!(
                "{}: {} interactions, nothing sensitive found",
                self.file_path.display(),
                self.total_interactions
            );
            return;
        }

        log::warn!(
            "{}: {} interactions, sensitive data found",
            self.file_path.display(),
            self.total_interactions
        );
        for (idx, header) in &self.authorization_headers {
            log::warn!("  - Interaction #{idx}: {header} header was stored");
        }
        for (idx, side) in &self.unredacted_tokens {
            log::warn!("  - Interaction #{idx}: {side} body has an unredacted access_token");
        }
        for (idx, field) in &self.form_secrets {
            log::warn!("  - Interaction #{idx}: form field '{field}' is not redacted");
        }
        for (idx, placeholder) in &self.leaked_values {
            log::warn!("  - Interaction #{idx}: live value for {placeholder} is present");
        }
    }
}

fn auth_headers(headers: &Headers) -> impl Iterator<Item = &String> {
    headers
        .keys()
        .filter(|name| name.eq_ignore_ascii_case("authorization") || name.eq_ignore_ascii_case("proxy-authorization"))
}

fn has_live_token(body: &str) -> bool {
    access_token_regex().is_some_and(|re| {
        re.captures_iter(body)
            .any(|caps| &caps[1] != ACCESS_TOKEN_PLACEHOLDER)
    })
}

fn searchable_text(uri: Option<&str>, headers: &Headers, body: Option<&str>) -> String {
    let mut text = String::new();
    for part in uri.into_iter().chain(headers.values().flatten().map(String::as_str)).chain(body) {
        text.push_str(part);
        text.push('\n');
    }
    text
}

/// Check a cassette file for credentials that should have been redacted
/// before it was written. Pass `secrets` to also look for the live values
/// of the configured credentials.
pub fn analyze_cassette_file(
    cassette_path: impl AsRef<Path>,
    secrets: Option<&SensitiveDataFilter>,
) -> Result<CassetteAnalysis> {
    let path = cassette_path.as_ref();
    let cassette = Cassette::load_from_file(path)?;

    let mut analysis = CassetteAnalysis {
        file_path: path.to_path_buf(),
        total_interactions: cassette.len(),
        authorization_headers: Vec::new(),
        unredacted_tokens: Vec::new(),
        form_secrets: Vec::new(),
        leaked_values: Vec::new(),
    };

    for (i, interaction) in cassette.interactions.iter().enumerate() {
        let request = &interaction.request;
        let response = &interaction.response;

        for name in auth_headers(&request.headers) {
            analysis.authorization_headers.push((i, format!("request {name}")));
        }
        for name in auth_headers(&response.headers) {
            analysis.authorization_headers.push((i, format!("response {name}")));
        }

        for (side, body) in [("request", &request.body), ("response", &response.body)] {
            if body.as_deref().is_some_and(has_live_token) {
                analysis.unredacted_tokens.push((i, side.to_string()));
            }
        }

        if let Some(body) = request.body.as_deref().filter(|b| looks_like_form(b)) {
            for (field, value) in parse_form_data(body) {
                if SECRET_FORM_FIELDS.contains(&field.as_str()) && !is_placeholder(&value) {
                    analysis.form_secrets.push((i, field));
                }
            }
        }

        if let Some(secrets) = secrets {
            let text = searchable_text(Some(&request.uri), &request.headers, request.body.as_deref())
                + &searchable_text(None, &response.headers, response.body.as_deref());
            for placeholder in secrets.leaked_in(&text) {
                analysis.leaked_values.push((i, placeholder));
            }
        }
    }

    log::debug!(
        "Analyzed {} interactions in {}",
        analysis.total_interactions,
        path.display()
    );
    Ok(analysis)
}

fn collect_cassettes(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    let io_error = |source| Error::Io {
        path: dir.to_path_buf(),
        source,
    };
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_dir() {
            collect_cassettes(&path, found)?;
        } else if path.extension().is_some_and(|ext| ext == CASSETTE_EXTENSION) {
            found.push(path);
        }
    }
    Ok(())
}

/// Analyze every cassette under `dir`, recursively, in path order.
pub fn scan_cassette_dir(
    dir: impl AsRef<Path>,
    secrets: Option<&SensitiveDataFilter>,
) -> Result<Vec<CassetteAnalysis>> {
    let mut paths = Vec::new();
    collect_cassettes(dir.as_ref(), &mut paths)?;
    paths.sort();

    paths
        .iter()
        .map(|path| analyze_cassette_file(path, secrets))
        .collect()
}
