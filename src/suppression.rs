//! Rules that keep an interaction out of the cassette.
//!
//! Suppressed interactions are still returned to the caller while recording;
//! they just never reach disk. Rules run after the filter chain, so patterns
//! see placeholders rather than live identifiers.

use crate::cassette::Interaction;
use regex::Regex;
use std::fmt::{self, Debug};
use std::sync::Arc;

pub trait SuppressionRule: Debug + Send + Sync {
    fn suppress(&self, interaction: &Interaction) -> bool;
}

/// Drops polling responses: URI matches one of the patterns and the status is
/// one of the listed codes (`202 Accepted` unless configured otherwise).
#[derive(Debug, Clone)]
pub struct PollingSuppression {
    patterns: Vec<Regex>,
    statuses: Vec<u16>,
}

impl PollingSuppression {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            statuses: vec![202],
        }
    }

    /// Asynchronous-operation polling endpoints of the resource manager:
    /// `…/subscriptions/{id}/operationresults/…` and
    /// `…/subscriptions/{id}/providers/{namespace}/operations/…`.
    pub fn resource_manager() -> Self {
        let mut rule = Self::new();
        for pattern in [
            r"(?i)/subscriptions/[^/]+/operationresults/",
            r"(?i)/subscriptions/[^/]+/providers/[^/]+/operations/",
        ] {
            if let Ok(regex) = Regex::new(pattern) {
                rule.patterns.push(regex);
            }
        }
        rule
    }

    pub fn pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.patterns.push(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }
}

impl Default for PollingSuppression {
    fn default() -> Self {
        Self::new()
    }
}

impl SuppressionRule for PollingSuppression {
    fn suppress(&self, interaction: &Interaction) -> bool {
        self.statuses.contains(&interaction.response.status)
            && self
                .patterns
                .iter()
                .any(|pattern| pattern.is_match(&interaction.request.uri))
    }
}

type Predicate = Arc<dyn Fn(&Interaction) -> bool + Send + Sync>;

/// Suppression driven by an arbitrary predicate.
#[derive(Clone)]
pub struct PredicateSuppression {
    description: String,
    predicate: Predicate,
}

impl PredicateSuppression {
    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Interaction) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }
}

impl Debug for PredicateSuppression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateSuppression")
            .field("description", &self.description)
            .finish()
    }
}

impl SuppressionRule for PredicateSuppression {
    fn suppress(&self, interaction: &Interaction) -> bool {
        (self.predicate)(interaction)
    }
}
