use async_trait::async_trait;
use http_client::{HttpClient, Request, Response};
use std::sync::Arc;
use tokio::sync::Mutex;

mod auth;
mod cassette;
mod config;
mod error;
mod example;
mod filter;
mod form_data;
mod management;
mod matcher;
mod naming;
mod serializable;
mod suppression;
mod transport;
mod utils;

pub use auth::{
    discover_active_directory_settings, ActiveDirectorySettings, ApplicationTokenProvider,
    StaticTokenProvider, TokenProvider,
};
pub use cassette::{Cassette, CassetteLibrary, Interaction, CASSETTE_EXTENSION};
pub use config::{ServicePrincipal, Settings, DEFAULT_CASSETTE_DIR, PLACEHOLDER_SUBSCRIPTION_ID};
pub use error::{Error, Result};
pub use example::{connect, run_example, ExampleOptions, DEFAULT_GROUP_NAME, DEFAULT_LOCATION};
pub use filter::{
    BodyFilter, Filter, FilterChain, HeaderFilter, RetryAfterFilter, SensitiveDataFilter,
    ACCESS_TOKEN_PLACEHOLDER, MINIMAL_RETRY_AFTER,
};
pub use form_data::{encode_form_data, parse_form_data};
pub use management::{
    ExportTemplateRequest, GenericResource, ResourceGroup, ResourceGroupExportResult,
    ResourceManagementClient, DEFAULT_RESOURCE_MANAGER_ENDPOINT, RESOURCES_API_VERSION,
};
pub use matcher::{DefaultMatcher, ExactMatcher, QueryMatch, RequestMatcher};
pub use naming::scenario_name;
pub use serializable::{header_values, Headers, SerializableRequest, SerializableResponse};
pub use suppression::{PollingSuppression, PredicateSuppression, SuppressionRule};
pub use transport::{NoOpClient, ReqwestClient};
pub use utils::{analyze_cassette_file, scan_cassette_dir, CassetteAnalysis};

/// How a session treats its cassette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcrMode {
    /// Replay the cassette if it exists, otherwise record a new one.
    RecordOnce,
    /// Replay only; a missing cassette is an error.
    ReplayOnly,
    /// Pass every request through; nothing is read or written.
    Bypass,
}

/// What a built session is actually doing, after looking at the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Recording,
    Replaying,
    Bypassing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub recorded: usize,
    pub suppressed: usize,
    pub replayed: usize,
}

#[derive(Debug)]
struct SessionState {
    cassette: Cassette,
    consumed: Vec<bool>,
    stats: SessionStats,
    dirty: bool,
}

impl SessionState {
    fn new(cassette: Cassette) -> Self {
        let consumed = vec![false; cassette.len()];
        Self {
            cassette,
            consumed,
            stats: SessionStats::default(),
            dirty: false,
        }
    }

    /// First unconsumed interaction that matches, in recorded order. With
    /// repeats allowed, falls back to the last consumed match.
    fn next_match(
        &self,
        request: &SerializableRequest,
        matcher: &dyn RequestMatcher,
        allow_repeats: bool,
    ) -> Option<usize> {
        let interactions = &self.cassette.interactions;
        let fresh = interactions
            .iter()
            .enumerate()
            .find(|(i, interaction)| !self.consumed[*i] && matcher.matches(request, &interaction.request))
            .map(|(i, _)| i);

        if fresh.is_some() || !allow_repeats {
            return fresh;
        }

        interactions
            .iter()
            .enumerate()
            .rev()
            .find(|(i, interaction)| self.consumed[*i] && matcher.matches(request, &interaction.request))
            .map(|(i, _)| i)
    }

    fn closest_hint(&self, request: &SerializableRequest) -> String {
        let wanted = format!("{} {}", request.method, request.uri);
        self.cassette
            .interactions
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.consumed[*i])
            .map(|(_, interaction)| format!("{} {}", interaction.request.method, interaction.request.uri))
            .min_by_key(|candidate| levenshtein::levenshtein(&wanted, candidate))
            .map(|candidate| format!(" (closest unconsumed: {candidate})"))
            .unwrap_or_else(|| " (all recorded interactions have been used)".to_string())
    }
}

/// An `HttpClient` that records to, or replays from, one named cassette.
///
/// Dropping the client flushes any unsaved recording, so a test that fails
/// or returns early keeps what it captured. Call [`VcrClient::end_session`]
/// to flush explicitly and observe the result.
#[derive(Debug)]
pub struct VcrClient {
    inner: Box<dyn HttpClient>,
    name: String,
    library: CassetteLibrary,
    phase: SessionPhase,
    state: Arc<Mutex<SessionState>>,
    matcher: Box<dyn RequestMatcher>,
    filter_chain: FilterChain,
    suppression: Vec<Box<dyn SuppressionRule>>,
    allow_playback_repeats: bool,
}

fn flush_state(library: &CassetteLibrary, name: &str, state: &mut SessionState) -> Result<()> {
    if !state.dirty {
        return Ok(());
    }
    library.save(name, &state.cassette)?;
    state.dirty = false;
    log::info!(
        "Saved cassette '{name}' ({} interactions, {} suppressed)",
        state.cassette.len(),
        state.stats.suppressed
    );
    Ok(())
}

impl VcrClient {
    pub fn builder(library: CassetteLibrary, name: impl Into<String>) -> VcrClientBuilder {
        VcrClientBuilder::new(library, name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub async fn stats(&self) -> SessionStats {
        self.state.lock().await.stats
    }

    /// Interactions buffered for persistence (recording) or loaded for replay.
    pub async fn interactions(&self) -> Vec<Interaction> {
        self.state.lock().await.cassette.interactions.clone()
    }

    /// Record, replay or pass through a single request depending on the phase.
    pub async fn intercept(&self, req: Request) -> Result<Response> {
        match self.phase {
            SessionPhase::Bypassing => self.inner.send(req).await.map_err(Error::from_http),
            SessionPhase::Replaying => self.replay(req).await,
            SessionPhase::Recording => self.record(req).await,
        }
    }

    /// Flush the recorded buffer to the cassette library. Safe to call more
    /// than once; replay and bypass sessions never write.
    pub async fn end_session(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        flush_state(&self.library, &self.name, &mut state)
    }

    async fn replay(&self, mut req: Request) -> Result<Response> {
        let request = SerializableRequest::capture(&mut req).await?;
        let mut state = self.state.lock().await;

        let Some(index) = state.next_match(&request, self.matcher.as_ref(), self.allow_playback_repeats)
        else {
            log::debug!("No match for {} {} in '{}'", request.method, request.uri, self.name);
            return Err(Error::NoMatchingInteraction {
                cassette: self.name.clone(),
                method: request.method.clone(),
                uri: request.uri.clone(),
                hint: state.closest_hint(&request),
            });
        };

        state.consumed[index] = true;
        state.stats.replayed += 1;
        log::debug!("Replaying interaction #{index} for {} {}", request.method, request.uri);
        state.cassette.interactions[index].response.to_response()
    }

    async fn record(&self, mut req: Request) -> Result<Response> {
        let request = SerializableRequest::capture(&mut req).await?;
        let mut response = self.inner.send(req).await.map_err(Error::from_http)?;
        let captured = SerializableResponse::capture(&mut response).await?;

        // The caller gets the live response; only the stored copy is filtered.
        let pristine = captured.to_response()?;

        let mut interaction = Interaction::new(request, captured);
        self.filter_chain.filter_interaction(&mut interaction);

        let mut state = self.state.lock().await;
        if let Some(rule) = self.suppression.iter().find(|rule| rule.suppress(&interaction)) {
            log::debug!(
                "Suppressed {} {} ({}) by {rule:?}",
                interaction.request.method,
                interaction.request.uri,
                interaction.response.status
            );
            state.stats.suppressed += 1;
        } else {
            state.cassette.record_interaction(interaction);
            state.stats.recorded += 1;
            state.dirty = true;
        }

        Ok(pristine)
    }
}

#[derive(Debug)]
pub struct VcrClientBuilder {
    library: CassetteLibrary,
    name: String,
    inner: Option<Box<dyn HttpClient>>,
    mode: VcrMode,
    matcher: Option<Box<dyn RequestMatcher>>,
    filter_chain: FilterChain,
    suppression: Vec<Box<dyn SuppressionRule>>,
    allow_playback_repeats: bool,
}

impl VcrClientBuilder {
    pub fn new(library: CassetteLibrary, name: impl Into<String>) -> Self {
        Self {
            library,
            name: name.into(),
            inner: None,
            mode: VcrMode::RecordOnce,
            matcher: None,
            filter_chain: FilterChain::new(),
            suppression: Vec::new(),
            allow_playback_repeats: false,
        }
    }

    /// Transport used when recording or bypassing. Defaults to
    /// [`ReqwestClient`]; replaying sessions always use [`NoOpClient`].
    pub fn inner_client(mut self, client: Box<dyn HttpClient>) -> Self {
        self.inner = Some(client);
        self
    }

    pub fn mode(mut self, mode: VcrMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn matcher(mut self, matcher: Box<dyn RequestMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn filter_chain(mut self, filter_chain: FilterChain) -> Self {
        self.filter_chain = filter_chain;
        self
    }

    pub fn add_filter(mut self, filter: Box<dyn Filter>) -> Self {
        self.filter_chain = self.filter_chain.add_filter(filter);
        self
    }

    pub fn suppress(mut self, rule: Box<dyn SuppressionRule>) -> Self {
        self.suppression.push(rule);
        self
    }

    pub fn allow_playback_repeats(mut self, allow: bool) -> Self {
        self.allow_playback_repeats = allow;
        self
    }

    /// Redaction and suppression rules for resource manager traffic.
    pub fn resource_manager(self, settings: &Settings) -> Self {
        self.filter_chain(FilterChain::resource_manager(settings))
            .suppress(Box::new(PollingSuppression::resource_manager()))
    }

    pub fn build(self) -> Result<VcrClient> {
        if self.name.is_empty() {
            return Err(Error::Configuration("cassette name cannot be empty".to_string()));
        }

        let exists = self.library.exists(&self.name);
        let phase = match (self.mode, exists) {
            (VcrMode::Bypass, _) => SessionPhase::Bypassing,
            (VcrMode::ReplayOnly, false) => {
                return Err(Error::CassetteMissing {
                    path: self.library.path_for(&self.name),
                    name: self.name,
                })
            }
            (VcrMode::ReplayOnly | VcrMode::RecordOnce, true) => SessionPhase::Replaying,
            (VcrMode::RecordOnce, false) => SessionPhase::Recording,
        };

        let cassette = if phase == SessionPhase::Replaying {
            let mut cassette = self.library.load(&self.name)?;
            for interaction in &mut cassette.interactions {
                self.filter_chain.restore_interaction(interaction);
            }
            cassette
        } else {
            Cassette::new()
        };

        let inner: Box<dyn HttpClient> = match (phase, self.inner) {
            (SessionPhase::Replaying, _) => Box::new(NoOpClient::new()),
            (_, Some(inner)) => inner,
            (_, None) => Box::new(ReqwestClient::new()),
        };

        log::info!(
            "Cassette session '{}' started: {phase:?} ({} recorded interactions)",
            self.name,
            cassette.len()
        );

        Ok(VcrClient {
            inner,
            name: self.name,
            library: self.library,
            phase,
            state: Arc::new(Mutex::new(SessionState::new(cassette))),
            matcher: self.matcher.unwrap_or_else(|| Box::new(DefaultMatcher::new())),
            filter_chain: self.filter_chain,
            suppression: self.suppression,
            allow_playback_repeats: self.allow_playback_repeats,
        })
    }
}

impl CassetteLibrary {
    /// Open a session for `name` in `mode`; finish configuring it on the
    /// returned builder.
    pub fn begin_session(&self, name: &str, mode: VcrMode) -> VcrClientBuilder {
        VcrClient::builder(self.clone(), name).mode(mode)
    }
}

impl Drop for VcrClient {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_lock() {
            if state.dirty {
                log::debug!(
                    "VcrClient dropped - saving {} unsaved interactions",
                    state.cassette.len()
                );
                if let Err(e) = flush_state(&self.library, &self.name, &mut state) {
                    log::warn!("Failed to save cassette '{}' on drop: {e}", self.name);
                }
            }
        }
    }
}

#[async_trait]
impl HttpClient for VcrClient {
    async fn send(&self, req: Request) -> std::result::Result<Response, http_client::Error> {
        self.intercept(req).await.map_err(Error::into_http)
    }

    fn set_config(&mut self, config: http_client::Config) -> std::result::Result<(), http_client::Error> {
        self.inner.set_config(config)
    }

    fn config(&self) -> &http_client::Config {
        self.inner.config()
    }
}
