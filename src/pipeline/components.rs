//! Capabilities a pipeline runs against.
//!
//! Built once from configuration and shared by every run of an orchestrator.
//! Tests replace individual capabilities through the `with_*` methods.

use std::sync::Arc;
use tracing::info;

use super::config::{PipelineConfig, SinkKind};
use super::orchestrator::PipelineError;
use crate::acquisition::http::build_client;
use crate::acquisition::{Acquirer, HttpAcquirer, UnconfiguredAcquirer, VenueSet};
use crate::analysis::{Analyzer, HttpAnalyzer, RuleBasedAnalyzer};
use crate::sink::{JsonlSink, MemorySink, Sink, SinkRole, SqliteSink, WebhookSink};
use crate::validation::{HttpVerifier, StaticVerifier, Verifier};

/// Score given by the fallback verifier when no verification service is
/// configured.
pub const UNVERIFIED_SCORE: f64 = 0.8;

#[derive(Clone)]
pub struct PipelineComponents {
    pub venues: VenueSet,
    pub verifier: Arc<dyn Verifier>,
    pub analyzer: Arc<dyn Analyzer>,
    pub primary_sink: Arc<dyn Sink>,
    pub secondary_sinks: Vec<Arc<dyn Sink>>,
}

impl PipelineComponents {
    /// Builds every capability named by the configuration.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Setup` if the HTTP client cannot be built or a
    /// sink cannot be opened.
    pub async fn build(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let timeout = config
            .timeouts
            .acquisition
            .max(config.timeouts.verification)
            .max(config.timeouts.analysis)
            .max(config.timeouts.sink);
        let client = build_client(timeout)
            .map_err(|e| PipelineError::Setup(format!("HTTP client: {}", e)))?;

        let cloud: Arc<dyn Acquirer> = match &config.endpoints.cloud_acquirer {
            Some(url) => Arc::new(HttpAcquirer::relay(client.clone(), url)),
            None => Arc::new(UnconfiguredAcquirer),
        };
        let venues = VenueSet::new(Arc::new(HttpAcquirer::direct(client.clone())), cloud);

        let verifier: Arc<dyn Verifier> = match &config.endpoints.verifier {
            Some(url) => Arc::new(HttpVerifier::new(client.clone(), url)),
            None => Arc::new(StaticVerifier::new(UNVERIFIED_SCORE)),
        };

        let analyzer: Arc<dyn Analyzer> = match &config.endpoints.analyzer {
            Some(url) => Arc::new(HttpAnalyzer::new(client.clone(), url)),
            None => Arc::new(RuleBasedAnalyzer::new()),
        };

        let mut primary_sink = None;
        let mut secondary_sinks = Vec::new();
        for sink_config in &config.sinks {
            let sink: Arc<dyn Sink> = match &sink_config.kind {
                SinkKind::Memory => Arc::new(MemorySink::new(&sink_config.name)),
                SinkKind::Jsonl { dir } => Arc::new(
                    JsonlSink::open(&sink_config.name, dir)
                        .await
                        .map_err(|e| PipelineError::Setup(e.to_string()))?,
                ),
                SinkKind::Sqlite { url } => Arc::new(
                    SqliteSink::connect(&sink_config.name, url)
                        .await
                        .map_err(|e| {
                            PipelineError::Setup(format!("sink {}: {}", sink_config.name, e))
                        })?,
                ),
                SinkKind::Webhook { url } => {
                    Arc::new(WebhookSink::new(&sink_config.name, client.clone(), url))
                }
            };
            info!(
                sink = %sink_config.name,
                role = ?sink_config.role,
                "Sink configured"
            );
            match sink_config.role {
                SinkRole::Primary if primary_sink.is_none() => primary_sink = Some(sink),
                SinkRole::Primary => {
                    return Err(PipelineError::Setup(
                        "more than one primary sink configured".to_string(),
                    ))
                }
                SinkRole::Secondary => secondary_sinks.push(sink),
            }
        }
        let primary_sink = primary_sink
            .ok_or_else(|| PipelineError::Setup("no primary sink configured".to_string()))?;

        Ok(Self {
            venues,
            verifier,
            analyzer,
            primary_sink,
            secondary_sinks,
        })
    }

    /// In-process components: unconfigured venues, the fallback verifier,
    /// rule-based analysis and a memory sink as primary.
    pub fn in_memory() -> Self {
        Self {
            venues: VenueSet::new(Arc::new(UnconfiguredAcquirer), Arc::new(UnconfiguredAcquirer)),
            verifier: Arc::new(StaticVerifier::new(UNVERIFIED_SCORE)),
            analyzer: Arc::new(RuleBasedAnalyzer::new()),
            primary_sink: Arc::new(MemorySink::new("memory")),
            secondary_sinks: Vec::new(),
        }
    }

    pub fn with_venues(mut self, venues: VenueSet) -> Self {
        self.venues = venues;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_primary_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.primary_sink = sink;
        self
    }

    pub fn with_secondary_sinks(mut self, sinks: Vec<Arc<dyn Sink>>) -> Self {
        self.secondary_sinks = sinks;
        self
    }
}

impl std::fmt::Debug for PipelineComponents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineComponents")
            .field("venues", &self.venues)
            .field("verifier", &self.verifier.name())
            .field("analyzer", &self.analyzer.name())
            .field("primary_sink", &self.primary_sink.name())
            .field(
                "secondary_sinks",
                &self.secondary_sinks.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
