//! Pipeline configuration.
//!
//! Configuration comes from defaults, an optional YAML file, and `LEAD_*`
//! environment variables, applied in that order. Durations are written in
//! milliseconds.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::routing::{RouterConfig, Venue};
use crate::scheduler::{RetryPolicy, SourceSpec};
use crate::sink::{SinkPolicy, SinkRole};
use crate::validation::{ConfidenceWeights, DEFAULT_CATEGORIES};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// The configuration file could not be parsed.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serde helpers for durations expressed in milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Deadlines for calls to external capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// One acquisition attempt.
    #[serde(with = "duration_ms")]
    pub acquisition: Duration,
    /// One verification call.
    #[serde(with = "duration_ms")]
    pub verification: Duration,
    /// One analysis call.
    #[serde(with = "duration_ms")]
    pub analysis: Duration,
    /// One sink write.
    #[serde(with = "duration_ms")]
    pub sink: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            acquisition: Duration::from_secs(30),
            verification: Duration::from_secs(10),
            analysis: Duration::from_secs(30),
            sink: Duration::from_secs(10),
        }
    }
}

/// Endpoints of remote capabilities. Unset endpoints fall back to the
/// in-process implementations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Relay service used by the cloud venue.
    pub cloud_acquirer: Option<String>,
    /// Address verification service.
    pub verifier: Option<String>,
    /// Scoring service.
    pub analyzer: Option<String>,
}

/// Backend of a configured sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkKind {
    Memory,
    Jsonl { dir: PathBuf },
    Sqlite { url: String },
    Webhook { url: String },
}

/// One configured sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    pub name: String,
    #[serde(default)]
    pub role: SinkRole,
    #[serde(flatten)]
    pub kind: SinkKind,
}

impl SinkConfig {
    pub fn primary(name: impl Into<String>, kind: SinkKind) -> Self {
        Self {
            name: name.into(),
            role: SinkRole::Primary,
            kind,
        }
    }

    pub fn secondary(name: impl Into<String>, kind: SinkKind) -> Self {
        Self {
            name: name.into(),
            role: SinkRole::Secondary,
            kind,
        }
    }
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // Acquisition settings
    /// Sources to scrape, one task each.
    pub sources: Vec<SourceSpec>,
    /// Number of acquisition workers.
    pub max_parallel_workers: usize,
    /// Retry budget shared by acquisition, verification, analysis and sinks.
    pub retry: RetryPolicy,
    pub timeouts: Timeouts,
    /// Grace period for in-flight attempts after cancellation.
    #[serde(with = "duration_ms")]
    pub cancel_grace: Duration,
    pub router: RouterConfig,
    pub endpoints: Endpoints,

    // Validation settings
    /// Acceptance threshold. Has no default and must be set explicitly.
    pub min_confidence: Option<f64>,
    pub weights: ConfidenceWeights,
    /// Similarity at or above which a record duplicates a stored lead.
    pub fuzzy_threshold: f64,
    pub known_categories: Vec<String>,
    /// Validation passes allowed for records quarantined by a transient
    /// verification failure.
    pub max_validation_passes: u32,
    /// Records validated concurrently.
    pub max_parallel_validation: usize,

    // Analysis settings
    pub max_parallel_analysis: usize,

    // Storage settings
    pub sinks: Vec<SinkConfig>,
    pub sink_policy: SinkPolicy,
    /// Root directory for run reports.
    pub results_path: PathBuf,
    /// Also write the stored leads as a flat CSV while reporting.
    pub export_csv: bool,

    // Trigger settings
    /// Six-field cron expression for the scheduled trigger.
    pub schedule_cron: String,
    /// Address the HTTP trigger listens on.
    pub bind: String,
    /// Lifetime of the run lease between heartbeats.
    #[serde(with = "duration_ms")]
    pub lease_ttl: Duration,
    /// Finished runs kept for `GET /runs`.
    pub run_history: usize,
    /// Interval between progress log lines during a run.
    #[serde(with = "duration_ms")]
    pub progress_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            max_parallel_workers: 100,
            retry: RetryPolicy::default(),
            timeouts: Timeouts::default(),
            cancel_grace: Duration::from_secs(10),
            router: RouterConfig::default(),
            endpoints: Endpoints::default(),

            min_confidence: None,
            weights: ConfidenceWeights::default(),
            fuzzy_threshold: 0.85,
            known_categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            max_validation_passes: 3,
            max_parallel_validation: 16,

            max_parallel_analysis: 8,

            sinks: vec![SinkConfig::primary(
                "results",
                SinkKind::Jsonl {
                    dir: PathBuf::from("./results/leads"),
                },
            )],
            sink_policy: SinkPolicy::RequirePrimary,
            results_path: PathBuf::from("./results"),
            export_csv: true,

            schedule_cron: "0 0 5 * * *".to_string(),
            bind: "0.0.0.0:8080".to_string(),
            lease_ttl: Duration::from_secs(60),
            run_history: 50,
            progress_interval: Duration::from_secs(30),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from defaults and environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LEAD_SOURCES`: Comma-separated `id=locator` pairs
    /// - `LEAD_MAX_PARALLEL_WORKERS`: Acquisition workers (default: 100)
    /// - `LEAD_MAX_RETRIES`: Extra attempts after the first (default: 3)
    /// - `LEAD_RETRY_BASE_DELAY_MS` / `LEAD_RETRY_MAX_DELAY_MS`: Backoff bounds
    /// - `LEAD_RETRY_JITTER`: Randomise backoff delays (default: true)
    /// - `LEAD_ACQUISITION_TIMEOUT_MS`, `LEAD_VERIFICATION_TIMEOUT_MS`,
    ///   `LEAD_ANALYSIS_TIMEOUT_MS`, `LEAD_SINK_TIMEOUT_MS`: Call deadlines
    /// - `LEAD_CANCEL_GRACE_MS`: Grace period after cancellation
    /// - `LEAD_PRIMARY_VENUE` / `LEAD_FORCE_VENUE`: `local` or `cloud`
    /// - `LEAD_FAILURE_THRESHOLD`, `LEAD_RECOVERY_TIMEOUT_MS`: Breaker tuning
    /// - `LEAD_MIN_CONFIDENCE`: Acceptance threshold (required)
    /// - `LEAD_FUZZY_THRESHOLD`: Duplicate similarity threshold (default: 0.85)
    /// - `LEAD_KNOWN_CATEGORIES`: Comma-separated category list
    /// - `LEAD_MAX_PARALLEL_ANALYSIS`: Concurrent analyses (default: 8)
    /// - `LEAD_SINK_POLICY`: `require_primary` or `require_any`
    /// - `LEAD_RESULTS_PATH`: Report directory (default: ./results)
    /// - `LEAD_EXPORT_CSV`: Write `exports/leads_<run_id>.csv` (default: true)
    /// - `LEAD_CLOUD_ACQUIRER_URL`, `LEAD_VERIFIER_URL`, `LEAD_ANALYZER_URL`
    /// - `LEAD_SCHEDULE_CRON`: Cron expression (default: `0 0 5 * * *`)
    /// - `LEAD_BIND`: HTTP listen address (default: 0.0.0.0:8080)
    /// - `LEAD_LEASE_TTL_MS`: Run lease lifetime (default: 60000)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the result
    /// fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a YAML file, then applies environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        let config = config.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `LEAD_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies `LEAD_*` overrides from an arbitrary lookup.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Acquisition settings
        if let Some(val) = lookup("LEAD_SOURCES") {
            self.sources = parse_sources(&val)?;
        }

        if let Some(val) = lookup("LEAD_MAX_PARALLEL_WORKERS") {
            self.max_parallel_workers = parse_env_value(&val, "LEAD_MAX_PARALLEL_WORKERS")?;
        }

        if let Some(val) = lookup("LEAD_MAX_RETRIES") {
            self.retry.max_retries = parse_env_value(&val, "LEAD_MAX_RETRIES")?;
        }

        if let Some(val) = lookup("LEAD_RETRY_BASE_DELAY_MS") {
            self.retry.base_delay = parse_env_millis(&val, "LEAD_RETRY_BASE_DELAY_MS")?;
        }

        if let Some(val) = lookup("LEAD_RETRY_MAX_DELAY_MS") {
            self.retry.max_delay = parse_env_millis(&val, "LEAD_RETRY_MAX_DELAY_MS")?;
        }

        if let Some(val) = lookup("LEAD_RETRY_JITTER") {
            self.retry.jitter = parse_env_bool(&val, "LEAD_RETRY_JITTER")?;
        }

        if let Some(val) = lookup("LEAD_ACQUISITION_TIMEOUT_MS") {
            self.timeouts.acquisition = parse_env_millis(&val, "LEAD_ACQUISITION_TIMEOUT_MS")?;
        }

        if let Some(val) = lookup("LEAD_VERIFICATION_TIMEOUT_MS") {
            self.timeouts.verification = parse_env_millis(&val, "LEAD_VERIFICATION_TIMEOUT_MS")?;
        }

        if let Some(val) = lookup("LEAD_ANALYSIS_TIMEOUT_MS") {
            self.timeouts.analysis = parse_env_millis(&val, "LEAD_ANALYSIS_TIMEOUT_MS")?;
        }

        if let Some(val) = lookup("LEAD_SINK_TIMEOUT_MS") {
            self.timeouts.sink = parse_env_millis(&val, "LEAD_SINK_TIMEOUT_MS")?;
        }

        if let Some(val) = lookup("LEAD_CANCEL_GRACE_MS") {
            self.cancel_grace = parse_env_millis(&val, "LEAD_CANCEL_GRACE_MS")?;
        }

        // Routing settings
        if let Some(val) = lookup("LEAD_PRIMARY_VENUE") {
            self.router.primary = parse_env_value(&val, "LEAD_PRIMARY_VENUE")?;
        }

        if let Some(val) = lookup("LEAD_FORCE_VENUE") {
            self.router.force_venue = if val.trim().is_empty() {
                None
            } else {
                Some(parse_env_value::<Venue>(&val, "LEAD_FORCE_VENUE")?)
            };
        }

        if let Some(val) = lookup("LEAD_FAILURE_THRESHOLD") {
            self.router.breaker.failure_threshold = parse_env_value(&val, "LEAD_FAILURE_THRESHOLD")?;
        }

        if let Some(val) = lookup("LEAD_RECOVERY_TIMEOUT_MS") {
            self.router.breaker.recovery_timeout =
                parse_env_millis(&val, "LEAD_RECOVERY_TIMEOUT_MS")?;
        }

        // Validation settings
        if let Some(val) = lookup("LEAD_MIN_CONFIDENCE") {
            self.min_confidence = Some(parse_env_value(&val, "LEAD_MIN_CONFIDENCE")?);
        }

        if let Some(val) = lookup("LEAD_FUZZY_THRESHOLD") {
            self.fuzzy_threshold = parse_env_value(&val, "LEAD_FUZZY_THRESHOLD")?;
        }

        if let Some(val) = lookup("LEAD_KNOWN_CATEGORIES") {
            self.known_categories = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Analysis and storage settings
        if let Some(val) = lookup("LEAD_MAX_PARALLEL_ANALYSIS") {
            self.max_parallel_analysis = parse_env_value(&val, "LEAD_MAX_PARALLEL_ANALYSIS")?;
        }

        if let Some(val) = lookup("LEAD_SINK_POLICY") {
            self.sink_policy = parse_env_value(&val, "LEAD_SINK_POLICY")?;
        }

        if let Some(val) = lookup("LEAD_RESULTS_PATH") {
            self.results_path = PathBuf::from(val);
        }

        if let Some(val) = lookup("LEAD_EXPORT_CSV") {
            self.export_csv = parse_env_bool(&val, "LEAD_EXPORT_CSV")?;
        }

        // Endpoints
        if let Some(val) = lookup("LEAD_CLOUD_ACQUIRER_URL") {
            self.endpoints.cloud_acquirer = non_empty(val);
        }

        if let Some(val) = lookup("LEAD_VERIFIER_URL") {
            self.endpoints.verifier = non_empty(val);
        }

        if let Some(val) = lookup("LEAD_ANALYZER_URL") {
            self.endpoints.analyzer = non_empty(val);
        }

        // Trigger settings
        if let Some(val) = lookup("LEAD_SCHEDULE_CRON") {
            self.schedule_cron = val;
        }

        if let Some(val) = lookup("LEAD_BIND") {
            self.bind = val;
        }

        if let Some(val) = lookup("LEAD_LEASE_TTL_MS") {
            self.lease_ttl = parse_env_millis(&val, "LEAD_LEASE_TTL_MS")?;
        }

        Ok(self)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Execution validation
        if self.max_parallel_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_parallel_workers must be greater than 0".to_string(),
            ));
        }

        if self.max_parallel_analysis == 0 || self.max_parallel_validation == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_parallel_analysis and max_parallel_validation must be greater than 0"
                    .to_string(),
            ));
        }

        for (name, timeout) in [
            ("timeouts.acquisition", self.timeouts.acquisition),
            ("timeouts.verification", self.timeouts.verification),
            ("timeouts.analysis", self.timeouts.analysis),
            ("timeouts.sink", self.timeouts.sink),
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::ValidationFailed(
                "retry.base_delay cannot exceed retry.max_delay".to_string(),
            ));
        }

        if self.router.breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationFailed(
                "router.breaker.failure_threshold must be greater than 0".to_string(),
            ));
        }

        // Validation settings
        let Some(min_confidence) = self.min_confidence else {
            return Err(ConfigError::ValidationFailed(
                "min_confidence must be set explicitly (config file or LEAD_MIN_CONFIDENCE)"
                    .to_string(),
            ));
        };

        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(ConfigError::ValidationFailed(
                "min_confidence must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(ConfigError::ValidationFailed(
                "fuzzy_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        let w = &self.weights;
        if w.schema < 0.0 || w.cross_reference < 0.0 || w.external < 0.0 || w.total() <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "weights must be non-negative with a positive sum".to_string(),
            ));
        }

        if self.max_validation_passes == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_validation_passes must be at least 1".to_string(),
            ));
        }

        if self.known_categories.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "known_categories cannot be empty".to_string(),
            ));
        }

        // Storage validation
        let primaries = self
            .sinks
            .iter()
            .filter(|s| s.role == SinkRole::Primary)
            .count();
        if primaries != 1 {
            return Err(ConfigError::ValidationFailed(format!(
                "exactly one sink must have role primary, found {}",
                primaries
            )));
        }

        // Trigger validation
        if let Err(e) = cron::Schedule::from_str(&self.schedule_cron) {
            return Err(ConfigError::ValidationFailed(format!(
                "schedule_cron '{}' is invalid: {}",
                self.schedule_cron, e
            )));
        }

        if self.lease_ttl.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "lease_ttl must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the sources.
    pub fn with_sources(mut self, sources: Vec<SourceSpec>) -> Self {
        self.sources = sources;
        self
    }

    /// Builder method to set the worker count.
    pub fn with_max_parallel_workers(mut self, workers: usize) -> Self {
        self.max_parallel_workers = workers;
        self
    }

    /// Builder method to set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builder method to set call deadlines.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Builder method to set the cancellation grace period.
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Builder method to set router tuning.
    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }

    /// Builder method to set the acceptance threshold.
    pub fn with_min_confidence(mut self, threshold: f64) -> Self {
        self.min_confidence = Some(threshold);
        self
    }

    /// Builder method to set confidence weights.
    pub fn with_weights(mut self, weights: ConfidenceWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Builder method to set the duplicate similarity threshold.
    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    /// Builder method to set the sinks.
    pub fn with_sinks(mut self, sinks: Vec<SinkConfig>) -> Self {
        self.sinks = sinks;
        self
    }

    /// Builder method to set the sink durability policy.
    pub fn with_sink_policy(mut self, policy: SinkPolicy) -> Self {
        self.sink_policy = policy;
        self
    }

    /// Builder method to set the report directory.
    pub fn with_results_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_path = path.into();
        self
    }

    /// Builder method to set the schedule.
    pub fn with_schedule_cron(mut self, cron: impl Into<String>) -> Self {
        self.schedule_cron = cron.into();
        self
    }

    /// Builder method to set the run lease lifetime.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Directory run reports are written to.
    pub fn reports_dir(&self) -> PathBuf {
        self.results_path.join("reports")
    }

    /// Directory the lead CSV export is written to.
    pub fn exports_dir(&self) -> PathBuf {
        self.results_path.join("exports")
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a millisecond duration.
fn parse_env_millis(value: &str, key: &str) -> Result<Duration, ConfigError> {
    parse_env_value::<u64>(value, key).map(Duration::from_millis)
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

/// Parse `id=locator` pairs separated by commas.
fn parse_sources(value: &str) -> Result<Vec<SourceSpec>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((id, locator)) if !id.trim().is_empty() && !locator.trim().is_empty() => {
                Ok(SourceSpec::new(id.trim(), locator.trim()))
            }
            _ => Err(ConfigError::InvalidValue {
                key: "LEAD_SOURCES".to_string(),
                message: format!("expected id=locator, got '{}'", pair),
            }),
        })
        .collect()
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
