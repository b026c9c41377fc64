use crate::error::ConfigError;
use crate::performance::payload::{IdentifierPool, Mutation, PayloadProvider, PayloadSource};
use crate::performance::stages::{RampTimeline, Stage};
use crate::performance::thresholds::ThresholdSpec;
use crate::utils::parse_duration;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_TICK: &str = "1s";
const DEFAULT_GRACE_PERIOD: &str = "30s";
const DEFAULT_CALL_TIMEOUT: &str = "60s";
const DEFAULT_CONNECT_TIMEOUT: &str = "10s";
const DEFAULT_MUTATION_BOUND: u64 = 1_000_000;

/// A run configuration as written in YAML.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub name: String,
    pub description: Option<String>,
    pub target: TargetConfig,
    pub stages: Vec<StageConfig>,
    /// Start level of the first stage. Defaults to 0.
    pub start_concurrency: Option<u32>,
    #[serde(default)]
    pub thresholds: IndexMap<String, Vec<String>>,
    pub payload: PayloadConfig,
    /// Delay between iterations of one worker.
    pub pacing: Option<String>,
    pub tick: Option<String>,
    pub grace_period: Option<String>,
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub endpoint: String,
    /// Fully qualified method, e.g. `profile.v1.ProfileIdentityService/UpdateHandle`.
    pub method: String,
    #[serde(default)]
    pub tls: bool,
    /// Server name to verify when TLS is on. Defaults to the endpoint host.
    pub tls_domain: Option<String>,
    pub timeout: Option<String>,
    pub connect_timeout: Option<String>,
    #[serde(default)]
    pub metadata: IndexMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub duration: String,
    pub target: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "mode", rename_all = "snake_case", deny_unknown_fields)]
pub enum PayloadConfig {
    Fixed {
        identifier: String,
        mutation: Option<MutationConfig>,
    },
    Pooled {
        /// JSON array of strings, or CSV (see `column`). Relative to the config file.
        file: Option<PathBuf>,
        column: Option<String>,
        identifiers: Option<Vec<String>>,
        mutation: Option<MutationConfig>,
    },
    Random {
        mutation: Option<MutationConfig>,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct MutationConfig {
    pub prefix: String,
    pub bound: Option<u64>,
}

impl From<&MutationConfig> for Mutation {
    fn from(config: &MutationConfig) -> Self {
        Mutation {
            prefix: config.prefix.clone(),
            bound: config.bound.unwrap_or(DEFAULT_MUTATION_BOUND),
        }
    }
}

impl RunConfig {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_yaml(&content, path)
    }

    pub fn from_yaml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Where and how to call the service under test.
#[derive(Debug, Clone)]
pub struct TargetSettings {
    pub endpoint: String,
    pub method: String,
    pub tls: bool,
    pub tls_domain: Option<String>,
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
    pub metadata: IndexMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub tick: Duration,
    pub grace_period: Duration,
    pub pacing: Duration,
    pub seed: Option<u64>,
}

/// A validated configuration. Building one is the only place configuration
/// errors can come from; once a plan exists the run always produces a verdict.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub name: String,
    pub target: TargetSettings,
    pub timeline: RampTimeline,
    pub thresholds: Vec<ThresholdSpec>,
    pub payloads: PayloadProvider,
    pub schedule: ScheduleSettings,
}

/// Command-line overrides applied on top of the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub seed: Option<u64>,
    pub tick: Option<String>,
    pub metadata: IndexMap<String, String>,
}

fn duration_or(value: Option<&str>, default: &str) -> Result<Duration, ConfigError> {
    parse_duration(value.unwrap_or(default))
}

/// Add a scheme when missing and check the result is a usable URL.
pub fn normalize_endpoint(endpoint: &str, tls: bool) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };

    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty endpoint".to_string()));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else if tls {
        format!("https://{}", trimmed)
    } else {
        format!("http://{}", trimmed)
    };

    let url = Url::parse(&candidate).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    match (tls, url.scheme()) {
        (true, "http") => {
            return Err(invalid("tls is enabled but the scheme is http".to_string()))
        }
        (false, "https") => {
            return Err(invalid(
                "scheme is https but tls is not enabled (set target.tls: true)".to_string(),
            ))
        }
        _ => {}
    }

    Ok(candidate.trim_end_matches('/').to_string())
}

pub fn validate_method(method: &str) -> Result<String, ConfigError> {
    let trimmed = method.trim().trim_start_matches('/');
    let parts: Vec<&str> = trimmed.split('/').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::InvalidMethod(method.to_string()));
    }
    Ok(trimmed.to_string())
}

fn validate_metadata(metadata: &IndexMap<String, String>) -> Result<(), ConfigError> {
    for (key, value) in metadata {
        let key_ok = !key.is_empty()
            && key
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"-_.".contains(&b));
        if !key_ok {
            return Err(ConfigError::InvalidMetadata(format!(
                "key '{}' must be lowercase ascii letters, digits, '-', '_' or '.'",
                key
            )));
        }
        if key.ends_with("-bin") {
            return Err(ConfigError::InvalidMetadata(format!(
                "binary metadata key '{}' is not supported",
                key
            )));
        }
        if !value.bytes().all(|b| (0x20..0x7f).contains(&b)) {
            return Err(ConfigError::InvalidMetadata(format!(
                "value for '{}' must be printable ascii",
                key
            )));
        }
    }
    Ok(())
}

impl RunPlan {
    /// Validate `config` and load everything the run needs up front.
    /// `base_dir` resolves relative pool files.
    pub async fn from_config(
        config: RunConfig,
        base_dir: &Path,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let stages = config
            .stages
            .iter()
            .map(|s| Ok(Stage::new(parse_duration(&s.duration)?, s.target)))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let timeline =
            RampTimeline::with_start_level(stages, config.start_concurrency.unwrap_or(0))?;

        let mut thresholds = Vec::new();
        for (metric, expressions) in &config.thresholds {
            for expression in expressions {
                thresholds.push(ThresholdSpec::parse(metric, expression)?);
            }
        }

        let target = &config.target;
        let mut metadata: IndexMap<String, String> = target
            .metadata
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        metadata.extend(overrides.metadata.clone());
        validate_metadata(&metadata)?;

        let endpoint = overrides.endpoint.as_deref().unwrap_or(&target.endpoint);
        let target = TargetSettings {
            endpoint: normalize_endpoint(endpoint, target.tls)?,
            method: validate_method(&target.method)?,
            tls: target.tls,
            tls_domain: target.tls_domain.clone(),
            call_timeout: duration_or(target.timeout.as_deref(), DEFAULT_CALL_TIMEOUT)?,
            connect_timeout: duration_or(
                target.connect_timeout.as_deref(),
                DEFAULT_CONNECT_TIMEOUT,
            )?,
            metadata,
        };
        if target.call_timeout.is_zero() {
            return Err(ConfigError::Invalid("target.timeout must be positive".into()));
        }

        let payloads = build_payloads(&config.payload, base_dir).await?;

        let tick = duration_or(
            overrides.tick.as_deref().or(config.tick.as_deref()),
            DEFAULT_TICK,
        )?;
        if tick.is_zero() {
            return Err(ConfigError::Invalid("tick must be positive".into()));
        }

        let schedule = ScheduleSettings {
            tick,
            grace_period: duration_or(config.grace_period.as_deref(), DEFAULT_GRACE_PERIOD)?,
            pacing: duration_or(config.pacing.as_deref(), "0s")?,
            seed: overrides.seed.or(config.seed),
        };

        Ok(Self {
            name: config.name,
            target,
            timeline,
            thresholds,
            payloads,
            schedule,
        })
    }

    /// Load and validate a config file in one go.
    pub async fn load(path: &Path, overrides: &Overrides) -> Result<Self, ConfigError> {
        let config = RunConfig::load(path).await?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_config(config, base_dir, overrides).await
    }
}

async fn build_payloads(
    config: &PayloadConfig,
    base_dir: &Path,
) -> Result<PayloadProvider, ConfigError> {
    let (source, mutation) = match config {
        PayloadConfig::Fixed {
            identifier,
            mutation,
        } => {
            if identifier.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "payload.identifier must not be empty".into(),
                ));
            }
            (PayloadSource::Fixed(identifier.clone()), mutation)
        }
        PayloadConfig::Pooled {
            file,
            column,
            identifiers,
            mutation,
        } => {
            let pool = match (file, identifiers) {
                (Some(file), None) => {
                    let path = if file.is_absolute() {
                        file.clone()
                    } else {
                        base_dir.join(file)
                    };
                    IdentifierPool::load(&path, column.as_deref()).await?
                }
                (None, Some(ids)) => IdentifierPool::new(ids.clone())?,
                _ => {
                    return Err(ConfigError::Pool(
                        "set exactly one of payload.file or payload.identifiers".into(),
                    ))
                }
            };
            (PayloadSource::Pooled(pool), mutation)
        }
        PayloadConfig::Random { mutation } => (PayloadSource::Random, mutation),
    };

    if let Some(m) = mutation {
        if m.bound == Some(0) {
            return Err(ConfigError::Invalid("payload.mutation.bound must be positive".into()));
        }
    }

    Ok(PayloadProvider::new(
        source,
        mutation.as_ref().map(Mutation::from),
    ))
}
