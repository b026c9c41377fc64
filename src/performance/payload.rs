use crate::error::ConfigError;
use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;

/// The request built for one iteration. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub identifier: String,
    pub mutation: Option<String>,
}

/// Identifiers loaded once before the run. Cloning shares the same storage.
#[derive(Debug, Clone)]
pub struct IdentifierPool {
    ids: Arc<[String]>,
}

impl IdentifierPool {
    pub fn new(ids: Vec<String>) -> Result<Self, ConfigError> {
        if ids.is_empty() {
            return Err(ConfigError::Pool("pool is empty".to_string()));
        }
        Ok(Self { ids: ids.into() })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.ids
    }

    /// Uniform draw with replacement.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        &self.ids[rng.gen_range(0..self.ids.len())]
    }

    /// Load a pool from a JSON array of strings or from a CSV file.
    ///
    /// For CSV, `column` names the identifier column in the header row. Without
    /// it the file has no header and the first column of every row is used.
    pub async fn load(path: &Path, column: Option<&str>) -> Result<Self, ConfigError> {
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);

        let ids = if is_csv {
            load_csv_column(path, column)
                .await
                .map_err(|e| ConfigError::Pool(format!("{:#}", e)))?
        } else {
            load_json_array(path)
                .await
                .map_err(|e| ConfigError::Pool(format!("{:#}", e)))?
        };

        Self::new(ids)
    }
}

async fn load_json_array(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read identifier file: {}", path.display()))?;

    let ids: Vec<String> = serde_json::from_str(&content)
        .with_context(|| format!("Expected a JSON array of strings in {}", path.display()))?;

    Ok(ids)
}

async fn load_csv_column(path: &Path, column: Option<&str>) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

    // Without a column name the file is a bare list: no header row.
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(column.is_some())
        .from_reader(content.as_bytes());

    let index = match column {
        Some(name) => reader
            .headers()
            .context("Failed to read CSV headers")?
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("Column '{}' not found in {}", name, path.display()))?,
        None => 0,
    };

    let mut ids = Vec::new();
    for record in reader.records() {
        let record = record.context("Failed to parse CSV record")?;
        if let Some(value) = record.get(index) {
            let value = value.trim();
            if !value.is_empty() {
                ids.push(value.to_string());
            }
        }
    }

    Ok(ids)
}

/// Where the identifier of each payload comes from.
#[derive(Debug, Clone)]
pub enum PayloadSource {
    /// Same identifier on every iteration.
    Fixed(String),
    /// Uniform draw with replacement from a preloaded pool.
    Pooled(IdentifierPool),
    /// Fresh UUIDv4 per iteration, drawn from the worker's RNG.
    Random,
}

/// Per-iteration mutation field, rendered as `<prefix><n>` with `n < bound`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub prefix: String,
    pub bound: u64,
}

impl Mutation {
    pub fn render<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        format!("{}{}", self.prefix, rng.gen_range(0..self.bound.max(1)))
    }
}

#[derive(Debug, Clone)]
pub struct PayloadProvider {
    source: PayloadSource,
    mutation: Option<Mutation>,
}

impl PayloadProvider {
    pub fn new(source: PayloadSource, mutation: Option<Mutation>) -> Self {
        Self { source, mutation }
    }

    pub fn fixed(identifier: impl Into<String>) -> Self {
        Self::new(PayloadSource::Fixed(identifier.into()), None)
    }

    pub fn pooled(pool: IdentifierPool) -> Self {
        Self::new(PayloadSource::Pooled(pool), None)
    }

    pub fn with_mutation(mut self, mutation: Mutation) -> Self {
        self.mutation = Some(mutation);
        self
    }

    pub fn source(&self) -> &PayloadSource {
        &self.source
    }

    pub fn mutation(&self) -> Option<&Mutation> {
        self.mutation.as_ref()
    }

    /// Build the payload for one iteration.
    ///
    /// Takes `&self`: the provider is shared read-only between workers, each
    /// worker brings its own RNG.
    pub fn next_payload<R: Rng + ?Sized>(&self, rng: &mut R) -> Payload {
        let identifier = match &self.source {
            PayloadSource::Fixed(id) => id.clone(),
            PayloadSource::Pooled(pool) => pool.sample(rng).to_string(),
            PayloadSource::Random => uuid::Builder::from_random_bytes(rng.gen())
                .into_uuid()
                .to_string(),
        };

        Payload {
            identifier,
            mutation: self.mutation.as_ref().map(|m| m.render(rng)),
        }
    }

    pub fn describe(&self) -> String {
        let source = match &self.source {
            PayloadSource::Fixed(id) => format!("fixed ({})", id),
            PayloadSource::Pooled(pool) => format!("pooled ({} identifiers)", pool.len()),
            PayloadSource::Random => "random uuid".to_string(),
        };
        match &self.mutation {
            Some(m) => format!("{}, mutation {}<0..{}>", source, m.prefix, m.bound),
            None => source,
        }
    }
}

/// RNG for one worker. With a seed, worker `i` always gets the same stream.
pub fn worker_rng(seed: Option<u64>, worker_id: u64) -> StdRng {
    match seed {
        Some(seed) => {
            StdRng::seed_from_u64(seed ^ worker_id.wrapping_mul(0x9E37_79B9_7F4A_7C15))
        }
        None => StdRng::from_entropy(),
    }
}

/// Count how often each identifier shows up across `iterations` draws.
pub fn draw_histogram<R: Rng + ?Sized>(
    provider: &PayloadProvider,
    rng: &mut R,
    iterations: usize,
) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for _ in 0..iterations {
        *counts.entry(provider.next_payload(rng).identifier).or_insert(0) += 1;
    }
    counts
}
