//! Declarative pass/fail rules over the recorded metrics.
//!
//! Expressions such as `p(95)<2000` are parsed once, when the configuration
//! is loaded, into a [`ThresholdSpec`]. Evaluation then works on the typed
//! form only.
//!
//! Duration aggregates are computed over successful calls only. Failed calls
//! are visible through the `call_failed` and `calls` metrics, which are
//! defined over all calls.

use crate::error::ConfigError;
use crate::performance::metrics::{mean, percentile_sorted, MetricsSnapshot};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Latency of successful calls, in milliseconds.
    CallDuration,
    /// Failed calls, over all calls.
    CallFailed,
    /// All calls.
    Calls,
}

impl Metric {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim() {
            "call_duration" | "grpc_req_duration" => Ok(Metric::CallDuration),
            "call_failed" | "errors" => Ok(Metric::CallFailed),
            "calls" | "iterations" => Ok(Metric::Calls),
            other => Err(ConfigError::UnknownMetric(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::CallDuration => "call_duration",
            Metric::CallFailed => "call_failed",
            Metric::Calls => "calls",
        }
    }

    fn supports(&self, aggregator: &Aggregator) -> bool {
        match self {
            Metric::CallDuration => !matches!(aggregator, Aggregator::Rate),
            Metric::CallFailed => matches!(aggregator, Aggregator::Rate | Aggregator::Count),
            Metric::Calls => matches!(aggregator, Aggregator::Count),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregator {
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
    Count,
    Rate,
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregator::Avg => write!(f, "avg"),
            Aggregator::Min => write!(f, "min"),
            Aggregator::Max => write!(f, "max"),
            Aggregator::Med => write!(f, "med"),
            Aggregator::Percentile(p) => write!(f, "p({})", p),
            Aggregator::Count => write!(f, "count"),
            Aggregator::Rate => write!(f, "rate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl Comparator {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "<" => Some(Comparator::Lt),
            "<=" => Some(Comparator::Le),
            ">" => Some(Comparator::Gt),
            ">=" => Some(Comparator::Ge),
            _ => None,
        }
    }

    pub fn holds(&self, observed: f64, limit: f64) -> bool {
        match self {
            Comparator::Lt => observed < limit,
            Comparator::Le => observed <= limit,
            Comparator::Gt => observed > limit,
            Comparator::Ge => observed >= limit,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSpec {
    pub metric: Metric,
    pub aggregator: Aggregator,
    pub comparator: Comparator,
    pub limit: f64,
}

fn expression_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(avg|min|max|med|count|rate|p\(\s*(\d+(?:\.\d+)?)\s*\))\s*(<=|>=|<|>)\s*(-?\d+(?:\.\d+)?)\s*$",
        )
        .expect("threshold expression regex is valid")
    })
}

impl ThresholdSpec {
    /// Parse one expression declared under `metric`.
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidThreshold {
            metric: metric.to_string(),
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let parsed_metric = Metric::parse(metric)?;
        let caps = expression_regex()
            .captures(expression)
            .ok_or_else(|| invalid("expected '<aggregator><comparator><limit>', e.g. p(95)<2000"))?;

        let aggregator = match &caps[1] {
            "avg" => Aggregator::Avg,
            "min" => Aggregator::Min,
            "max" => Aggregator::Max,
            "med" => Aggregator::Med,
            "count" => Aggregator::Count,
            "rate" => Aggregator::Rate,
            _ => {
                let p: f64 = caps[2].parse().map_err(|_| invalid("bad percentile"))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(invalid("percentile must be within 0..=100"));
                }
                Aggregator::Percentile(p)
            }
        };

        if !parsed_metric.supports(&aggregator) {
            return Err(invalid(&format!(
                "aggregator '{}' does not apply to {}",
                aggregator,
                parsed_metric.name()
            )));
        }

        let comparator = Comparator::parse(&caps[3]).ok_or_else(|| invalid("bad comparator"))?;
        let limit: f64 = caps[4].parse().map_err(|_| invalid("bad limit"))?;

        Ok(Self {
            metric: parsed_metric,
            aggregator,
            comparator,
            limit,
        })
    }

    /// The aggregate this threshold looks at, or `None` when the series it
    /// needs is empty.
    pub fn observe(&self, snapshot: &MetricsSnapshot) -> Option<f64> {
        match self.metric {
            Metric::CallDuration => {
                let ok = snapshot.ok_durations_ms();
                match self.aggregator {
                    Aggregator::Avg => mean(ok),
                    Aggregator::Min => ok.first().copied(),
                    Aggregator::Max => ok.last().copied(),
                    Aggregator::Med => percentile_sorted(ok, 50.0),
                    Aggregator::Percentile(p) => percentile_sorted(ok, p),
                    Aggregator::Count => Some(ok.len() as f64),
                    Aggregator::Rate => None,
                }
            }
            Metric::CallFailed => match self.aggregator {
                Aggregator::Rate => snapshot.failure_rate(),
                Aggregator::Count => Some(snapshot.failed_count() as f64),
                _ => None,
            },
            Metric::Calls => match self.aggregator {
                Aggregator::Count => Some(snapshot.total_count() as f64),
                _ => None,
            },
        }
    }

    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> Verdict {
        let observed = self.observe(snapshot);
        let passed = observed
            .map(|value| self.comparator.holds(value, self.limit))
            .unwrap_or(false);

        Verdict {
            threshold: self.clone(),
            observed,
            passed,
        }
    }
}

impl fmt::Display for ThresholdSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.metric.name(),
            self.aggregator,
            self.comparator,
            self.limit
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub threshold: ThresholdSpec,
    pub observed: Option<f64>,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunVerdict {
    pub verdicts: Vec<Verdict>,
    pub passed: bool,
}

impl RunVerdict {
    pub fn failed(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts.iter().filter(|v| !v.passed)
    }
}

/// Evaluate every threshold. The run passes only if all of them pass.
pub fn evaluate_all(specs: &[ThresholdSpec], snapshot: &MetricsSnapshot) -> RunVerdict {
    let verdicts: Vec<Verdict> = specs.iter().map(|spec| spec.evaluate(snapshot)).collect();
    let passed = verdicts.iter().all(|v| v.passed);
    RunVerdict { verdicts, passed }
}
