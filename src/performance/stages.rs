use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A window during which concurrency ramps linearly toward `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "crate::performance::metrics::duration_ms")]
    pub duration: Duration,
    pub target: u32,
}

impl Stage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

/// Where a point in time falls on the timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagePosition {
    pub index: usize,
    /// Progress through the stage, in `[0, 1)`.
    pub fraction: f64,
}

/// Target concurrency as a function of elapsed time.
#[derive(Debug, Clone)]
pub struct RampTimeline {
    stages: Vec<Stage>,
    start_level: u32,
    total: Duration,
}

impl RampTimeline {
    pub fn new(stages: Vec<Stage>) -> Result<Self, ConfigError> {
        Self::with_start_level(stages, 0)
    }

    /// Build a timeline whose first stage ramps from `start_level` instead of 0.
    pub fn with_start_level(stages: Vec<Stage>, start_level: u32) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::NoStages);
        }
        if let Some(index) = stages.iter().position(|s| s.duration.is_zero()) {
            return Err(ConfigError::ZeroDurationStage { index });
        }

        let total = stages.iter().map(|s| s.duration).sum();
        Ok(Self {
            stages,
            start_level,
            total,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    pub fn peak(&self) -> u32 {
        self.stages
            .iter()
            .map(|s| s.target)
            .max()
            .unwrap_or(0)
            .max(self.start_level)
    }

    /// Level entering stage `index`.
    fn entry_level(&self, index: usize) -> u32 {
        if index == 0 {
            self.start_level
        } else {
            self.stages[index - 1].target
        }
    }

    /// `None` once the timeline is over.
    pub fn position(&self, elapsed: Duration) -> Option<StagePosition> {
        let mut stage_start = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let into = elapsed.saturating_sub(stage_start);
                return Some(StagePosition {
                    index,
                    fraction: into.as_secs_f64() / stage.duration.as_secs_f64(),
                });
            }
            stage_start = stage_end;
        }
        None
    }

    /// Unrounded target at `elapsed`. Zero after the last stage.
    pub fn level_at(&self, elapsed: Duration) -> f64 {
        match self.position(elapsed) {
            Some(StagePosition { index, fraction }) => {
                let from = self.entry_level(index) as f64;
                let to = self.stages[index].target as f64;
                from + (to - from) * fraction
            }
            None => 0.0,
        }
    }

    /// Worker count to hold at `elapsed`, rounded half-up.
    pub fn target_at(&self, elapsed: Duration) -> u32 {
        round_half_up(self.level_at(elapsed))
    }
}

pub fn round_half_up(level: f64) -> u32 {
    if level <= 0.0 {
        0
    } else {
        (level + 0.5).floor() as u32
    }
}
