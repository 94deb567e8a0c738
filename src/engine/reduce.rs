//! Result Reducer: picks winners out of a list of outcomes.
//!
//! Failed outcomes never win. Ties go to the earliest entry. Every function
//! returns `None` when nothing qualifies, so callers must handle an all-failed
//! run explicitly.

use super::core::EncodeOutcome;

/// Index and outcome of the winner
pub type Best<'a> = Option<(usize, &'a EncodeOutcome)>;

fn best_by<'a, F>(outcomes: &'a [EncodeOutcome], score: F) -> Best<'a>
where
    F: Fn(&EncodeOutcome) -> Option<f64>,
{
    let mut best: Option<(usize, &EncodeOutcome, f64)> = None;
    for (i, outcome) in outcomes.iter().enumerate() {
        if !outcome.success {
            continue;
        }
        let Some(value) = score(outcome).filter(|v| v.is_finite()) else {
            continue;
        };
        // strictly greater keeps the first of equal scores
        if best.is_none_or(|(_, _, top)| value > top) {
            best = Some((i, outcome, value));
        }
    }
    best.map(|(i, outcome, _)| (i, outcome))
}

/// Highest speed multiplier
pub fn best_by_speed(outcomes: &[EncodeOutcome]) -> Best<'_> {
    best_by(outcomes, |o| o.avg_speed)
}

/// Highest frames per second
pub fn best_by_fps(outcomes: &[EncodeOutcome]) -> Best<'_> {
    best_by(outcomes, |o| o.avg_fps)
}

/// Speed per megabyte of output
pub fn efficiency(outcome: &EncodeOutcome) -> Option<f64> {
    let speed = outcome.avg_speed?;
    let size_mb = outcome.file_size_mb().filter(|mb| *mb > 0.0)?;
    Some(speed / size_mb)
}

/// Highest `speed / file size (MB)`
pub fn best_by_efficiency(outcomes: &[EncodeOutcome]) -> Best<'_> {
    best_by(outcomes, efficiency)
}

/// All three rankings at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Podium {
    pub speed: Option<usize>,
    pub fps: Option<usize>,
    pub efficiency: Option<usize>,
}

impl Podium {
    pub fn of(outcomes: &[EncodeOutcome]) -> Self {
        Self {
            speed: best_by_speed(outcomes).map(|(i, _)| i),
            fps: best_by_fps(outcomes).map(|(i, _)| i),
            efficiency: best_by_efficiency(outcomes).map(|(i, _)| i),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.speed.is_none() && self.fps.is_none() && self.efficiency.is_none()
    }
}
