//! src/detector.rs
//!
//! Debounced detection. The state record is threaded through [`tick`], which is pure:
//! the same state, input and config always give the same answer, so any host loop can
//! drive it.

use chrono::{ DateTime, Utc };

use crate::error::{ Error, Result };

pub const DEFAULT_THRESHOLD: f32 = 0.2;
pub const DEFAULT_COOLDOWN_MS: u64 = 2000;
pub const MAX_COOLDOWN_MS: u64 = 3_600_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThresholdDirection {
    /// Match when `distance <= threshold`.
    MatchBelow,
    /// Match when `distance >= threshold`.
    MatchAbove,
}

impl ThresholdDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "below" | "matchbelow" | "match-below" => Some(ThresholdDirection::MatchBelow),
            "above" | "matchabove" | "match-above" => Some(ThresholdDirection::MatchAbove),
            _ => None,
        }
    }

    #[inline]
    pub fn matches(&self, distance: f32, threshold: f32) -> bool {
        if !distance.is_finite() {
            return false;
        }
        match self {
            ThresholdDirection::MatchBelow => distance <= threshold,
            ThresholdDirection::MatchAbove => distance >= threshold,
        }
    }
}

/// Validated detection parameters. Build through [`DetectionConfig::new`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionConfig {
    threshold: f32,
    direction: ThresholdDirection,
    cooldown_ms: u64,
}

impl DetectionConfig {
    pub fn new(threshold: f32, direction: ThresholdDirection, cooldown_ms: u64) -> Result<Self> {
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(Error::InvalidConfig(format!("threshold {} outside [0, 1]", threshold)));
        }
        if cooldown_ms > MAX_COOLDOWN_MS {
            return Err(
                Error::InvalidConfig(
                    format!("cooldown {} ms exceeds {} ms", cooldown_ms, MAX_COOLDOWN_MS)
                )
            );
        }
        Ok(Self { threshold, direction, cooldown_ms })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
    pub fn direction(&self) -> ThresholdDirection {
        self.direction
    }
    pub fn cooldown_ms(&self) -> u64 {
        self.cooldown_ms
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            direction: ThresholdDirection::MatchBelow,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionEvent {
    pub timestamp: DateTime<Utc>,
    pub distance: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Armed,
    Cooldown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DetectorState {
    pub phase: Phase,
    pub last_trigger: Option<DateTime<Utc>>,
}

impl Default for DetectorState {
    fn default() -> Self {
        Self { phase: Phase::Idle, last_trigger: None }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TickInput {
    pub distance: f32,
    pub now: DateTime<Utc>,
    pub has_reference: bool,
}

/// Advance the detector by one tick.
pub fn tick(
    state: DetectorState,
    input: TickInput,
    config: &DetectionConfig
) -> (DetectorState, Option<DetectionEvent>) {
    if !input.has_reference {
        return (DetectorState::default(), None);
    }

    let mut phase = match state.phase {
        Phase::Idle => Phase::Armed,
        other => other,
    };

    let mut last_trigger = state.last_trigger;
    if phase == Phase::Cooldown {
        let expired = match last_trigger {
            // clock stepped back: restart the window from now so it still ends
            Some(last) if input.now < last => {
                last_trigger = Some(input.now);
                false
            }
            Some(last) => (input.now - last).num_milliseconds() >= (config.cooldown_ms as i64),
            None => true,
        };
        if expired {
            phase = Phase::Armed;
        }
    }

    if phase == Phase::Armed && config.direction.matches(input.distance, config.threshold) {
        let event = DetectionEvent { timestamp: input.now, distance: input.distance };
        let next = DetectorState { phase: Phase::Cooldown, last_trigger: Some(input.now) };
        return (next, Some(event));
    }

    (DetectorState { phase, last_trigger }, None)
}
