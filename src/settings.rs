//! src/settings.rs
//!
//! Persisted detection settings:
//!
//! ```json
//! { "threshold": 0.2, "thresholdDirection": "matchBelow", "cooldownMs": 2000,
//!   "referenceFingerprint": [0.01, 0.3, ...], "referenceSampleRate": 48000 }
//! ```
//!
//! `referenceSampleRate` is the rate the reference was analysed at. Files written
//! without it load with `None`, which any engine accepts.
//!
//! Loading never fails. Each field that is missing or malformed falls back to its
//! default on its own; an unreadable or unparseable file yields all defaults.

use serde::{ Deserialize, Serialize };
use serde_json::Value;
use std::{ fs, path::Path };

use crate::detector::{
    DetectionConfig,
    ThresholdDirection,
    DEFAULT_COOLDOWN_MS,
    DEFAULT_THRESHOLD,
    MAX_COOLDOWN_MS,
};
use crate::error::Result;
use crate::fingerprint::{ Fingerprint, MAX_BANDS };

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DirectionField {
    MatchBelow,
    MatchAbove,
}

impl From<ThresholdDirection> for DirectionField {
    fn from(d: ThresholdDirection) -> Self {
        match d {
            ThresholdDirection::MatchBelow => DirectionField::MatchBelow,
            ThresholdDirection::MatchAbove => DirectionField::MatchAbove,
        }
    }
}

impl From<DirectionField> for ThresholdDirection {
    fn from(d: DirectionField) -> Self {
        match d {
            DirectionField::MatchBelow => ThresholdDirection::MatchBelow,
            DirectionField::MatchAbove => ThresholdDirection::MatchAbove,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub threshold: f32,
    pub threshold_direction: DirectionField,
    pub cooldown_ms: u64,
    pub reference_fingerprint: Option<Vec<f32>>,
    pub reference_sample_rate: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            threshold_direction: DirectionField::MatchBelow,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            reference_fingerprint: None,
            reference_sample_rate: None,
        }
    }
}

impl Settings {
    pub fn from_parts(
        config: &DetectionConfig,
        reference: Option<&Fingerprint>,
        sample_rate: u32
    ) -> Self {
        Self {
            threshold: config.threshold(),
            threshold_direction: config.direction().into(),
            cooldown_ms: config.cooldown_ms(),
            reference_fingerprint: reference.map(|f| f.values().to_vec()),
            reference_sample_rate: reference.map(|_| sample_rate),
        }
    }

    /// Drop the reference and the rate it was taken at.
    pub fn clear_reference(&mut self) -> bool {
        self.reference_sample_rate = None;
        self.reference_fingerprint.take().is_some()
    }

    /// Field-by-field lenient parse of a JSON document.
    pub fn from_json_lenient(text: &str) -> Self {
        let defaults = Settings::default();
        let v: Value = match serde_json::from_str(text) {
            Ok(v @ Value::Object(_)) => v,
            _ => {
                return defaults;
            }
        };

        let threshold = v
            .get("threshold")
            .and_then(Value::as_f64)
            .map(|t| t as f32)
            .filter(|t| t.is_finite() && (0.0..=1.0).contains(t))
            .unwrap_or(defaults.threshold);

        let threshold_direction = v
            .get("thresholdDirection")
            .cloned()
            .and_then(|d| serde_json::from_value::<DirectionField>(d).ok())
            .unwrap_or(defaults.threshold_direction);

        let cooldown_ms = v
            .get("cooldownMs")
            .and_then(Value::as_u64)
            .filter(|c| *c <= MAX_COOLDOWN_MS)
            .unwrap_or(defaults.cooldown_ms);

        let reference_fingerprint = v
            .get("referenceFingerprint")
            .and_then(Value::as_array)
            .and_then(|arr| {
                if arr.is_empty() || arr.len() > MAX_BANDS {
                    return None;
                }
                arr.iter()
                    .map(|x| x.as_f64().map(|f| f as f32).filter(|f| f.is_finite()))
                    .collect::<Option<Vec<f32>>>()
            });

        let reference_sample_rate = reference_fingerprint.as_ref().and_then(|_| {
            v.get("referenceSampleRate")
                .and_then(Value::as_u64)
                .filter(|r| *r > 0)
                .and_then(|r| u32::try_from(r).ok())
        });

        Settings {
            threshold,
            threshold_direction,
            cooldown_ms,
            reference_fingerprint,
            reference_sample_rate,
        }
    }

    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_json_lenient(&text),
            Err(_) => Settings::default(),
        }
    }

    /// Write via a temp file and rename so a crash never leaves half a file behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let text = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// The detection config these settings describe; out-of-range values were already
    /// replaced by defaults while loading.
    pub fn detection_config(&self) -> DetectionConfig {
        DetectionConfig::new(
            self.threshold,
            self.threshold_direction.into(),
            self.cooldown_ms
        ).unwrap_or_default()
    }

    pub fn reference(&self) -> Option<Fingerprint> {
        self.reference_fingerprint.as_ref().map(|v| Fingerprint::from_stored(v.clone()))
    }
}
