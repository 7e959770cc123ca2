//! src/fingerprint.rs
//!
//! Band-energy fingerprints. A frame's dB bins are folded into `bands` contiguous bands,
//! converted to linear power, averaged per band, log-compressed with `log10(e + 1)` and
//! L2-normalised. Log compression is always applied; there is no per-call switch.

use crate::spectrum::{ SpectralFrame, SILENCE_DB };

/// Calibration offset used when turning dB magnitudes into linear power.
pub const REF_DB: f32 = 100.0;
/// Bins below this frequency are discarded by perceptual banding.
pub const MIN_AUDIBLE_HZ: f32 = 20.0;
pub const MIN_BANDS: usize = 4;
pub const MAX_BANDS: usize = 256;
pub const DEFAULT_BANDS: usize = 48;

const NORM_EPS: f32 = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BandingPolicy {
    /// Equal-width bands over the bin index.
    Linear,
    /// Equal-width bands on the mel scale between 20 Hz and Nyquist.
    Perceptual,
}

impl BandingPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Some(BandingPolicy::Linear),
            "perceptual" | "mel" => Some(BandingPolicy::Perceptual),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BandingPolicy::Linear => "linear",
            BandingPolicy::Perceptual => "perceptual",
        }
    }
}

/// Unit-length feature vector, or the all-zero vector for a frame with no energy.
#[derive(Clone, Debug, PartialEq)]
pub struct Fingerprint(Vec<f32>);

impl Fingerprint {
    /// Wrap raw values, normalising them. Non-finite entries become zero.
    pub fn from_values(mut values: Vec<f32>) -> Self {
        for v in values.iter_mut() {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
        l2_normalize_in_place(&mut values);
        Fingerprint(values)
    }

    /// Rebuild a persisted fingerprint. Values that are already unit length are kept
    /// bit-for-bit so a saved reference reloads unchanged.
    pub fn from_stored(values: Vec<f32>) -> Self {
        let fp = Fingerprint(values);
        let norm = fp.norm();
        if norm.is_finite() && (norm - 1.0).abs() <= 1e-4 {
            return fp;
        }
        Self::from_values(fp.0)
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }

    pub fn norm(&self) -> f32 {
        self.0
            .iter()
            .map(|v| v * v)
            .sum::<f32>()
            .sqrt()
    }
}

#[inline]
fn l2_normalize_in_place(x: &mut [f32]) {
    let norm = x
        .iter()
        .map(|v| v * v)
        .sum::<f32>()
        .sqrt();
    if !norm.is_finite() || norm <= NORM_EPS {
        x.iter_mut().for_each(|v| {
            *v = 0.0;
        });
        return;
    }
    for v in x.iter_mut() {
        *v /= norm;
    }
}

#[inline]
pub fn mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Linear power of one dB bin; silence and garbage contribute nothing.
#[inline]
pub fn db_to_power(db: f32) -> f32 {
    if !db.is_finite() || db <= SILENCE_DB {
        return 0.0;
    }
    (10.0f32).powf((db + REF_DB) / 20.0)
}

#[derive(Clone, Debug)]
pub struct FingerprintExtractor {
    bands: usize,
    banding: BandingPolicy,
}

impl FingerprintExtractor {
    pub fn new(bands: usize, banding: BandingPolicy) -> Self {
        Self {
            bands: bands.clamp(MIN_BANDS, MAX_BANDS),
            banding,
        }
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn banding(&self) -> BandingPolicy {
        self.banding
    }

    /// Band index for bin `i` of `frame`, or `None` when the bin is discarded.
    fn band_of(&self, frame: &SpectralFrame, i: usize) -> Option<usize> {
        let b = self.bands;
        match self.banding {
            BandingPolicy::Linear => {
                let width = (frame.len() / b).max(1);
                Some((i / width).min(b - 1))
            }
            BandingPolicy::Perceptual => {
                let f = frame.bin_hz(i);
                if f < MIN_AUDIBLE_HZ {
                    return None;
                }
                let lo = mel(MIN_AUDIBLE_HZ);
                let hi = mel(frame.sample_rate * 0.5);
                if hi <= lo {
                    return None;
                }
                let pos = ((mel(f) - lo) / (hi - lo)) * (b as f32);
                Some((pos.floor().max(0.0) as usize).min(b - 1))
            }
        }
    }

    /// Fingerprint one frame. Frames with fewer bins than bands are rejected so the
    /// caller can skip the tick.
    pub fn extract(&self, frame: &SpectralFrame) -> Option<Fingerprint> {
        if frame.len() < self.bands {
            return None;
        }

        let mut energy = vec![0.0f32; self.bands];
        let mut counts = vec![0usize; self.bands];
        for (i, &db) in frame.bins.iter().enumerate() {
            if let Some(band) = self.band_of(frame, i) {
                energy[band] += db_to_power(db);
                counts[band] += 1;
            }
        }

        let mut v: Vec<f32> = energy
            .iter()
            .zip(counts.iter())
            .map(|(&e, &n)| {
                let mean = if n > 0 { e / (n as f32) } else { 0.0 };
                (mean + 1.0).log10()
            })
            .collect();

        for x in v.iter_mut() {
            if !x.is_finite() {
                *x = 0.0;
            }
        }
        l2_normalize_in_place(&mut v);
        Some(Fingerprint(v))
    }
}
