//! src/reference.rs
//!
//! The single reference slot and the two ways of filling it.

use chrono::{ DateTime, Utc };

use crate::fingerprint::{ db_to_power, Fingerprint, FingerprintExtractor, REF_DB };
use crate::spectrum::{ SpectralFrame, SpectrumAnalyzer, SILENCE_DB };

/// Holds at most one reference. Every write replaces the whole slot.
#[derive(Clone, Debug, Default)]
pub struct ReferenceStore {
    slot: Option<Fingerprint>,
}

impl ReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Fingerprint> {
        self.slot.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.slot.is_some()
    }

    /// Swap in a new reference, returning the one it displaced.
    pub fn replace(&mut self, fp: Fingerprint) -> Option<Fingerprint> {
        self.slot.replace(fp)
    }

    pub fn clear(&mut self) -> Option<Fingerprint> {
        self.slot.take()
    }
}

/// How a capture attempt ended. Only `Captured` touches the store.
#[derive(Clone, Debug, PartialEq)]
pub enum CaptureOutcome {
    Captured(Fingerprint),
    /// Nothing with energy was heard during the window.
    Silent,
    /// The window was cancelled before it expired.
    Aborted,
}

/// A timed live capture.
///
/// Frames seen during the window are folded into an energy-weighted average: each
/// frame's per-bin linear power is weighted by that frame's total power, so the loud
/// frames carrying the target sound dominate the quiet ones around it. The averaged
/// spectrum is turned back into dB and handed to the extractor, the same path live
/// ticks use. Frames whose length differs from the first one seen are ignored.
#[derive(Clone, Debug)]
pub struct LiveCapture {
    started: DateTime<Utc>,
    duration_ms: u64,
    weighted: Vec<f64>,
    weight: f64,
    sample_rate: f32,
    frames_seen: usize,
}

impl LiveCapture {
    pub fn begin(duration_ms: u64, now: DateTime<Utc>) -> Self {
        Self {
            started: now,
            duration_ms,
            weighted: Vec::new(),
            weight: 0.0,
            sample_rate: 0.0,
            frames_seen: 0,
        }
    }

    pub fn frames_seen(&self) -> usize {
        self.frames_seen
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.started).num_milliseconds() >= (self.duration_ms as i64)
    }

    pub fn observe(&mut self, frame: &SpectralFrame) {
        if frame.is_empty() {
            return;
        }
        if self.weighted.is_empty() {
            self.weighted = vec![0.0; frame.len()];
            self.sample_rate = frame.sample_rate;
        } else if self.weighted.len() != frame.len() {
            return;
        }

        let power: Vec<f64> = frame.bins
            .iter()
            .map(|&db| db_to_power(db) as f64)
            .collect();
        let energy: f64 = power.iter().sum();
        self.frames_seen += 1;
        if !energy.is_finite() || energy <= 0.0 {
            return;
        }
        for (acc, p) in self.weighted.iter_mut().zip(power) {
            *acc += energy * p;
        }
        self.weight += energy;
    }

    /// The averaged spectrum, or `None` if no frame carried energy.
    pub fn averaged_frame(&self) -> Option<SpectralFrame> {
        if self.weight <= 0.0 || !self.weight.is_finite() {
            return None;
        }
        let bins = self.weighted
            .iter()
            .map(|acc| {
                let p = acc / self.weight;
                if p > 0.0 {
                    ((20.0 * p.log10()) as f32 - REF_DB).max(SILENCE_DB)
                } else {
                    SILENCE_DB
                }
            })
            .collect();
        Some(SpectralFrame::new(bins, self.sample_rate))
    }

    /// Close the window normally.
    pub fn finish(&self, extractor: &FingerprintExtractor) -> CaptureOutcome {
        let fp = self.averaged_frame().and_then(|f| extractor.extract(&f));
        match fp {
            Some(fp) if !fp.is_zero() => CaptureOutcome::Captured(fp),
            _ => CaptureOutcome::Silent,
        }
    }

    /// Cancel the window. Partial data is discarded.
    pub fn cancel(self) -> CaptureOutcome {
        CaptureOutcome::Aborted
    }
}

/// Start index of the `window`-sample block centred on the loudest sample.
pub fn peak_window_start(samples: &[f32], window: usize) -> usize {
    if samples.len() <= window {
        return 0;
    }
    let mut peak_i = 0usize;
    let mut peak_v = -1.0f32;
    for (i, s) in samples.iter().enumerate() {
        let a = s.abs();
        if a.is_finite() && a > peak_v {
            peak_v = a;
            peak_i = i;
        }
    }
    peak_i.saturating_sub(window / 2).min(samples.len() - window)
}

/// Offline capture: take the window around the waveform's peak and run it through the
/// same spectrum and extractor path as live frames. Waveforms shorter than the analysis
/// size are zero-padded at the front.
pub fn capture_from_waveform(
    samples: &[f32],
    sample_rate: f32,
    analyzer: &mut SpectrumAnalyzer,
    extractor: &FingerprintExtractor
) -> CaptureOutcome {
    let n = analyzer.fft_size();
    let block: Vec<f32> = if samples.len() >= n {
        let start = peak_window_start(samples, n);
        samples[start..start + n].to_vec()
    } else {
        let mut padded = vec![0.0f32; n - samples.len()];
        padded.extend_from_slice(samples);
        padded
    };

    let fp = analyzer.frame(&block, sample_rate).and_then(|f| extractor.extract(&f));
    match fp {
        Some(fp) if !fp.is_zero() => CaptureOutcome::Captured(fp),
        _ => CaptureOutcome::Silent,
    }
}
