//! src/spectrum.rs
//!
//! Turns raw mono PCM into the dB magnitude frames the fingerprint stage consumes.

use realfft::{ RealFftPlanner, RealToComplex };
use std::sync::Arc;

/// Magnitudes at or below this level count as silence.
pub const SILENCE_DB: f32 = -160.0;

/// One analysis frame: `bins.len()` dB magnitudes spanning 0..Nyquist.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectralFrame {
    pub bins: Vec<f32>,
    pub sample_rate: f32,
}

impl SpectralFrame {
    pub fn new(bins: Vec<f32>, sample_rate: f32) -> Self {
        Self { bins, sample_rate }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Centre frequency of bin `i` in Hz.
    #[inline]
    pub fn bin_hz(&self, i: usize) -> f32 {
        if self.bins.is_empty() {
            return 0.0;
        }
        ((i as f32) * (self.sample_rate * 0.5)) / (self.bins.len() as f32)
    }
}

#[inline]
fn hann(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let t = (std::f32::consts::PI * (i as f32)) / (n as f32);
            t.sin() * t.sin()
        })
        .collect()
}

/// Hann-windowed real FFT over a fixed block size.
///
/// Output follows the usual analyser convention: `20·log10(|X_k| / n)`, `n/2` bins
/// (the Nyquist bin is dropped so the frame length is a power of two).
pub struct SpectrumAnalyzer {
    fft_size: usize,
    window: Vec<f32>,
    r2c: Arc<dyn RealToComplex<f32>>,
    inbuf: Vec<f32>,
    outbuf: Vec<realfft::num_complex::Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(fft_size);
        let outbuf = r2c.make_output_vec();
        Self {
            fft_size,
            window: hann(fft_size),
            r2c,
            inbuf: vec![0.0; fft_size],
            outbuf,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of bins in every frame this analyser produces.
    pub fn frame_len(&self) -> usize {
        self.fft_size / 2
    }

    /// Analyse the last `fft_size` samples of `samples`. Returns `None` while there
    /// are not enough samples yet.
    pub fn frame(&mut self, samples: &[f32], sample_rate: f32) -> Option<SpectralFrame> {
        if samples.len() < self.fft_size || sample_rate <= 0.0 {
            return None;
        }
        let block = &samples[samples.len() - self.fft_size..];
        for (j, s) in block.iter().enumerate() {
            let v = if s.is_finite() { *s } else { 0.0 };
            self.inbuf[j] = v * self.window[j];
        }
        self.r2c.process(&mut self.inbuf, &mut self.outbuf).ok()?;

        let scale = 1.0 / (self.fft_size as f32);
        let bins = self.outbuf
            .iter()
            .take(self.frame_len())
            .map(|c| {
                let mag = c.norm() * scale;
                if mag > 0.0 {
                    (20.0 * mag.log10()).max(SILENCE_DB)
                } else {
                    SILENCE_DB
                }
            })
            .collect();
        Some(SpectralFrame::new(bins, sample_rate))
    }
}
