//! src/engine.rs
//!
//! One detection engine: extractor, scorer policy, reference slot, detector state and an
//! optional live capture window. [`Engine::tick`] runs a full pass for one frame. The
//! engine never touches audio devices or the clock; callers feed it frames and times.

use chrono::{ DateTime, Utc };
use std::fmt;

use crate::decode::resample_linear_mono;
use crate::detector::{ self, DetectionConfig, DetectionEvent, DetectorState, Phase, TickInput };
use crate::fingerprint::{ BandingPolicy, Fingerprint, FingerprintExtractor, DEFAULT_BANDS };
use crate::reference::{ capture_from_waveform, CaptureOutcome, LiveCapture, ReferenceStore };
use crate::settings::Settings;
use crate::similarity::{ compare, MetricPolicy, MAX_DISTANCE };
use crate::spectrum::{ SpectralFrame, SpectrumAnalyzer };

pub const DEFAULT_FFT_SIZE: usize = 2048;
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

#[derive(Clone, Copy, Debug)]
pub struct EngineOptions {
    pub bands: usize,
    pub banding: BandingPolicy,
    pub metric: MetricPolicy,
    pub fft_size: usize,
    pub sample_rate: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            bands: DEFAULT_BANDS,
            banding: BandingPolicy::Perceptual,
            metric: MetricPolicy::Cosine,
            fft_size: DEFAULT_FFT_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Live feedback only; not part of the detection state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistanceSample {
    pub distance: f32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// No frame yet, or the frame was too short to fingerprint.
    Skipped,
    /// A capture window is open; detection is paused.
    Capturing,
    /// The capture window closed on this tick.
    CaptureFinished(CaptureOutcome),
    Scored {
        distance: f32,
        event: Option<DetectionEvent>,
    },
}

/// Why a stored reference could not be installed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceMismatch {
    Bands {
        stored: usize,
        expected: usize,
    },
    SampleRate {
        stored: u32,
        expected: u32,
    },
}

impl fmt::Display for ReferenceMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceMismatch::Bands { stored, expected } =>
                write!(f, "stored reference has {} bands, engine uses {}", stored, expected),
            ReferenceMismatch::SampleRate { stored, expected } =>
                write!(f, "stored reference was analysed at {} Hz, input runs at {} Hz", stored, expected),
        }
    }
}

pub struct Engine {
    options: EngineOptions,
    extractor: FingerprintExtractor,
    analyzer: SpectrumAnalyzer,
    config: DetectionConfig,
    reference: ReferenceStore,
    detector: DetectorState,
    capture: Option<LiveCapture>,
    last_sample: Option<DistanceSample>,
}

impl Engine {
    pub fn new(options: EngineOptions, config: DetectionConfig) -> Self {
        Self {
            extractor: FingerprintExtractor::new(options.bands, options.banding),
            analyzer: SpectrumAnalyzer::new(options.fft_size),
            options,
            config,
            reference: ReferenceStore::new(),
            detector: DetectorState::default(),
            capture: None,
            last_sample: None,
        }
    }

    pub fn extractor(&self) -> &FingerprintExtractor {
        &self.extractor
    }

    /// Rate the frames and any captured reference are analysed at.
    pub fn sample_rate(&self) -> u32 {
        self.options.sample_rate
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Takes effect on the next tick. The cooldown start is kept.
    pub fn set_config(&mut self, config: DetectionConfig) {
        self.config = config;
    }

    pub fn reference(&self) -> Option<&Fingerprint> {
        self.reference.current()
    }

    pub fn phase(&self) -> Phase {
        self.detector.phase
    }

    /// Frames the open capture window has observed so far.
    pub fn capture_frames(&self) -> Option<usize> {
        self.capture.as_ref().map(LiveCapture::frames_seen)
    }

    pub fn last_sample(&self) -> Option<DistanceSample> {
        self.last_sample
    }

    /// Install a reference taken at this engine's rate. Returns `false` (and leaves the
    /// slot alone) when its length does not match this engine's band count.
    pub fn set_reference(&mut self, fp: Fingerprint) -> bool {
        self.load_reference(fp, None).is_ok()
    }

    /// Install a persisted reference. Its band count and, when recorded, the rate it was
    /// analysed at must match this engine; otherwise the slot is left alone. Bands map to
    /// different frequencies at another rate, so such a reference would never match.
    pub fn load_reference(
        &mut self,
        fp: Fingerprint,
        sample_rate: Option<u32>
    ) -> Result<(), ReferenceMismatch> {
        let expected = self.extractor.bands();
        if fp.len() != expected {
            return Err(ReferenceMismatch::Bands { stored: fp.len(), expected });
        }
        match sample_rate {
            Some(stored) if stored != self.options.sample_rate => {
                return Err(ReferenceMismatch::SampleRate { stored, expected: self.options.sample_rate });
            }
            _ => {}
        }
        self.install(fp);
        Ok(())
    }

    fn install(&mut self, fp: Fingerprint) {
        self.reference.replace(fp);
        self.detector = DetectorState::default();
    }

    pub fn clear_reference(&mut self) {
        self.reference.clear();
        self.detector = DetectorState::default();
        self.last_sample = None;
    }

    /// Open a live capture window. An already open window is discarded.
    pub fn begin_capture(&mut self, duration_ms: u64, now: DateTime<Utc>) {
        self.capture = Some(LiveCapture::begin(duration_ms, now));
    }

    /// Cancel the open window, if any. The reference is never touched.
    pub fn cancel_capture(&mut self) -> Option<CaptureOutcome> {
        self.capture.take().map(LiveCapture::cancel)
    }

    /// Capture from a decoded waveform at `sample_rate`; resampled to the live rate first.
    pub fn capture_waveform(&mut self, samples: &[f32], sample_rate: u32) -> CaptureOutcome {
        let target = self.options.sample_rate;
        let resampled;
        let wave = if sample_rate != target && sample_rate > 0 {
            resampled = resample_linear_mono(samples, sample_rate, target);
            &resampled[..]
        } else {
            samples
        };
        let outcome = capture_from_waveform(
            wave,
            target as f32,
            &mut self.analyzer,
            &self.extractor
        );
        if let CaptureOutcome::Captured(fp) = &outcome {
            self.install(fp.clone());
        }
        outcome
    }

    /// Fingerprint the last `fft_size` samples. `None` until enough samples exist.
    pub fn frame_from_samples(&mut self, samples: &[f32], sample_rate: f32) -> Option<SpectralFrame> {
        self.analyzer.frame(samples, sample_rate)
    }

    /// One full pass: capture bookkeeping, or extract → compare → detect.
    pub fn tick(&mut self, frame: Option<&SpectralFrame>, now: DateTime<Utc>) -> TickOutcome {
        if let Some(cap) = self.capture.as_mut() {
            if let Some(f) = frame {
                cap.observe(f);
            }
            if !cap.is_expired(now) {
                return TickOutcome::Capturing;
            }
            let outcome = cap.finish(&self.extractor);
            self.capture = None;
            if let CaptureOutcome::Captured(fp) = &outcome {
                self.install(fp.clone());
            }
            return TickOutcome::CaptureFinished(outcome);
        }

        let Some(frame) = frame else {
            return TickOutcome::Skipped;
        };
        let Some(fp) = self.extractor.extract(frame) else {
            return TickOutcome::Skipped;
        };

        let distance = match self.reference.current() {
            Some(r) => compare(self.options.metric, &fp, r),
            None => MAX_DISTANCE,
        };
        let has_reference = self.reference.is_set();
        if has_reference {
            self.last_sample = Some(DistanceSample { distance, timestamp: now });
        }

        let (next, event) = detector::tick(
            self.detector,
            TickInput { distance, now, has_reference },
            &self.config
        );
        self.detector = next;
        TickOutcome::Scored { distance, event }
    }

    pub fn settings(&self) -> Settings {
        Settings::from_parts(&self.config, self.reference.current(), self.options.sample_rate)
    }

    /// Apply persisted settings. A stored reference that does not fit this engine is
    /// reported and left out; the config is applied either way.
    pub fn apply_settings(&mut self, settings: &Settings) -> Result<(), ReferenceMismatch> {
        self.config = settings.detection_config();
        match settings.reference() {
            Some(fp) => self.load_reference(fp, settings.reference_sample_rate),
            None => {
                self.clear_reference();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::ThresholdDirection;
    use crate::spectrum::SILENCE_DB;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn options() -> EngineOptions {
        EngineOptions {
            bands: 16,
            banding: BandingPolicy::Linear,
            metric: MetricPolicy::Cosine,
            fft_size: 512,
            sample_rate: 48_000,
        }
    }

    fn engine() -> Engine {
        let cfg = DetectionConfig::new(0.2, ThresholdDirection::MatchBelow, 1000).unwrap();
        Engine::new(options(), cfg)
    }

    /// 256-bin frame with energy in bins `lit`.
    fn frame(lit: std::ops::Range<usize>) -> SpectralFrame {
        let mut bins = vec![SILENCE_DB; 256];
        for i in lit {
            bins[i] = -20.0;
        }
        SpectralFrame::new(bins, 48_000.0)
    }

    fn capture(e: &mut Engine, f: &SpectralFrame, start_ms: i64) -> TickOutcome {
        e.begin_capture(400, at(start_ms));
        assert_eq!(e.tick(Some(f), at(start_ms)), TickOutcome::Capturing);
        assert_eq!(e.tick(Some(f), at(start_ms + 200)), TickOutcome::Capturing);
        e.tick(Some(f), at(start_ms + 400))
    }

    #[test]
    fn no_reference_never_fires() {
        let mut e = engine();
        for i in 0..10 {
            match e.tick(Some(&frame(0..40)), at(i * 200)) {
                TickOutcome::Scored { distance, event } => {
                    assert_eq!(distance, MAX_DISTANCE);
                    assert!(event.is_none());
                }
                other => panic!("unexpected {:?}", other),
            }
            assert_eq!(e.phase(), Phase::Idle);
        }
        assert!(e.last_sample().is_none());
    }

    #[test]
    fn captured_sound_is_detected_once_per_cooldown() {
        let mut e = engine();
        let click = frame(100..130);
        let other = frame(0..20);
        assert!(matches!(capture(&mut e, &click, 0), TickOutcome::CaptureFinished(CaptureOutcome::Captured(_))));
        assert_eq!(e.phase(), Phase::Idle);

        let stream = [&other, &click, &click, &other, &click, &click, &click];
        let mut fired = Vec::new();
        for (i, f) in stream.iter().enumerate() {
            if let TickOutcome::Scored { event: Some(ev), .. } = e.tick(Some(f), at(1000 + (i as i64) * 250)) {
                fired.push(i);
                assert!(ev.distance < 0.01);
            }
        }
        // fires at 1250 ms, suppressed until 2250 ms
        assert_eq!(fired, vec![1, 5]);
        assert!(e.last_sample().unwrap().distance < 0.01);
    }

    #[test]
    fn config_change_keeps_cooldown_start() {
        let mut e = engine();
        let click = frame(100..130);
        capture(&mut e, &click, 0);
        assert!(matches!(e.tick(Some(&click), at(1000)), TickOutcome::Scored { event: Some(_), .. }));

        // a longer cooldown still counts from the trigger at 1000 ms
        e.set_config(DetectionConfig::new(0.2, ThresholdDirection::MatchBelow, 3000).unwrap());
        assert!(matches!(e.tick(Some(&click), at(2500)), TickOutcome::Scored { event: None, .. }));
        assert_eq!(e.phase(), Phase::Cooldown);
        assert!(matches!(e.tick(Some(&click), at(4000)), TickOutcome::Scored { event: Some(_), .. }));
    }

    #[test]
    fn second_capture_replaces_first_entirely() {
        let mut e = engine();
        let first = frame(0..32);
        let second = frame(200..240);
        capture(&mut e, &first, 0);
        capture(&mut e, &second, 1000);

        let expected = e.extractor().extract(&second).unwrap();
        let held = e.reference().unwrap();
        assert!(compare(MetricPolicy::Cosine, held, &expected) < 1e-4);
        assert!(compare(MetricPolicy::Cosine, held, &e.extractor().extract(&first).unwrap()) > 0.99);
    }

    #[test]
    fn detection_is_paused_while_capturing() {
        let mut e = engine();
        let click = frame(100..130);
        capture(&mut e, &click, 0);

        e.begin_capture(1000, at(1000));
        assert_eq!(e.capture_frames(), Some(0));
        assert_eq!(e.tick(Some(&click), at(1100)), TickOutcome::Capturing);
        assert_eq!(e.tick(None, at(1200)), TickOutcome::Capturing);
        assert_eq!(e.capture_frames(), Some(1));
    }

    #[test]
    fn cancelled_capture_keeps_previous_reference() {
        let mut e = engine();
        let click = frame(100..130);
        capture(&mut e, &click, 0);
        let before = e.reference().cloned();

        e.begin_capture(1000, at(1000));
        e.tick(Some(&frame(0..10)), at(1100));
        assert_eq!(e.cancel_capture(), Some(CaptureOutcome::Aborted));
        assert!(e.capture_frames().is_none());
        assert_eq!(e.reference().cloned(), before);
        assert_eq!(e.cancel_capture(), None);
    }

    #[test]
    fn silent_capture_keeps_previous_reference() {
        let mut e = engine();
        let silent = frame(0..0);
        assert_eq!(capture(&mut e, &silent, 0), TickOutcome::CaptureFinished(CaptureOutcome::Silent));
        assert!(e.reference().is_none());
    }

    #[test]
    fn missing_and_short_frames_are_skipped() {
        let mut e = engine();
        assert_eq!(e.tick(None, at(0)), TickOutcome::Skipped);
        let short = SpectralFrame::new(vec![-20.0; 8], 48_000.0);
        assert_eq!(e.tick(Some(&short), at(10)), TickOutcome::Skipped);
    }

    #[test]
    fn clearing_disables_detection() {
        let mut e = engine();
        let click = frame(100..130);
        capture(&mut e, &click, 0);
        e.clear_reference();
        assert!(e.reference().is_none());
        match e.tick(Some(&click), at(5000)) {
            TickOutcome::Scored { event, .. } => assert!(event.is_none()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(e.phase(), Phase::Idle);
    }

    #[test]
    fn silent_live_frames_never_match() {
        let mut e = engine();
        capture(&mut e, &frame(100..130), 0);
        match e.tick(Some(&frame(0..0)), at(2000)) {
            TickOutcome::Scored { distance, event } => {
                assert_eq!(distance, 1.0);
                assert!(event.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn settings_round_trip_through_engine() {
        let mut e = engine();
        capture(&mut e, &frame(64..96), 0);
        e.set_config(DetectionConfig::new(0.8, ThresholdDirection::MatchAbove, 4321).unwrap());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        e.settings().save(&path).unwrap();

        let mut restored = engine();
        assert_eq!(restored.apply_settings(&Settings::load(&path)), Ok(()));
        assert_eq!(restored.config(), e.config());
        assert_eq!(restored.reference(), e.reference());
    }

    #[test]
    fn wrong_length_reference_is_refused() {
        let mut e = engine();
        let s = Settings { reference_fingerprint: Some(vec![1.0, 0.0, 0.0]), ..Settings::default() };
        assert_eq!(e.apply_settings(&s), Err(ReferenceMismatch::Bands { stored: 3, expected: 16 }));
        assert!(e.reference().is_none());
    }

    fn tone(freq: f32, sr: u32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * (i as f32) / (sr as f32)).sin())
            .collect()
    }

    #[test]
    fn reference_from_another_rate_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        // imported at 48 kHz
        let mut imported = engine();
        let outcome = imported.capture_waveform(&tone(10_000.0, 48_000, 8000), 48_000);
        assert!(matches!(outcome, CaptureOutcome::Captured(_)));
        let saved = imported.settings();
        assert_eq!(saved.reference_sample_rate, Some(48_000));
        saved.save(&path).unwrap();

        // the device only granted 44.1 kHz
        let mut live = Engine::new(EngineOptions { sample_rate: 44_100, ..options() }, *imported.config());
        assert_eq!(
            live.apply_settings(&Settings::load(&path)),
            Err(ReferenceMismatch::SampleRate { stored: 48_000, expected: 44_100 })
        );
        assert!(live.reference().is_none());
        let f = live.frame_from_samples(&tone(10_000.0, 44_100, 512), 44_100.0).unwrap();
        assert!(matches!(live.tick(Some(&f), at(0)), TickOutcome::Scored { event: None, .. }));

        // a reference saved without a rate is taken as is
        let legacy = Settings { reference_sample_rate: None, ..Settings::load(&path) };
        assert_eq!(live.apply_settings(&legacy), Ok(()));
    }

    #[test]
    fn waveform_capture_feeds_the_live_path() {
        let mut e = engine();
        let sr = 96_000u32;
        // 3 kHz tone at twice the live rate; resampled to 48 kHz before analysis
        let wave: Vec<f32> = (0..8000)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 3000.0 * (i as f32) / (sr as f32)).sin())
            .collect();
        assert!(matches!(e.capture_waveform(&wave, sr), CaptureOutcome::Captured(_)));

        let live: Vec<f32> = (0..512)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 3000.0 * (i as f32) / 48_000.0).sin())
            .collect();
        let f = e.frame_from_samples(&live, 48_000.0).unwrap();
        match e.tick(Some(&f), at(0)) {
            TickOutcome::Scored { distance, event } => {
                assert!(distance < 0.2, "distance {}", distance);
                assert!(event.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn silent_waveform_keeps_reference() {
        let mut e = engine();
        capture(&mut e, &frame(100..130), 0);
        let before = e.reference().cloned();
        assert_eq!(e.capture_waveform(&[0.0; 2048], 48_000), CaptureOutcome::Silent);
        assert_eq!(e.reference().cloned(), before);
    }
}
