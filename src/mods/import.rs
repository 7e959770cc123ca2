use anyhow::Result;
use std::{ io::Read, path::Path, sync::Arc };

use crate::decode::{ decode_bytes, load_first_channel, AudioData };
use crate::engine::Engine;
use crate::error::Error;
use crate::logger::Logger;
use crate::reference::CaptureOutcome;
use crate::Config;

use super::{ build_engine, effective_settings };

/// `-` reads the whole container from stdin.
fn read_audio(input: &str) -> crate::error::Result<AudioData> {
    if input == "-" {
        let mut bytes = Vec::new();
        std::io::stdin().read_to_end(&mut bytes).map_err(|e| Error::DecodeFailure(e.to_string()))?;
        return decode_bytes(bytes, None);
    }
    load_first_channel(input)
}

/// Replace the reference with one taken from `audio`. Saves only on success.
fn import_into(
    engine: &mut Engine,
    audio: &AudioData,
    settings_path: &Path
) -> Result<CaptureOutcome> {
    let outcome = engine.capture_waveform(&audio.samples_mono, audio.sr);
    if let CaptureOutcome::Captured(_) = outcome {
        engine.settings().save(settings_path)?;
    }
    Ok(outcome)
}

/// Import mode: decode an audio file and use its loudest moment as the reference.
/// The file is resampled to the microphone rate (`--sample-rate`) first.
pub fn run_import(cli: &Config, logger: Arc<Logger>) -> Result<()> {
    let settings_path = Path::new(&cli.settings_path);
    let (settings, _) = effective_settings(cli)?;
    let mut engine = build_engine(cli, cli.sample_rate_hz, &settings, &logger);

    let audio = match read_audio(&cli.input_path) {
        Ok(a) => a,
        Err(e) => {
            logger.error(&format!("Import of {} failed: {}. Reference unchanged.", cli.input_path, e))?;
            return Err(e.into());
        }
    };
    logger.info(
        &format!(
            "Decoded {}: {} Hz, {} channel(s), {:.2} s",
            cli.input_path,
            audio.sr,
            audio.channels,
            (audio.samples_mono.len() as f32) / (audio.sr.max(1) as f32)
        )
    )?;

    match import_into(&mut engine, &audio, settings_path)? {
        CaptureOutcome::Captured(fp) => {
            logger.info(
                &format!(
                    "Reference imported ({} bands at {} Hz) and saved to {}",
                    fp.len(),
                    engine.sample_rate(),
                    settings_path.display()
                )
            )?;
        }
        CaptureOutcome::Silent | CaptureOutcome::Aborted => {
            logger.warn("The file is silent; reference unchanged.")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectionConfig;
    use crate::engine::EngineOptions;
    use crate::fingerprint::{ BandingPolicy, Fingerprint };
    use crate::settings::Settings;

    fn engine() -> Engine {
        let opts = EngineOptions {
            bands: 16,
            banding: BandingPolicy::Perceptual,
            fft_size: 1024,
            ..EngineOptions::default()
        };
        Engine::new(opts, DetectionConfig::default())
    }

    fn write_tone(path: &Path, sr: u32, freq: f32, amp: f32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: sr,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut w = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..sr / 2 {
            let s = amp * (2.0 * std::f32::consts::PI * freq * (i as f32) / (sr as f32)).sin();
            w.write_sample((s * 32767.0) as i16).unwrap();
        }
        w.finalize().unwrap();
    }

    #[test]
    fn imported_reference_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("beep.wav");
        let settings_path = dir.path().join("settings.json");
        write_tone(&wav, 44_100, 1500.0, 0.5);

        let mut e = engine();
        let audio = read_audio(wav.to_str().unwrap()).unwrap();
        let outcome = import_into(&mut e, &audio, &settings_path).unwrap();
        assert!(matches!(outcome, CaptureOutcome::Captured(_)));

        let saved = Settings::load(&settings_path);
        assert_eq!(saved.reference().as_ref(), e.reference());
        assert_eq!(saved.reference_sample_rate, Some(48_000));
        assert_eq!(saved.reference().map(|f| f.len()), Some(16));
    }

    #[test]
    fn silent_file_leaves_settings_alone() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("quiet.wav");
        let settings_path = dir.path().join("settings.json");
        write_tone(&wav, 48_000, 1000.0, 0.0);

        let mut e = engine();
        let previous = Fingerprint::from_values((0..16).map(|i| i as f32).collect());
        e.set_reference(previous.clone());

        let audio = read_audio(wav.to_str().unwrap()).unwrap();
        assert_eq!(import_into(&mut e, &audio, &settings_path).unwrap(), CaptureOutcome::Silent);
        assert!(!settings_path.exists());
        assert_eq!(e.reference(), Some(&previous));
    }

    #[test]
    fn unreadable_file_is_a_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("notes.txt");
        std::fs::write(&bogus, "not audio at all").unwrap();
        assert!(matches!(read_audio(bogus.to_str().unwrap()), Err(Error::DecodeFailure(_))));
    }
}
