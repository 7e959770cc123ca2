use anyhow::Result;
use chrono::Utc;
use std::{
    fs,
    path::Path,
    sync::{ atomic::Ordering, Arc },
    thread,
    time::{ Duration, Instant, SystemTime },
};

use crate::detector::DetectionEvent;
use crate::engine::{ Engine, TickOutcome };
use crate::input::AudioInput;
use crate::logger::Logger;
use crate::notify::{ CsvHistory, Dispatcher, EventSink, Webhook };
use crate::settings::Settings;
use crate::Config;

use super::{ build_engine, effective_settings, quit_flag };

/// How often the settings file is checked for edits made by other runs.
const RELOAD_CHECK_MS: u64 = 1000;

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
}

/// Pick up settings written by another run (`capture`, `import`, `clear`). Config
/// changes apply from the next tick; the detector is only reset when the reference
/// itself changed.
fn apply_reloaded(engine: &mut Engine, settings: &Settings, logger: &Logger) {
    engine.set_config(settings.detection_config());

    let stored = settings.reference();
    if stored.as_ref() == engine.reference() {
        return;
    }
    match stored {
        Some(fp) =>
            match engine.load_reference(fp, settings.reference_sample_rate) {
                Ok(()) => {
                    let _ = logger.info("Reference updated from settings file");
                }
                Err(mismatch) => {
                    let _ = crate::log_warn!(logger, "Ignoring stored reference: {}", mismatch);
                }
            }
        None => {
            engine.clear_reference();
            let _ = logger.info("Reference cleared; detection disabled");
        }
    }
}

fn sinks(cli: &Config, logger: &Logger) -> Vec<Box<dyn EventSink>> {
    let mut out: Vec<Box<dyn EventSink>> = vec![Box::new(CsvHistory::new(Path::new(&cli.history_path)))];
    if let Some(url) = &cli.webhook_url {
        match Webhook::new(url) {
            Ok(w) => out.push(Box::new(w)),
            Err(e) => {
                let _ = crate::log_warn!(logger, "Webhook disabled: {}", e);
            }
        }
    }
    out
}

/// Hand a detection to the sinks. Logging it is best effort and never costs the event.
fn report(ev: &DetectionEvent, dispatcher: &Dispatcher, logger: &Logger) {
    dispatcher.dispatch(ev);
    let _ = crate::log_info!(logger, "sound_detected distance={:.4}", ev.distance);
}

/// Monitor mode: fingerprint the microphone every tick, compare against the stored
/// reference and hand each detection to the dispatcher.
pub fn run_monitor(cli: &Config, logger: Arc<Logger>) -> Result<()> {
    logger.info("sound-trigger monitor starting…")?;

    let settings_path = Path::new(&cli.settings_path);
    let (settings, changed) = effective_settings(cli)?;
    if changed {
        settings.save(settings_path)?;
        logger.info(&format!("Saved detection overrides to {}", settings_path.display()))?;
    }

    let quit = quit_flag(&logger);

    let mut input = match AudioInput::start(cli.sample_rate_hz, logger.clone()) {
        Ok(i) => i,
        Err(e) => {
            logger.error(&format!("{}", e))?;
            return Err(e.into());
        }
    };
    let sr = input.sample_rate();
    let mut engine = build_engine(cli, sr, &settings, &logger);

    let cfg = *engine.config();
    logger.info(
        &format!(
            "Threshold {:.3} ({:?}), cooldown {} ms, {} {} bands, {} metric, fft {}",
            cfg.threshold(),
            cfg.direction(),
            cfg.cooldown_ms(),
            engine.extractor().bands(),
            engine.extractor().banding().as_str(),
            cli.metric.as_str(),
            cli.fft_size
        )
    )?;
    if engine.reference().is_none() {
        logger.warn("No reference stored; run --mode capture or --mode import first. Listening anyway.")?;
    }

    let mut dispatcher = Dispatcher::start(sinks(cli, &logger), logger.clone());

    let mut last_mtime = modified(settings_path);
    let mut last_check = Instant::now();

    // main loop
    let mut next = Instant::now();
    while !quit.load(Ordering::SeqCst) {
        next += Duration::from_millis(cli.tick_ms);

        if last_check.elapsed() >= Duration::from_millis(RELOAD_CHECK_MS) {
            last_check = Instant::now();
            let m = modified(settings_path);
            if m != last_mtime {
                last_mtime = m;
                apply_reloaded(&mut engine, &Settings::load(settings_path), &logger);
            }
        }

        let frame = input
            .latest(cli.fft_size)
            .and_then(|block| engine.frame_from_samples(&block, sr as f32));

        if let TickOutcome::Scored { event, .. } = engine.tick(frame.as_ref(), Utc::now()) {
            if let Some(sample) = engine.last_sample() {
                let _ = crate::log_debug!(
                    logger,
                    "{} distance {:.4} phase {:?}",
                    sample.timestamp.format("%H:%M:%S%.3f"),
                    sample.distance,
                    engine.phase()
                );
            }
            if let Some(ev) = event {
                report(&ev, &dispatcher, &logger);
            }
        }

        // pacing
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            next = now;
        }
    }

    input.stop();
    dispatcher.shutdown();
    logger.info("sound-trigger monitor stopped.")?;
    Ok(())
}
