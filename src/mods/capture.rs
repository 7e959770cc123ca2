use anyhow::Result;
use chrono::Utc;
use std::{ path::Path, sync::{ atomic::Ordering, Arc }, thread, time::{ Duration, Instant } };

use crate::engine::TickOutcome;
use crate::input::AudioInput;
use crate::logger::Logger;
use crate::reference::CaptureOutcome;
use crate::Config;

use super::{ build_engine, effective_settings, quit_flag };

/// Capture mode: open one live capture window on the microphone and store whatever
/// it heard as the new reference. Ctrl-C cancels the window and keeps the old one.
pub fn run_capture(cli: &Config, logger: Arc<Logger>) -> Result<()> {
    let settings_path = Path::new(&cli.settings_path);
    let (settings, _) = effective_settings(cli)?;
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
    let had_reference = engine.reference().is_some();

    logger.info(
        &format!("Capturing for {} ms. Make the sound now (Ctrl-C cancels).", cli.capture_ms)
    )?;
    engine.begin_capture(cli.capture_ms, Utc::now());

    let mut seen = 0usize;
    let mut next = Instant::now();
    let outcome = loop {
        next += Duration::from_millis(cli.tick_ms);

        if quit.load(Ordering::SeqCst) {
            break engine.cancel_capture().unwrap_or(CaptureOutcome::Aborted);
        }

        let frame = input
            .latest(cli.fft_size)
            .and_then(|block| engine.frame_from_samples(&block, sr as f32));
        match engine.tick(frame.as_ref(), Utc::now()) {
            TickOutcome::CaptureFinished(o) => {
                break o;
            }
            _ => {
                seen = engine.capture_frames().unwrap_or(seen);
            }
        }

        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            next = now;
        }
    };
    input.stop();
    let _ = crate::log_debug!(logger, "capture window observed {} frame(s) before closing", seen);

    match outcome {
        CaptureOutcome::Captured(fp) => {
            engine.settings().save(settings_path)?;
            logger.info(
                &format!(
                    "Reference captured ({} bands){} and saved to {}",
                    fp.len(),
                    if had_reference { ", replacing the previous one" } else { "" },
                    settings_path.display()
                )
            )?;
        }
        CaptureOutcome::Silent => {
            logger.warn("Nothing audible during the capture window; reference unchanged.")?;
        }
        CaptureOutcome::Aborted => {
            logger.warn("Capture cancelled; reference unchanged.")?;
        }
    }
    Ok(())
}
