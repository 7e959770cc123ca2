//! src/mods.rs
//!
//! Run modes, one file each, plus the setup they share.

pub mod capture;
pub mod import;
pub mod manage;
pub mod monitor;

use std::{ path::Path, sync::{ atomic::{ AtomicBool, Ordering }, Arc } };

use crate::detector::DetectionConfig;
use crate::engine::{ Engine, EngineOptions };
use crate::logger::Logger;
use crate::settings::Settings;
use crate::Config;

/// Stored settings with any CLI overrides applied. The flag says whether an override
/// changed something worth saving.
pub(crate) fn effective_settings(cli: &Config) -> anyhow::Result<(Settings, bool)> {
    let stored = Settings::load(Path::new(&cli.settings_path));
    let base = stored.detection_config();

    let config = DetectionConfig::new(
        cli.threshold.unwrap_or(base.threshold()),
        cli.direction.unwrap_or(base.direction()),
        cli.cooldown_ms.unwrap_or(base.cooldown_ms())
    )?;

    let mut settings = stored.clone();
    settings.threshold = config.threshold();
    settings.threshold_direction = config.direction().into();
    settings.cooldown_ms = config.cooldown_ms();
    let changed = settings != stored;
    Ok((settings, changed))
}

pub(crate) fn engine_options(cli: &Config, sample_rate: u32) -> EngineOptions {
    EngineOptions {
        bands: cli.bands,
        banding: cli.banding,
        metric: cli.metric,
        fft_size: cli.fft_size,
        sample_rate,
    }
}

/// Engine loaded from `settings`. A stored reference with the wrong band count or
/// taken at another sample rate is dropped with a warning.
pub(crate) fn build_engine(
    cli: &Config,
    sample_rate: u32,
    settings: &Settings,
    logger: &Logger
) -> Engine {
    let mut engine = Engine::new(engine_options(cli, sample_rate), settings.detection_config());
    if let Err(mismatch) = engine.apply_settings(settings) {
        let _ = crate::log_warn!(
            logger,
            "Ignoring the stored reference until a new one is captured: {}",
            mismatch
        );
    }
    engine
}

/// ctrl+c sets the returned flag.
pub(crate) fn quit_flag(logger: &Logger) -> Arc<AtomicBool> {
    let quit = Arc::new(AtomicBool::new(false));
    let q = quit.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        q.store(true, Ordering::SeqCst);
    }) {
        let _ = crate::log_warn!(logger, "Could not install Ctrl-C handler: {}", e);
    }
    quit
}
