use anyhow::Result;
use std::{ path::Path, sync::Arc };

use crate::logger::Logger;
use crate::settings::Settings;
use crate::Config;

use super::effective_settings;

/// Drop the stored reference. Detection settings (and any overrides) are kept.
pub fn run_clear(cli: &Config, settings_path: &Path, logger: Arc<Logger>) -> Result<()> {
    let (mut settings, _) = effective_settings(cli)?;
    let had = settings.clear_reference();
    settings.save(settings_path)?;
    if had {
        logger.info(&format!("Reference cleared in {}", settings_path.display()))?;
    } else {
        logger.info("No reference was stored; nothing to clear.")?;
    }
    Ok(())
}

fn describe(settings: &Settings, bands: usize) -> Vec<String> {
    let mut lines = vec![
        format!("threshold:          {:.3}", settings.threshold),
        format!("thresholdDirection: {:?}", settings.threshold_direction),
        format!("cooldownMs:         {}", settings.cooldown_ms),
    ];
    match settings.reference() {
        None => lines.push("reference:          none (detection disabled)".to_string()),
        Some(fp) => {
            let note = if fp.len() == bands {
                String::new()
            } else {
                format!(" (does not match --bands {})", bands)
            };
            let rate = settings.reference_sample_rate
                .map(|r| format!(" at {} Hz", r))
                .unwrap_or_default();
            lines.push(
                format!("reference:          {} bands{}, norm {:.3}{}", fp.len(), rate, fp.norm(), note)
            );
        }
    }
    lines
}

/// Print the effective settings. Overrides given on the command line are saved first
/// so `--mode status --threshold 0.3` doubles as a way to configure.
pub fn run_status(cli: &Config, settings_path: &Path, logger: Arc<Logger>) -> Result<()> {
    let (settings, changed) = effective_settings(cli)?;
    if changed {
        settings.save(settings_path)?;
        logger.info(&format!("Saved detection overrides to {}", settings_path.display()))?;
    }
    println!("settings: {}", settings_path.display());
    for line in describe(&settings, cli.bands) {
        println!("  {}", line);
    }
    Ok(())
}
