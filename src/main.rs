//! src/main.rs

use anyhow::Result;
use std::{ env, path::{ Path, PathBuf }, sync::Arc };

mod logger;
use logger::{ LogLevel, Logger };

mod decode;
mod detector;
mod engine;
mod error;
mod fingerprint;
mod input;
mod notify;
mod reference;
mod settings;
mod similarity;
mod spectrum;

// run modes live in src/mods/
mod mods;

use crate::detector::{ ThresholdDirection, MAX_COOLDOWN_MS };
use crate::engine::{ DEFAULT_FFT_SIZE, DEFAULT_SAMPLE_RATE };
use crate::fingerprint::{ BandingPolicy, DEFAULT_BANDS, MAX_BANDS, MIN_BANDS };
use crate::similarity::MetricPolicy;

// ───────────────────────────────────────────────────────────────────────────────
// CLI config + parsing
// ───────────────────────────────────────────────────────────────────────────────
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Monitor,
    Capture,
    Import,
    Clear,
    Status,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mode: Mode,
    pub tick_ms: u64,
    pub show_help: bool,

    // paths
    pub log_path: String,
    pub settings_path: String,
    pub history_path: String,
    pub input_path: String,

    pub webhook_url: Option<String>,

    // analysis
    pub fft_size: usize,
    pub sample_rate_hz: u32,
    pub bands: usize,
    pub banding: BandingPolicy,
    pub metric: MetricPolicy,
    pub capture_ms: u64,

    // overrides for the persisted detection settings
    pub threshold: Option<f32>,
    pub direction: Option<ThresholdDirection>,
    pub cooldown_ms: Option<u64>,

    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        let build_dir = env
            ::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("build");
        let in_build = |name: &str| build_dir.join(name).to_string_lossy().into_owned();

        Self {
            mode: Mode::Monitor,
            tick_ms: 50,
            show_help: false,

            log_path: in_build("Detection.log"),
            settings_path: in_build("settings.json"),
            history_path: in_build("Detection.csv"),
            input_path: String::new(),

            webhook_url: None,

            fft_size: DEFAULT_FFT_SIZE,
            sample_rate_hz: DEFAULT_SAMPLE_RATE,
            bands: DEFAULT_BANDS,
            banding: BandingPolicy::Perceptual,
            metric: MetricPolicy::Cosine,
            capture_ms: 1500,

            threshold: None,
            direction: None,
            cooldown_ms: None,

            log_level: LogLevel::Info,
        }
    }
}

fn print_usage(cfg: &Config) {
    println!("Usage: sound-trigger [OPTIONS]\n");
    println!("Modes:");
    println!("  --mode monitor        (default) Listen to the microphone and report matches");
    println!("  --mode capture        Record the reference sound from the microphone");
    println!("  --mode import         Take the reference sound from an audio file (--input)");
    println!("  --mode clear          Forget the stored reference");
    println!("  --mode status         Print the stored settings");

    println!("\nPaths:");
    println!("  --log-path <PATH>             Detection log (default: {})", cfg.log_path);
    println!("  --settings-path <PATH>        Settings file (default: {})", cfg.settings_path);
    println!("  --history-path <PATH>         Detection history CSV (default: {})", cfg.history_path);
    println!(
        "  --input <PATH>                (import) Audio file (.wav/.mp3/.flac/.ogg/.m4a), or - for stdin"
    );
    println!(
        "  --log-level <LEVEL>           Log level: debug, info, warning, error (default: info)"
    );

    println!("\nDetection (saved to the settings file when given):");
    println!("  --threshold <FRAC>            Match threshold [0..1] (stored default: 0.20)");
    println!("  --direction <below|above>     Match when distance is below/above the threshold");
    println!(
        "  --cooldown-ms <MS>            Quiet period after an event, max {} (stored default: 2000)",
        MAX_COOLDOWN_MS
    );
    println!("  --webhook <URL>               POST each event as JSON to this URL");

    println!("\nAnalysis:");
    println!("  -tm, --tick-ms <MS>           Analyser tick in ms (default: {})", cfg.tick_ms);
    println!("  --fft-size <N>                Analysis block, power of two (default: {})", cfg.fft_size);
    println!(
        "  --sample-rate, --sr <HZ>      Preferred microphone rate (default: {})",
        cfg.sample_rate_hz
    );
    println!(
        "  --bands <N>                   Fingerprint bands {}..{} (default: {})",
        MIN_BANDS,
        MAX_BANDS,
        cfg.bands
    );
    println!(
        "  --banding <linear|perceptual> Band layout (default: {})",
        cfg.banding.as_str()
    );
    println!("  --metric <cosine|euclidean>   Distance metric (default: {})", cfg.metric.as_str());
    println!("  --capture-ms <MS>             (capture) Window length (default: {})", cfg.capture_ms);

    println!("\nExamples:");
    println!("  sound-trigger --mode capture --capture-ms 2000");
    println!("  sound-trigger --mode import --input doorbell.wav");
    println!("  sound-trigger --threshold 0.15 --cooldown-ms 5000 --webhook http://localhost:8080/hook");
}

fn take_value<'a>(args: &'a [String], i: usize, flag: &str) -> std::result::Result<&'a str, String> {
    args.get(i + 1)
        .map(|s| s.as_str())
        .ok_or_else(|| format!("Missing value for {}", flag))
}

/// Parse `args` (without the program name).
fn parse_arguments(args: &[String]) -> std::result::Result<Config, String> {
    let mut config = Config::default();

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--mode" => {
                config.mode = match take_value(args, i, flag)?.to_lowercase().as_str() {
                    "monitor" | "listen" => Mode::Monitor,
                    "capture" | "record" => Mode::Capture,
                    "import" => Mode::Import,
                    "clear" => Mode::Clear,
                    "status" => Mode::Status,
                    other => {
                        return Err(format!("Unknown mode: {}", other));
                    }
                };
                i += 2;
            }
            "--log-path" => {
                config.log_path = take_value(args, i, flag)?.to_string();
                i += 2;
            }
            "--log-level" => {
                let v = take_value(args, i, flag)?;
                config.log_level = LogLevel::parse(v).ok_or_else(||
                    format!("Invalid log level: {}. Valid options: debug, info, warning, error", v)
                )?;
                i += 2;
            }
            "--settings-path" => {
                config.settings_path = take_value(args, i, flag)?.to_string();
                i += 2;
            }
            "--history-path" => {
                config.history_path = take_value(args, i, flag)?.to_string();
                i += 2;
            }
            "--input" => {
                config.input_path = take_value(args, i, flag)?.to_string();
                i += 2;
            }
            "--webhook" => {
                let v = take_value(args, i, flag)?;
                if !(v.starts_with("http://") || v.starts_with("https://")) {
                    return Err(format!("Webhook must be an http(s) URL: {}", v));
                }
                config.webhook_url = Some(v.to_string());
                i += 2;
            }
            "-tm" | "--tick-ms" => {
                let v: u64 = take_value(args, i, flag)?
                    .parse()
                    .map_err(|_| "Invalid tick-ms value".to_string())?;
                config.tick_ms = v.max(1);
                i += 2;
            }
            "--fft-size" => {
                let v: usize = take_value(args, i, flag)?
                    .parse()
                    .map_err(|_| "Invalid fft-size value".to_string())?;
                if !v.is_power_of_two() || v < 2 * MIN_BANDS {
                    return Err(format!("fft-size must be a power of two >= {}", 2 * MIN_BANDS));
                }
                config.fft_size = v;
                i += 2;
            }
            "--sample-rate" | "--sr" => {
                let v: u32 = take_value(args, i, flag)?
                    .parse()
                    .map_err(|_| "Invalid sample-rate value".to_string())?;
                if v == 0 {
                    return Err("sample-rate must be positive".to_string());
                }
                config.sample_rate_hz = v;
                i += 2;
            }
            "--bands" => {
                let v: usize = take_value(args, i, flag)?
                    .parse()
                    .map_err(|_| "Invalid bands value".to_string())?;
                if !(MIN_BANDS..=MAX_BANDS).contains(&v) {
                    return Err(format!("bands must be within {}..={}", MIN_BANDS, MAX_BANDS));
                }
                config.bands = v;
                i += 2;
            }
            "--banding" => {
                let v = take_value(args, i, flag)?;
                config.banding = BandingPolicy::parse(v).ok_or_else(||
                    format!("Invalid banding: {}. Valid options: linear, perceptual", v)
                )?;
                i += 2;
            }
            "--metric" => {
                let v = take_value(args, i, flag)?;
                config.metric = MetricPolicy::parse(v).ok_or_else(||
                    format!("Invalid metric: {}. Valid options: cosine, euclidean", v)
                )?;
                i += 2;
            }
            "--capture-ms" => {
                let v: u64 = take_value(args, i, flag)?
                    .parse()
                    .map_err(|_| "Invalid capture-ms value".to_string())?;
                config.capture_ms = v.max(1);
                i += 2;
            }
            "--threshold" => {
                let v: f32 = take_value(args, i, flag)?
                    .parse()
                    .map_err(|_| "Invalid threshold value".to_string())?;
                if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                    return Err("threshold must be within [0, 1]".to_string());
                }
                config.threshold = Some(v);
                i += 2;
            }
            "--direction" => {
                let v = take_value(args, i, flag)?;
                config.direction = Some(
                    ThresholdDirection::parse(v).ok_or_else(||
                        format!("Invalid direction: {}. Valid options: below, above", v)
                    )?
                );
                i += 2;
            }
            "--cooldown-ms" => {
                let v: u64 = take_value(args, i, flag)?
                    .parse()
                    .map_err(|_| "Invalid cooldown-ms value".to_string())?;
                if v > MAX_COOLDOWN_MS {
                    return Err(format!("cooldown-ms must be <= {}", MAX_COOLDOWN_MS));
                }
                config.cooldown_ms = Some(v);
                i += 2;
            }
            "-h" | "--help" => {
                config.show_help = true;
                i += 1;
            }
            _ => {
                return Err(format!("Unknown option: {}", args[i]));
            }
        }
    }

    if config.mode == Mode::Import && config.input_path.is_empty() && !config.show_help {
        return Err("--mode import needs --input <PATH>".to_string());
    }

    Ok(config)
}

// ───────────────────────────────────────────────────────────────────────────────
// main
// ───────────────────────────────────────────────────────────────────────────────
fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cli = match parse_arguments(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}\n", e);
            print_usage(&Config::default());
            std::process::exit(1);
        }
    };
    if cli.show_help {
        print_usage(&cli);
        return Ok(());
    }

    let logger = Arc::new(Logger::new_with_level(&cli.log_path, true, cli.log_level)?);
    let settings_path = Path::new(&cli.settings_path);

    match cli.mode {
        Mode::Monitor => mods::monitor::run_monitor(&cli, logger),
        Mode::Capture => mods::capture::run_capture(&cli, logger),
        Mode::Import => mods::import::run_import(&cli, logger),
        Mode::Clear => mods::manage::run_clear(&cli, settings_path, logger),
        Mode::Status => mods::manage::run_status(&cli, settings_path, logger),
    }
}
