//! src/input.rs
//!
//! Microphone acquisition. The cpal callback downmixes to the first channel and pushes
//! blocks over a bounded channel; a sink thread appends them to a shared ring buffer that
//! the tick loop reads on demand. Only one input may be open per process.

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use crossbeam_channel::{ bounded, Receiver, Sender };
use std::{
    sync::{ atomic::{ AtomicBool, Ordering }, Arc, Mutex, MutexGuard },
    thread,
};

use crate::error::{ Error, Result };
use crate::logger::Logger;

/// Seconds of audio kept in the ring buffer.
const RING_SECONDS: usize = 10;

static INPUT_OPEN: AtomicBool = AtomicBool::new(false);

fn unavailable<E: std::fmt::Display>(e: E) -> Error {
    Error::CaptureUnavailable(e.to_string())
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Claim on the process-wide input slot; released on drop.
#[derive(Debug)]
pub struct InputLease(());

impl InputLease {
    pub fn acquire() -> Result<Self> {
        if INPUT_OPEN.swap(true, Ordering::SeqCst) {
            return Err(Error::CaptureUnavailable("an audio input is already open".into()));
        }
        Ok(InputLease(()))
    }
}

impl Drop for InputLease {
    fn drop(&mut self) {
        INPUT_OPEN.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct SharedBuf {
    pub buf: Arc<Mutex<Vec<f32>>>, // mono ring buffer
    pub sr: u32,
}

impl SharedBuf {
    pub fn new(sr: u32) -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity((sr as usize) * RING_SECONDS))),
            sr,
        }
    }

    pub fn push(&self, block: &[f32]) {
        let mut ring = lock(&self.buf);
        ring.extend_from_slice(block);
        let cap = ((self.sr as usize) * RING_SECONDS).max(1);
        if ring.len() > cap {
            let drop = ring.len() - cap;
            ring.drain(0..drop);
        }
    }

    /// Copy of the newest `n` samples, or `None` until that many have arrived.
    pub fn latest(&self, n: usize) -> Option<Vec<f32>> {
        let ring = lock(&self.buf);
        if n == 0 || ring.len() < n {
            return None;
        }
        Some(ring[ring.len() - n..].to_vec())
    }
}

pub fn audio_sink_thread(rx: Receiver<Vec<f32>>, shared: SharedBuf) {
    while let Ok(block) = rx.recv() {
        shared.push(&block);
    }
}

fn build_input_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    tx: Sender<Vec<f32>>,
    logger: Arc<Logger>
) -> Result<cpal::Stream> {
    let channels = config.channels.max(1) as usize;
    let err_fn = move |e| {
        let _ = crate::log_error!(logger, "audio stream error: {}", e);
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 =>
            device.build_input_stream(
                config,
                move |data: &[f32], _| on_audio_input_first_channel(data, channels, &tx),
                err_fn,
                None
            ),
        cpal::SampleFormat::I16 =>
            device.build_input_stream(
                config,
                move |data: &[i16], _| {
                    let tmp: Vec<f32> = data
                        .iter()
                        .map(|&s| (s as f32) / 32768.0)
                        .collect();
                    on_audio_input_first_channel(&tmp, channels, &tx);
                },
                err_fn,
                None
            ),
        cpal::SampleFormat::U16 =>
            device.build_input_stream(
                config,
                move |data: &[u16], _| {
                    let tmp: Vec<f32> = data
                        .iter()
                        .map(|&s| ((s as f32) / 65535.0) * 2.0 - 1.0)
                        .collect();
                    on_audio_input_first_channel(&tmp, channels, &tx);
                },
                err_fn,
                None
            ),
        other => {
            return Err(Error::CaptureUnavailable(format!("unsupported sample format {:?}", other)));
        }
    };
    stream.map_err(unavailable)
}

fn first_channel(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.iter().step_by(channels).copied().collect()
}

fn on_audio_input_first_channel(data: &[f32], channels: usize, tx: &Sender<Vec<f32>>) {
    // full channel means the sink is behind; the ring only wants the newest audio anyway
    let _ = tx.try_send(first_channel(data, channels));
}

pub fn maybe_rate_supported(device: &cpal::Device, want: u32) -> Option<u32> {
    if let Ok(mut configs) = device.supported_input_configs() {
        for c in configs.by_ref() {
            let r = c.min_sample_rate().0..=c.max_sample_rate().0;
            if r.contains(&want) {
                return Some(want);
            }
        }
    }
    None
}

/// An open microphone stream feeding a [`SharedBuf`].
pub struct AudioInput {
    stream: Option<cpal::Stream>,
    shared: SharedBuf,
    lease: Option<InputLease>,
}

impl AudioInput {
    /// Open the default input device, preferring `want_sr` when the device supports it.
    pub fn start(want_sr: u32, logger: Arc<Logger>) -> Result<Self> {
        let lease = InputLease::acquire()?;

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::CaptureUnavailable("no default input device (microphone) found".into()))?;
        let default_config = device.default_input_config().map_err(unavailable)?;
        let sample_format = default_config.sample_format();
        let mut config = default_config.config();
        match maybe_rate_supported(&device, want_sr) {
            Some(sr) => {
                config.sample_rate.0 = sr;
            }
            None => {
                let _ = crate::log_warn!(
                    logger,
                    "Input device does not support {} Hz; using {} Hz",
                    want_sr,
                    config.sample_rate.0
                );
            }
        }

        let _ = crate::log_info!(
            logger,
            "Mic device: {} ({} Hz, {} channel(s))",
            device.name().unwrap_or_default(),
            config.sample_rate.0,
            config.channels
        );

        let shared = SharedBuf::new(config.sample_rate.0);
        let (tx, rx) = bounded::<Vec<f32>>(8);
        let stream = build_input_stream(&device, &config, sample_format, tx, logger)?;
        stream.play().map_err(unavailable)?;

        {
            let shared_clone = shared.clone();
            thread::spawn(move || audio_sink_thread(rx, shared_clone));
        }

        Ok(Self { stream: Some(stream), shared, lease: Some(lease) })
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.sr
    }

    pub fn latest(&self, n: usize) -> Option<Vec<f32>> {
        self.shared.latest(n)
    }

    /// Close the stream. Safe to call more than once. Dropping the stream drops the
    /// callback's sender, which ends the sink thread.
    pub fn stop(&mut self) {
        self.stream.take();
        self.lease.take();
    }
}

impl Drop for AudioInput {
    fn drop(&mut self) {
        self.stop();
    }
}
