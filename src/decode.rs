//! src/decode.rs
//!
//! Decoder for WAV/MP3/MP4(AAC)/FLAC/Vorbis using symphonia, used when importing a
//! reference from a file.

use std::{ fs::File, io::Cursor, path::Path };
use symphonia::core::{
    audio::SampleBuffer,
    codecs::DecoderOptions,
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::{ MediaSource, MediaSourceStream },
    meta::MetadataOptions,
    probe::Hint,
};
use symphonia::default::{ get_codecs, get_probe };

use crate::error::{ Error, Result };

#[derive(Debug)]
pub struct AudioData {
    pub sr: u32,
    pub channels: u16,
    pub samples_mono: Vec<f32>, // first channel only
}

fn decode_err<E: std::fmt::Display>(e: E) -> Error {
    Error::DecodeFailure(e.to_string())
}

pub fn load_first_channel<P: AsRef<Path>>(path: P) -> Result<AudioData> {
    let path_ref = path.as_ref();
    let file = File::open(path_ref).map_err(|e|
        Error::DecodeFailure(format!("{}: {}", path_ref.display(), e))
    )?;
    let ext = path_ref.extension().and_then(|e| e.to_str());
    decode_source(Box::new(file), ext)
}

/// Decode an in-memory container (e.g. an upload).
pub fn decode_bytes(bytes: Vec<u8>, ext: Option<&str>) -> Result<AudioData> {
    decode_source(Box::new(Cursor::new(bytes)), ext)
}

fn decode_source(source: Box<dyn MediaSource>, ext: Option<&str>) -> Result<AudioData> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = ext {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(decode_err)?;
    let mut format = probed.format;

    let (track_id, codec_params) = {
        let track = format
            .default_track()
            .ok_or_else(|| Error::DecodeFailure("no default audio track found".into()))?;
        (track.id, track.codec_params.clone())
    };

    let mut decoder = get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(decode_err)?;

    let sr = codec_params.sample_rate.ok_or_else(||
        Error::DecodeFailure("unknown sample rate".into())
    )?;
    let channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(1u16);

    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut mono = Vec::<f32>::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(err) => {
                return Err(decode_err(err));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => {
                continue;
            }
            Err(err) => {
                return Err(decode_err(err));
            }
        };

        let spec = *decoded.spec();
        let chan_count = spec.channels.count().max(1);

        if
            sample_buf
                .as_ref()
                .map(|b| b.capacity() < decoded.capacity())
                .unwrap_or(true)
        {
            sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };

        buf.copy_interleaved_ref(decoded);
        mono.extend(buf.samples().iter().step_by(chan_count));
    }

    if mono.is_empty() {
        return Err(Error::DecodeFailure("stream contained no audio samples".into()));
    }

    Ok(AudioData { sr, channels, samples_mono: mono })
}

/// simple linear resampler (mono)
pub fn resample_linear_mono(x: &[f32], sr_in: u32, sr_out: u32) -> Vec<f32> {
    if x.is_empty() || sr_in == 0 || sr_out == 0 || sr_in == sr_out {
        return x.to_vec();
    }
    let ratio = (sr_out as f64) / (sr_in as f64);
    let n_out = ((x.len() as f64) * ratio).floor().max(1.0) as usize;
    let last = x[x.len() - 1];
    let mut y = Vec::with_capacity(n_out);

    for i in 0..n_out {
        let pos = (i as f64) / ratio; // position in input
        let i0 = pos.floor() as usize;
        if i0 + 1 >= x.len() {
            y.push(last);
        } else {
            let t = (pos - (i0 as f64)) as f32; // frac
            let a = x[i0];
            let b = x[i0 + 1];
            y.push(a + (b - a) * t); // lerp
        }
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, sr: u32, channels: u16, frames: &[(i16, i16)]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: sr,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut w = hound::WavWriter::create(path, spec).unwrap();
        for &(l, r) in frames {
            w.write_sample(l).unwrap();
            if channels == 2 {
                w.write_sample(r).unwrap();
            }
        }
        w.finalize().unwrap();
    }

    #[test]
    fn decodes_first_channel_of_stereo_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("click.wav");
        let frames: Vec<(i16, i16)> = (0..4000).map(|i| if i == 2000 { (16384, -32768) } else { (0, 1000) }).collect();
        write_wav(&path, 22_050, 2, &frames);

        let audio = load_first_channel(&path).unwrap();
        assert_eq!(audio.sr, 22_050);
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.samples_mono.len(), 4000);
        assert!((audio.samples_mono[2000] - 0.5).abs() < 1e-3);
        assert_eq!(audio.samples_mono[0], 0.0);
    }

    #[test]
    fn decodes_from_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 48_000, 1, &vec![(8192, 0); 1000]);
        let bytes = std::fs::read(&path).unwrap();
        let audio = decode_bytes(bytes, Some("wav")).unwrap();
        assert_eq!(audio.samples_mono.len(), 1000);
    }

    #[test]
    fn garbage_is_a_decode_failure() {
        let err = decode_bytes(b"definitely not audio".to_vec(), None).unwrap_err();
        assert!(matches!(err, Error::DecodeFailure(_)));

        let dir = tempfile::tempdir().unwrap();
        let err = load_first_channel(dir.path().join("missing.wav")).unwrap_err();
        assert!(matches!(err, Error::DecodeFailure(_)));
    }

    #[test]
    fn resample_changes_length_by_ratio() {
        let x: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let y = resample_linear_mono(&x, 24_000, 48_000);
        assert_eq!(y.len(), 200);
        assert_eq!(y[0], 0.0);
        assert_eq!(y[3], 1.5);
        assert!(y.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(resample_linear_mono(&x, 48_000, 16_000).len(), 33);
        assert_eq!(resample_linear_mono(&x, 48_000, 48_000), x);
    }
}
