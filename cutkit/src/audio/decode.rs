//! Audio decoding
//!
//! WAV payloads are read with hound; every other container goes through
//! symphonia (MP3, FLAC, AAC, MP4/M4A, Vorbis).
//!
//! # Sample Format
//!
//! Output is planar f32 with one `Vec` per source channel, at the file's
//! native sample rate. No downmixing or resampling happens here.
//!
//! # Windows
//!
//! The `*_window` variants decode only `[first, first + count)` in samples.
//! WAV readers seek straight to `first`; symphonia seeks to the nearest
//! packet and the samples before `first` are dropped after decoding.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use tracing::{debug, warn};

/// Fully decoded audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Planar samples, one `Vec` per channel
    pub channels: Vec<Vec<f32>>,

    /// Native sample rate of the payload
    pub sampling_rate: u32,
}

impl DecodedAudio {
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_samples(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }
}

/// Range of samples to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleWindow {
    /// First sample, at the payload's native rate
    pub first: u64,
    /// Samples to keep; `None` reads to the end
    pub count: Option<u64>,
}

impl SampleWindow {
    /// The whole payload
    pub const ALL: SampleWindow = SampleWindow { first: 0, count: None };

    pub fn new(first: u64, count: Option<u64>) -> Self {
        SampleWindow { first, count }
    }

    fn end(&self) -> Option<u64> {
        self.count.map(|n| self.first.saturating_add(n))
    }

    /// Part of `[start, start + len)` that falls inside the window, relative to `start`
    fn overlap(&self, start: u64, len: u64) -> std::ops::Range<usize> {
        let lo = self.first.max(start);
        let hi = self.end().map_or(start + len, |end| end.min(start + len));
        if hi <= lo {
            return 0..0;
        }
        (lo - start) as usize..(hi - start) as usize
    }
}

/// Decode an audio file
///
/// # Arguments
/// * `path` - Path to the audio file
///
/// # Returns
/// Planar samples and the native sampling rate
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    decode_file_window(path, SampleWindow::ALL)
}

/// Decode `window` of an audio file
pub fn decode_file_window(path: &Path, window: SampleWindow) -> Result<DecodedAudio> {
    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false);

    if is_wav {
        let file = File::open(path)
            .map_err(|e| Error::Load(format!("Cannot open {}: {}", path.display(), e)))?;
        let reader = hound::WavReader::new(BufReader::new(file))
            .map_err(|e| Error::Load(format!("Cannot open {}: {}", path.display(), e)))?;
        return read_wav(reader, window);
    }

    let file = File::open(path)
        .map_err(|e| Error::Load(format!("Cannot open {}: {}", path.display(), e)))?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    decode_with_symphonia(Box::new(file), hint, window)
}

/// Decode an in-memory audio payload
pub fn decode_bytes(bytes: &[u8]) -> Result<DecodedAudio> {
    decode_bytes_window(bytes, SampleWindow::ALL)
}

/// Decode `window` of an in-memory audio payload
pub fn decode_bytes_window(bytes: &[u8], window: SampleWindow) -> Result<DecodedAudio> {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        let reader = hound::WavReader::new(Cursor::new(bytes))
            .map_err(|e| Error::Codec(format!("Invalid WAV payload: {}", e)))?;
        return read_wav(reader, window);
    }
    decode_with_symphonia(Box::new(Cursor::new(bytes.to_vec())), Hint::new(), window)
}

fn read_wav<R: Read + Seek>(mut reader: hound::WavReader<R>, window: SampleWindow) -> Result<DecodedAudio> {
    let spec = reader.spec();
    let num_channels = spec.channels as usize;
    if num_channels == 0 {
        return Err(Error::Codec("WAV payload declares zero channels".to_string()));
    }

    let total = reader.duration() as u64;
    let first = window.first.min(total);
    let frames = window.count.map_or(total - first, |n| n.min(total - first));
    reader
        .seek(first as u32)
        .map_err(|e| Error::Codec(format!("WAV seek failed: {}", e)))?;
    let wanted = frames as usize * num_channels;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .take(wanted)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Codec(format!("WAV read failed: {}", e)))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .take(wanted)
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Codec(format!("WAV read failed: {}", e)))?
        }
    };

    Ok(DecodedAudio {
        channels: deinterleave(&interleaved, num_channels),
        sampling_rate: spec.sample_rate,
    })
}

fn decode_with_symphonia(source: Box<dyn MediaSource>, hint: Hint, window: SampleWindow) -> Result<DecodedAudio> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Codec(format!("Unsupported container: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| Error::Codec("No audio track found".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sampling_rate = codec_params
        .sample_rate
        .ok_or_else(|| Error::Codec("Audio track has no sample rate".to_string()))?;
    let mut num_channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);

    let time_base = codec_params.time_base;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Codec(format!("Unsupported codec: {}", e)))?;

    if window.first > 0 {
        let time = Time::new(
            window.first / sampling_rate as u64,
            (window.first % sampling_rate as u64) as f64 / sampling_rate as f64,
        );
        match format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(track_id),
            },
        ) {
            Ok(seeked) => {
                debug!("Seeked to ts {} (wanted {})", seeked.actual_ts, seeked.required_ts);
                decoder.reset();
            }
            Err(e) => warn!("Seek failed, decoding from the start: {}", e),
        }
    }

    let mut interleaved: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(Error::Codec(format!("Demux failed: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }
        let packet_start = ts_to_frames(packet.ts(), time_base, sampling_rate);
        if window.end().is_some_and(|end| packet_start >= end) {
            break;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(Error::Codec(format!("Decode failed: {}", e))),
        };

        let spec = *decoded.spec();
        num_channels = spec.channels.count();
        let frames = decoded.frames() as u64;
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        let keep = window.overlap(packet_start, frames);
        interleaved.extend_from_slice(&buf.samples()[keep.start * num_channels..keep.end * num_channels]);
    }

    if num_channels == 0 {
        return Err(Error::Codec("Audio track has no channels".to_string()));
    }

    debug!(
        "Decoded {} frames x {} channels at {} Hz",
        interleaved.len() / num_channels,
        num_channels,
        sampling_rate
    );

    Ok(DecodedAudio {
        channels: deinterleave(&interleaved, num_channels),
        sampling_rate,
    })
}

/// Position of a packet timestamp in samples
fn ts_to_frames(ts: u64, time_base: Option<TimeBase>, sampling_rate: u32) -> u64 {
    match time_base {
        Some(tb) => {
            let time = tb.calc_time(ts);
            ((time.seconds as f64 + time.frac) * sampling_rate as f64).round() as u64
        }
        None => ts,
    }
}

/// Convert interleaved samples to planar format.
///
/// Input:  [L, R, L, R, L, R, ...]
/// Output: [[L, L, L, ...], [R, R, R, ...]]
fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let num_frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(num_frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            planar[ch].push(*sample);
        }
    }
    planar
}
