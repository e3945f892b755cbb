//! Recording manifests
//!
//! A recording is one or more audio sources that together provide a set of
//! channels, plus a chain of transforms applied when the audio is loaded.
//! Every perturbation adds a transform and updates the declared duration and
//! sample count; the audio itself is only touched by `load_audio`.

use crate::audio::{self, AudioTransform, NarrowbandCodec, SampleWindow};
use crate::error::{Error, Result};
use cutkit_common::timing::{
    compute_num_samples, format_factor, perturb_num_samples, Seconds,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Samples a decoded source may differ from the declared length before the
/// mismatch becomes an error (25 ms at the recording's rate)
const LENGTH_TOLERANCE_SECONDS: Seconds = 0.025;

/// Where a set of channels comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudioSource {
    File {
        channels: Vec<u32>,
        source: PathBuf,
    },
    Memory {
        channels: Vec<u32>,
        #[serde(with = "crate::manifest::base64_bytes")]
        source: Arc<[u8]>,
    },
    /// Payload lives in a Shar archive and is not attached
    Shar { channels: Vec<u32> },
}

impl AudioSource {
    pub fn channels(&self) -> &[u32] {
        match self {
            AudioSource::File { channels, .. }
            | AudioSource::Memory { channels, .. }
            | AudioSource::Shar { channels } => channels,
        }
    }

    fn decode(&self, window: SampleWindow) -> Result<audio::DecodedAudio> {
        match self {
            AudioSource::File { source, .. } => audio::decode_file_window(source, window),
            AudioSource::Memory { source, .. } => audio::decode_bytes_window(source, window),
            AudioSource::Shar { .. } => Err(Error::Load(
                "Audio was exported to a Shar archive and is not attached".to_string(),
            )),
        }
    }
}

/// Recording manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub id: String,
    pub sources: Vec<AudioSource>,
    pub sampling_rate: u32,
    pub num_samples: u64,
    pub duration: Seconds,
    pub channel_ids: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<AudioTransform>,
    /// Opaque video stream description, when the recording has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<serde_json::Value>,
}

impl Recording {
    /// Build a recording, deriving `duration` and `channel_ids` from the sources
    pub fn new(id: impl Into<String>, sources: Vec<AudioSource>, sampling_rate: u32, num_samples: u64) -> Self {
        let mut channel_ids: Vec<u32> = sources.iter().flat_map(|s| s.channels().iter().copied()).collect();
        channel_ids.sort_unstable();
        channel_ids.dedup();
        Recording {
            id: id.into(),
            sources,
            sampling_rate,
            num_samples,
            duration: num_samples as f64 / sampling_rate as f64,
            channel_ids,
            transforms: Vec::new(),
            video: None,
        }
    }

    /// Describe an audio file by reading its header
    ///
    /// WAV headers are read with hound; other formats are fully decoded.
    pub fn from_file(path: &Path, id: Option<&str>) -> Result<Self> {
        let id = id
            .map(str::to_string)
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().to_string()))
            .ok_or_else(|| Error::Precondition(format!("Cannot derive an id from {}", path.display())))?;

        let (num_channels, sampling_rate, num_samples) = match hound::WavReader::open(path) {
            Ok(reader) => {
                let spec = reader.spec();
                (spec.channels as u32, spec.sample_rate, reader.duration() as u64)
            }
            Err(_) => {
                let decoded = audio::decode_file(path)?;
                (
                    decoded.num_channels() as u32,
                    decoded.sampling_rate,
                    decoded.num_samples() as u64,
                )
            }
        };

        Ok(Recording::new(
            id,
            vec![AudioSource::File {
                channels: (0..num_channels).collect(),
                source: path.to_path_buf(),
            }],
            sampling_rate,
            num_samples,
        ))
    }

    pub fn num_channels(&self) -> usize {
        self.channel_ids.len()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// At least one source holds its payload in memory
    pub fn is_in_memory(&self) -> bool {
        self.sources.iter().any(|s| matches!(s, AudioSource::Memory { .. }))
    }

    /// Every source is a Shar placeholder
    pub fn is_placeholder(&self) -> bool {
        !self.sources.is_empty() && self.sources.iter().all(|s| matches!(s, AudioSource::Shar { .. }))
    }

    /// Load `(channels, samples)` audio for a window of the recording
    ///
    /// # Arguments
    /// * `channels` - Channels to load, in order (all channels when `None`)
    /// * `offset` - Window start in seconds
    /// * `duration` - Window length (to the end of the recording when `None`)
    ///
    /// # Returns
    /// Audio at `self.sampling_rate` with exactly the declared number of
    /// samples for the window
    pub fn load_audio(&self, channels: Option<&[u32]>, offset: Seconds, duration: Option<Seconds>) -> Result<Array2<f32>> {
        let channels: Vec<u32> = match channels {
            Some(c) => c.to_vec(),
            None => self.channel_ids.clone(),
        };
        for c in &channels {
            if !self.channel_ids.contains(c) {
                return Err(Error::Load(format!(
                    "Recording {} has no channel {} (available: {:?})",
                    self.id, c, self.channel_ids
                )));
            }
        }

        let tolerance = LENGTH_TOLERANCE_SECONDS.max(1.0 / self.sampling_rate as f64);
        if offset < 0.0 || offset > self.duration + tolerance {
            return Err(Error::Load(format!(
                "Offset {} outside recording {} of duration {}",
                offset, self.id, self.duration
            )));
        }
        if let Some(d) = duration {
            if offset + d > self.duration + tolerance {
                return Err(Error::Load(format!(
                    "Window [{}, {}] exceeds recording {} of duration {}",
                    offset,
                    offset + d,
                    self.id,
                    self.duration
                )));
            }
        }

        // Walk the transform chain backwards to find the source window
        let mut source_offset = offset;
        let mut source_duration = duration;
        let mut source_rate = self.sampling_rate;
        for transform in self.transforms.iter().rev() {
            let (o, d) = transform.reverse_timestamps(source_offset, source_duration, source_rate);
            source_offset = o;
            source_duration = d;
            source_rate = transform.input_sampling_rate(source_rate);
        }

        let mut planar = self.read_sources(&channels, source_offset, source_duration, source_rate)?;
        let mut rate = source_rate;
        for transform in &self.transforms {
            let (out, out_rate) = transform.apply(planar, rate)?;
            planar = out;
            rate = out_rate;
        }

        let expected = compute_num_samples(duration.unwrap_or(self.duration - offset), self.sampling_rate).max(0) as usize;
        let actual = planar.first().map(Vec::len).unwrap_or(0);
        let allowed = compute_num_samples(tolerance, self.sampling_rate) as usize;
        if actual + allowed < expected {
            return Err(Error::Load(format!(
                "Recording {} yielded {} samples, expected {}",
                self.id, actual, expected
            )));
        }
        if actual != expected {
            debug!("Fixing length of {} from {} to {} samples", self.id, actual, expected);
        }
        audio::fix_length(&mut planar, expected);
        Ok(audio::planar_to_array(&planar))
    }

    fn read_sources(&self, channels: &[u32], offset: Seconds, duration: Option<Seconds>, sampling_rate: u32) -> Result<Vec<Vec<f32>>> {
        let window = SampleWindow::new(
            compute_num_samples(offset, sampling_rate).max(0) as u64,
            duration.map(|d| compute_num_samples(d, sampling_rate).max(0) as u64),
        );

        let mut out: Vec<Option<Vec<f32>>> = vec![None; channels.len()];
        for source in &self.sources {
            let wanted: Vec<(usize, usize)> = channels
                .iter()
                .enumerate()
                .filter_map(|(slot, c)| source.channels().iter().position(|sc| sc == c).map(|pos| (slot, pos)))
                .collect();
            if wanted.is_empty() {
                continue;
            }

            let decoded = source.decode(window)?;
            if decoded.sampling_rate != sampling_rate {
                return Err(Error::Load(format!(
                    "Source of {} is {} Hz, manifest expects {} Hz",
                    self.id, decoded.sampling_rate, sampling_rate
                )));
            }
            for (slot, pos) in wanted {
                let samples = decoded.channels.get(pos).ok_or_else(|| {
                    Error::Load(format!("Source of {} has no channel at position {}", self.id, pos))
                })?;
                out[slot] = Some(samples.clone());
            }
        }

        out.into_iter()
            .zip(channels)
            .map(|(samples, c)| {
                samples.ok_or_else(|| Error::Load(format!("No source of {} provides channel {}", self.id, c)))
            })
            .collect()
    }

    /// In-memory copy of a window holding exactly the requested channels
    ///
    /// The copy has no transforms: they are baked into the encoded samples.
    pub fn move_to_memory(&self, channels: Option<&[u32]>, offset: Seconds, duration: Option<Seconds>) -> Result<Recording> {
        let samples = self.load_audio(channels, offset, duration)?;
        let channel_ids: Vec<u32> = match channels {
            Some(c) => c.to_vec(),
            None => self.channel_ids.clone(),
        };
        let bytes = audio::encode_wav(&samples, self.sampling_rate)?;
        let num_samples = samples.ncols() as u64;
        Ok(Recording {
            id: self.id.clone(),
            sources: vec![AudioSource::Memory {
                channels: channel_ids.clone(),
                source: Arc::from(bytes),
            }],
            sampling_rate: self.sampling_rate,
            num_samples,
            duration: num_samples as f64 / self.sampling_rate as f64,
            channel_ids,
            transforms: Vec::new(),
            video: self.video.clone(),
        })
    }

    /// Same metadata, every source replaced by a Shar placeholder
    pub fn to_placeholder(&self) -> Recording {
        Recording {
            sources: vec![AudioSource::Shar {
                channels: self.channel_ids.clone(),
            }],
            ..self.clone()
        }
    }

    /// Prefix relative source file paths with `prefix`
    pub fn with_path_prefix(&self, prefix: &Path) -> Recording {
        let sources = self
            .sources
            .iter()
            .map(|s| match s {
                AudioSource::File { channels, source } if source.is_relative() => AudioSource::File {
                    channels: channels.clone(),
                    source: prefix.join(source),
                },
                other => other.clone(),
            })
            .collect();
        Recording {
            sources,
            ..self.clone()
        }
    }

    fn with_transform(&self, transform: AudioTransform) -> Recording {
        let mut out = self.clone();
        out.transforms.push(transform);
        out
    }

    /// Resample to `sampling_rate`; the duration is unchanged
    pub fn resample(&self, sampling_rate: u32) -> Recording {
        if sampling_rate == self.sampling_rate {
            return self.clone();
        }
        let mut out = self.with_transform(AudioTransform::Resample {
            source_sampling_rate: self.sampling_rate,
            target_sampling_rate: sampling_rate,
        });
        out.sampling_rate = sampling_rate;
        out.num_samples = compute_num_samples(self.duration, sampling_rate).max(0) as u64;
        out
    }

    pub fn perturb_speed(&self, factor: f64, affix_id: bool) -> Recording {
        let mut out = self.with_transform(AudioTransform::Speed { factor });
        self.scale_length(&mut out, factor);
        if affix_id {
            out.id = format!("{}_sp{}", self.id, format_factor(factor));
        }
        out
    }

    pub fn perturb_tempo(&self, factor: f64, affix_id: bool) -> Recording {
        let mut out = self.with_transform(AudioTransform::Tempo { factor });
        self.scale_length(&mut out, factor);
        if affix_id {
            out.id = format!("{}_tp{}", self.id, format_factor(factor));
        }
        out
    }

    pub fn perturb_volume(&self, factor: f64, affix_id: bool) -> Recording {
        let mut out = self.with_transform(AudioTransform::Volume { factor });
        if affix_id {
            out.id = format!("{}_vp{}", self.id, format_factor(factor));
        }
        out
    }

    pub fn narrowband(&self, codec: NarrowbandCodec, restore_orig_sr: bool, affix_id: bool) -> Recording {
        let mut out = self.with_transform(AudioTransform::Narrowband {
            codec,
            source_sampling_rate: self.sampling_rate,
            restore_orig_sr,
        });
        if !restore_orig_sr {
            let rate = audio::transform::NARROWBAND_SAMPLING_RATE;
            out.sampling_rate = rate;
            out.num_samples = compute_num_samples(self.duration, rate).max(0) as u64;
        }
        if affix_id {
            out.id = format!("{}_nb_{}", self.id, codec);
        }
        out
    }

    pub fn normalize_loudness(&self, target: f64, affix_id: bool) -> Recording {
        let mut out = self.with_transform(AudioTransform::LoudnessNormalization { target });
        if affix_id {
            out.id = format!("{}_ln{}", self.id, format_factor(target));
        }
        out
    }

    pub fn dereverb_wpe(&self, affix_id: bool) -> Recording {
        let mut out = self.with_transform(AudioTransform::DereverbWPE);
        if affix_id {
            out.id = format!("{}_wpe", self.id);
        }
        out
    }

    fn scale_length(&self, out: &mut Recording, factor: f64) {
        let num_samples = perturb_num_samples(self.num_samples as i64, factor).max(0) as u64;
        out.num_samples = num_samples;
        out.duration = num_samples as f64 / self.sampling_rate as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// One second of a 16 kHz ramp in memory, two channels
    fn memory_recording() -> Recording {
        let samples = Array2::from_shape_fn((2, 16000), |(c, i)| {
            let v = (i as f32 / 16000.0) - 0.5;
            if c == 0 { v } else { -v }
        });
        let bytes = audio::encode_wav(&samples, 16000).unwrap();
        Recording::new(
            "rec",
            vec![AudioSource::Memory {
                channels: vec![0, 1],
                source: Arc::from(bytes),
            }],
            16000,
            16000,
        )
    }

    #[test]
    fn test_new_derives_channels_and_duration() {
        let rec = Recording::new(
            "r",
            vec![
                AudioSource::Shar { channels: vec![1] },
                AudioSource::Shar { channels: vec![0] },
            ],
            8000,
            4000,
        );
        assert_eq!(rec.channel_ids, vec![0, 1]);
        assert_eq!(rec.duration, 0.5);
        assert!(rec.is_placeholder());
    }

    #[test]
    fn test_load_window_and_channel() {
        let rec = memory_recording();
        let audio = rec.load_audio(Some(&[1]), 0.25, Some(0.5)).unwrap();
        assert_eq!(audio.dim(), (1, 8000));
        assert!((audio[[0, 0]] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_file_window_matches_full_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        let rec = memory_recording();
        let full = rec.load_audio(None, 0.0, None).unwrap();
        std::fs::write(&path, audio::encode_wav(&full, 16000).unwrap()).unwrap();
        let on_disk = Recording::new(
            "rec",
            vec![AudioSource::File {
                channels: vec![0, 1],
                source: path,
            }],
            16000,
            16000,
        );

        let window = on_disk.load_audio(None, 0.75, Some(0.125)).unwrap();
        assert_eq!(window.dim(), (2, 2000));
        assert_eq!(window, full.slice(ndarray::s![.., 12000..14000]).to_owned());

        let tail = on_disk.load_audio(Some(&[1]), 0.9, None).unwrap();
        assert_eq!(tail.row(0), full.row(1).slice(ndarray::s![14400..]));
    }

    #[test]
    fn test_load_unknown_channel_fails() {
        let rec = memory_recording();
        assert!(matches!(rec.load_audio(Some(&[5]), 0.0, None), Err(Error::Load(_))));
    }

    #[test]
    fn test_load_past_end_fails() {
        let rec = memory_recording();
        assert!(rec.load_audio(None, 0.5, Some(1.0)).is_err());
    }

    #[test]
    fn test_move_to_memory_window() {
        let rec = memory_recording();
        let moved = rec.move_to_memory(Some(&[0]), 0.5, Some(0.25)).unwrap();
        assert_eq!(moved.channel_ids, vec![0]);
        assert_eq!(moved.num_samples, 4000);
        assert_eq!(moved.duration, 0.25);
        let audio = moved.load_audio(None, 0.0, None).unwrap();
        assert_eq!(audio.dim(), (1, 4000));
        assert!(audio[[0, 0]].abs() < 1e-6);
    }

    #[test]
    fn test_perturb_speed_updates_length_and_id() {
        let rec = memory_recording();
        let sp = rec.perturb_speed(1.1, true);
        assert_eq!(sp.id, "rec_sp1.1");
        assert_eq!(sp.num_samples, 14545);
        assert_eq!(sp.transforms, vec![AudioTransform::Speed { factor: 1.1 }]);

        let audio = sp.load_audio(None, 0.0, None).unwrap();
        assert_eq!(audio.dim(), (2, 14545));
    }

    #[test]
    fn test_resample_load() {
        let rec = memory_recording().resample(8000);
        assert_eq!(rec.num_samples, 8000);
        assert_eq!(rec.duration, 1.0);
        let audio = rec.load_audio(None, 0.0, None).unwrap();
        assert_eq!(audio.dim(), (2, 8000));
    }

    #[test]
    fn test_volume_and_narrowband_ids() {
        let rec = memory_recording();
        assert_eq!(rec.perturb_volume(2.0, true).id, "rec_vp2.0");
        let nb = rec.narrowband(NarrowbandCodec::Mulaw, false, true);
        assert_eq!(nb.id, "rec_nb_mulaw");
        assert_eq!(nb.sampling_rate, 8000);
        assert_eq!(nb.num_samples, 8000);
        let restored = rec.narrowband(NarrowbandCodec::Mulaw, true, false);
        assert_eq!(restored.id, "rec");
        assert_eq!(restored.sampling_rate, 16000);
    }

    #[test]
    fn test_wpe_fails_at_load() {
        let rec = memory_recording().dereverb_wpe(true);
        assert_eq!(rec.id, "rec_wpe");
        assert!(matches!(rec.load_audio(None, 0.0, None), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_placeholder_fails_to_load() {
        let placeholder = memory_recording().to_placeholder();
        assert!(placeholder.is_placeholder());
        assert_eq!(placeholder.num_samples, 16000);
        assert!(matches!(placeholder.load_audio(None, 0.0, None), Err(Error::Load(_))));
    }

    #[test]
    fn test_path_prefix() {
        let rec = Recording::new(
            "r",
            vec![AudioSource::File {
                channels: vec![0],
                source: PathBuf::from("audio/r.wav"),
            }],
            16000,
            16000,
        );
        let prefixed = rec.with_path_prefix(Path::new("/corpus"));
        match &prefixed.sources[0] {
            AudioSource::File { source, .. } => assert_eq!(source, &PathBuf::from("/corpus/audio/r.wav")),
            other => panic!("unexpected source {:?}", other),
        }
    }
}
