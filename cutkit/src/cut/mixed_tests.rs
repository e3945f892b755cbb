//! Tests for mixed cuts and padding

use super::*;
use crate::cut::DataCut;
use crate::manifest::{AudioSource, Compression, Features, Recording, Tensor};
use ndarray::{arr1, Array2};
use std::sync::Arc;

const SR: u32 = 16000;

fn constant_recording(id: &str, value: f32) -> Arc<Recording> {
    let samples = Array2::from_elem((1, SR as usize), value);
    let bytes = crate::audio::encode_wav(&samples, SR).unwrap();
    Arc::new(Recording::new(
        id,
        vec![AudioSource::Memory {
            channels: vec![0],
            source: Arc::from(bytes),
        }],
        SR,
        SR as u64,
    ))
}

fn data_cut(id: &str, value: f32) -> DataCut {
    DataCut::from_recording(constant_recording(id, value)).with_supervisions(vec![SupervisionSegment::new(
        format!("{}-sup", id),
        id,
        0.2,
        0.4,
    )])
}

fn with_features(cut: DataCut) -> DataCut {
    let matrix = Array2::from_elem((100, 3), 2.0f32);
    cut.with_features(Arc::new(
        Features::from_matrix("fbank", &matrix, 0.01, SR, Compression::Raw).unwrap(),
    ))
}

fn padded(cut: DataCut, duration: Seconds, direction: Direction) -> MixedCut {
    let options = PadOptions {
        direction,
        preserve_id: true,
        ..PadOptions::default()
    };
    match pad_cut(&Cut::from(cut), PadTarget::Duration(duration), &options).unwrap() {
        Cut::Mixed(m) => m,
        other => panic!("expected a mixed cut, got {:?}", other),
    }
}

fn offsets(mix: &MixedCut) -> Vec<Seconds> {
    mix.tracks.iter().map(|t| t.offset).collect()
}

// ============================================================================
// Padding
// ============================================================================

#[test]
fn test_pad_right_audio_and_features() {
    let mix = padded(with_features(data_cut("a", 0.5)), 1.5, Direction::Right);
    assert_eq!(mix.id, "a");
    assert_eq!(offsets(&mix), vec![0.0, 1.0]);
    assert_eq!(mix.duration(), 1.5);
    assert_eq!(mix.num_samples(), Some(24000));
    assert_eq!(mix.num_frames(), Some(150));

    let audio = mix.load_audio().unwrap();
    assert_eq!(audio.dim(), (1, 24000));
    assert_eq!(audio[[0, 0]], 0.5);
    assert_eq!(audio[[0, 23999]], 0.0);

    let feats = mix.load_features().unwrap();
    assert_eq!(feats.dim(), (150, 3));
    assert!((feats[[0, 0]] - 2.0).abs() < 1e-6);
    assert_eq!(feats[[149, 2]], LOG_EPSILON);
}

#[test]
fn test_pad_left_and_both() {
    let left = padded(data_cut("a", 0.5), 2.0, Direction::Left);
    assert_eq!(offsets(&left), vec![0.0, 1.0]);
    assert!(left.tracks[0].cut.is_padding());
    assert_eq!(left.supervisions()[0].start, 1.2);

    let both = padded(data_cut("a", 0.5), 2.0, Direction::Both);
    assert_eq!(offsets(&both), vec![0.0, 0.5, 1.5]);
    assert_eq!(both.duration(), 2.0);
    let audio = both.load_audio().unwrap();
    assert_eq!(audio[[0, 7999]], 0.0);
    assert_eq!(audio[[0, 8000]], 0.5);
}

#[test]
fn test_extending_stereo_keeps_channels() {
    let mut samples = Array2::from_elem((2, SR as usize), 0.5f32);
    samples.row_mut(1).fill(-0.5);
    let bytes = crate::audio::encode_wav(&samples, SR).unwrap();
    let recording = Arc::new(Recording::new(
        "stereo",
        vec![AudioSource::Memory {
            channels: vec![0, 1],
            source: Arc::from(bytes),
        }],
        SR,
        SR as u64,
    ));

    let extended = Cut::from_recording(recording)
        .extend_by(0.5, Direction::Right, true, true)
        .unwrap();
    assert!(matches!(extended, Cut::Mixed(_)));
    assert_eq!(extended.num_channels(), 2);

    let audio = extended.load_audio().unwrap();
    assert_eq!(audio.dim(), (2, 24000));
    assert!((audio[[0, 0]] - 0.5).abs() < 1e-6);
    assert!((audio[[1, 0]] + 0.5).abs() < 1e-6);
    assert!((audio[[0, 15999]] - 0.5).abs() < 1e-6);
    assert_eq!(audio[[0, 23999]], 0.0);
    assert_eq!(audio[[1, 23999]], 0.0);

    let rendered = extended.materialize().unwrap();
    assert_eq!(rendered.num_channels(), 2);
    assert_eq!(rendered.load_audio().unwrap(), audio);
}

#[test]
fn test_mixed_channel_counts_fall_back_to_mono() {
    let mono = data_cut("a", 0.5);
    let mut samples = Array2::from_elem((2, SR as usize), 0.25f32);
    samples.row_mut(1).fill(0.75);
    let bytes = crate::audio::encode_wav(&samples, SR).unwrap();
    let stereo = DataCut::from_recording(Arc::new(Recording::new(
        "b",
        vec![AudioSource::Memory {
            channels: vec![0, 1],
            source: Arc::from(bytes),
        }],
        SR,
        SR as u64,
    )));

    let mix = MixedCut::new(
        "ab",
        vec![MixTrack::new(Cut::from(mono), 0.0), MixTrack::new(Cut::from(stereo), 0.0)],
    );
    assert_eq!(mix.num_channels(), 1);
    let audio = mix.load_audio().unwrap();
    assert_eq!(audio.dim(), (1, 16000));
    assert!((audio[[0, 100]] - 1.0).abs() < 1e-5);
}

#[test]
fn test_pad_is_noop_when_long_enough() {
    let cut = Cut::from(data_cut("a", 0.5));
    assert_eq!(cut.pad(PadTarget::Duration(0.5), &PadOptions::default()).unwrap(), cut);
    assert_eq!(cut.pad(PadTarget::NumSamples(16000), &PadOptions::default()).unwrap(), cut);
}

#[test]
fn test_pad_to_frame_count() {
    let cut = Cut::from(with_features(data_cut("a", 0.5)));
    let mix = cut.pad(PadTarget::NumFrames(120), &PadOptions::default()).unwrap();
    assert_eq!(mix.num_frames(), Some(120));
    match &mix {
        Cut::Mixed(m) => match &m.tracks[1].cut {
            Cut::Padding(p) => assert_eq!(p.num_frames, Some(20)),
            other => panic!("unexpected track {:?}", other),
        },
        other => panic!("unexpected cut {:?}", other),
    }
    assert!(Cut::from(data_cut("a", 0.5))
        .pad(PadTarget::NumFrames(120), &PadOptions::default())
        .is_err());
}

#[test]
fn test_padding_a_mix_extends_it() {
    let mix = padded(data_cut("a", 0.5), 1.5, Direction::Right);
    let again = pad_cut(
        &Cut::Mixed(mix),
        PadTarget::Duration(2.0),
        &PadOptions {
            direction: Direction::Left,
            ..PadOptions::default()
        },
    )
    .unwrap();
    match again {
        Cut::Mixed(m) => {
            assert_eq!(offsets(&m), vec![0.0, 0.5, 1.5]);
            assert_eq!(m.duration(), 2.0);
        }
        other => panic!("unexpected cut {:?}", other),
    }
}

#[test]
fn test_custom_field_padding() {
    let tensor = Tensor::Int(arr1(&[7i64; 100]).into_dyn());
    let cut = data_cut("a", 0.5)
        .attach_tensor("ali", &tensor, Some(0.01), Some(0), false)
        .unwrap();
    let options = PadOptions {
        direction: Direction::Left,
        pad_value_dict: Some(serde_json::Map::from_iter([("ali".to_string(), serde_json::json!(-1))])),
        ..PadOptions::default()
    };
    let mix = pad_cut(&Cut::from(cut), PadTarget::Duration(1.5), &options).unwrap();
    match mix.load_custom("ali").unwrap() {
        Payload::Tensor(Tensor::Int(a)) => {
            assert_eq!(a.shape(), &[150]);
            assert_eq!(a[[0]], -1);
            assert_eq!(a[[49]], -1);
            assert_eq!(a[[50]], 7);
        }
        other => panic!("unexpected payload {:?}", other),
    }
    assert!(matches!(mix.load_custom("missing"), Err(Error::Load(_))));
}

// ============================================================================
// Mixing
// ============================================================================

#[test]
fn test_snr_gain() {
    let mut second = MixTrack::new(Cut::from(data_cut("b", 0.2)), 0.0);
    second.snr = Some(10.0);
    let mix = MixedCut::new("mix", vec![MixTrack::new(Cut::from(data_cut("a", 0.2)), 0.0), second]);
    let audio = mix.load_audio().unwrap();
    let expected = 0.2 + 0.2 * (0.1f32).sqrt();
    assert!((audio[[0, 100]] - expected).abs() < 1e-4);
    assert_eq!(mix.supervisions().len(), 2);
}

#[test]
fn test_truncate_mix() {
    let mix = padded(data_cut("a", 0.5), 1.5, Direction::Right);
    let options = TruncateOptions {
        preserve_id: true,
        ..TruncateOptions::default()
    };
    let t = mix.truncate(0.5, Some(0.75), &options).unwrap();
    assert_eq!(t.id, "a");
    assert_eq!(t.duration(), 0.75);
    assert_eq!(offsets(&t), vec![0.0, 0.5]);
    assert_eq!(t.tracks[0].cut.start(), 0.5);
    assert_eq!(t.tracks[0].cut.duration(), 0.5);
    assert_eq!(t.tracks[1].cut.duration(), 0.25);
    assert_eq!(t.supervisions()[0].start, -0.3);
    assert_eq!(t.load_audio().unwrap().dim(), (1, 12000));

    let tail = mix.truncate(1.2, None, &options).unwrap();
    assert_eq!(tail.tracks.len(), 1);
    assert!(tail.tracks[0].cut.is_padding());
    assert!(mix.truncate(1.5, None, &options).is_err());
}

#[test]
fn test_perturb_speed_rescales_offsets() {
    let mix = padded(data_cut("a", 0.5), 1.5, Direction::Right);
    let fast = mix.perturb_speed(1.1, true).unwrap();
    assert_eq!(fast.id, "a_sp1.1");
    assert_eq!(fast.tracks[0].cut.id(), "a_sp1.1");
    assert_eq!(fast.tracks[1].offset, 14545.0 / 16000.0);
    assert_eq!(fast.tracks[1].cut.id(), format!("{}_sp1.1", mix.tracks[1].cut.id()));
}

#[test]
fn test_merge_and_fill_supervisions() {
    let mix = MixedCut::new(
        "mix",
        vec![
            MixTrack::new(Cut::from(data_cut("a", 0.2)), 0.0),
            MixTrack::new(Cut::from(data_cut("b", 0.2)), 0.5),
        ],
    );
    let merged = mix.merge_supervisions(MergePolicy::Delimiter, None);
    let sups = merged.supervisions();
    assert_eq!(sups.len(), 1);
    assert_eq!(sups[0].id, "cat#a-sup#b-sup");
    assert_eq!(sups[0].start, 0.2);
    assert_eq!(sups[0].end(), 1.1);
    assert!(merged.tracks[1].cut.supervisions().is_empty());

    assert!(matches!(mix.fill_supervision(true, true), Err(Error::Precondition(_))));
    let bare = MixedCut::new("bare", vec![MixTrack::new(Cut::from(data_cut("a", 0.2).drop_supervisions()), 0.0)]);
    let filled = bare.fill_supervision(true, false).unwrap();
    assert_eq!(filled.supervisions()[0].duration, 1.0);
    assert_eq!(filled.supervisions()[0].id, "bare");
}

#[test]
fn test_drop_in_memory_data_per_track() {
    let mix = padded(data_cut("a", 0.5), 1.5, Direction::Right);
    let dropped = mix.drop_in_memory_data();
    assert_eq!(dropped.duration(), mix.duration());
    assert_eq!(dropped.num_samples(), mix.num_samples());
    assert!(dropped.load_audio().is_err());
}
