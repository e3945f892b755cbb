//! Tests for data cut transforms

use super::*;
use crate::cut::Cut;
use crate::manifest::{AudioSource, Compression, Features, Tensor};
use ndarray::Array2;
use std::path::PathBuf;

const SR: u32 = 16000;

/// Metadata-only ten second recording
fn file_recording() -> Arc<Recording> {
    Arc::new(Recording::new(
        "rec",
        vec![AudioSource::File {
            channels: vec![0],
            source: PathBuf::from("missing.wav"),
        }],
        SR,
        10 * SR as u64,
    ))
}

/// One second of audio held in memory
fn memory_recording() -> Arc<Recording> {
    let samples = Array2::from_shape_fn((1, SR as usize), |(_, i)| ((i % 100) as f32 / 100.0) - 0.5);
    let bytes = crate::audio::encode_wav(&samples, SR).unwrap();
    Arc::new(Recording::new(
        "rec",
        vec![AudioSource::Memory {
            channels: vec![0],
            source: Arc::from(bytes),
        }],
        SR,
        SR as u64,
    ))
}

fn sup(id: &str, start: Seconds, duration: Seconds) -> SupervisionSegment {
    SupervisionSegment::new(id, "rec", start, duration)
}

fn long_cut() -> DataCut {
    DataCut::new("c", 0.0, 10.0, 0)
        .with_recording(file_recording())
        .with_supervisions(vec![
            sup("a", 0.0, 2.0),
            sup("b", 1.5, 2.5),
            sup("d", 2.5, 2.0),
            sup("c", 5.0, 1.0),
        ])
}

fn ids(cut: &DataCut) -> Vec<&str> {
    cut.supervisions.iter().map(|s| s.id.as_str()).collect()
}

fn keep_id() -> TruncateOptions<'static> {
    TruncateOptions {
        preserve_id: true,
        ..TruncateOptions::default()
    }
}

// ============================================================================
// Truncate
// ============================================================================

#[test]
fn test_truncate_clips_at_current_end() {
    let cut = DataCut::new("c", 2.0, 8.0, 0).with_recording(file_recording());
    let t = cut.truncate(3.0, Some(10.0), &TruncateOptions::default()).unwrap();
    assert_eq!(t.start, 5.0);
    assert_eq!(t.duration, 5.0);
    assert_eq!(t.end(), cut.end());
    assert_ne!(t.id, cut.id);
}

#[test]
fn test_truncate_identity() {
    let cut = DataCut::new("c", 1.0, 4.0, 0)
        .with_recording(file_recording())
        .with_supervisions(vec![sup("a", 0.5, 1.0), sup("b", 2.0, 1.0)]);
    assert_eq!(cut.truncate(0.0, None, &keep_id()).unwrap(), cut);
}

#[test]
fn test_truncate_keeps_overlapping_supervisions() {
    let t = long_cut().truncate(2.0, Some(3.0), &keep_id()).unwrap();
    assert_eq!(t.id, "c");
    assert_eq!(ids(&t), vec!["b", "d"]);
    assert_eq!(t.supervisions[0].start, -0.5);
    assert_eq!(t.supervisions[1].start, 0.5);
}

#[test]
fn test_truncate_drops_excessive_supervisions() {
    let options = TruncateOptions {
        keep_excessive_supervisions: false,
        ..keep_id()
    };
    let t = long_cut().truncate(2.0, Some(3.0), &options).unwrap();
    assert_eq!(ids(&t), vec!["d"]);
}

#[test]
fn test_truncate_with_index_matches_scan() {
    let cut = long_cut();
    let index = CutIndex::build([&Cut::Mono(cut.clone())]);
    for keep_excessive in [true, false] {
        let scan = TruncateOptions {
            keep_excessive_supervisions: keep_excessive,
            ..keep_id()
        };
        let indexed = TruncateOptions {
            index: Some(&index),
            ..scan
        };
        assert_eq!(
            cut.truncate(2.0, Some(3.0), &indexed).unwrap(),
            cut.truncate(2.0, Some(3.0), &scan).unwrap()
        );
    }
}

#[test]
fn test_truncate_with_index_missing_cut() {
    let index = CutIndex::default();
    let options = TruncateOptions {
        index: Some(&index),
        ..TruncateOptions::default()
    };
    assert!(matches!(
        long_cut().truncate(1.0, None, &options),
        Err(Error::Precondition(_))
    ));
}

#[test]
fn test_truncate_rejects_bad_windows() {
    let cut = long_cut();
    assert!(matches!(
        cut.truncate(-1.0, None, &TruncateOptions::default()),
        Err(Error::Precondition(_))
    ));
    assert!(matches!(
        cut.truncate(10.0, None, &TruncateOptions::default()),
        Err(Error::Precondition(_))
    ));
}

// ============================================================================
// Extend
// ============================================================================

#[test]
fn test_extend_both_sides() {
    let cut = DataCut::new("c", 2.0, 3.0, 0)
        .with_recording(file_recording())
        .with_supervisions(vec![sup("a", 0.5, 1.0)]);
    let ext = cut.extend_window(1.0, Direction::Both, true, false).unwrap();
    assert_eq!(ext.cut.start, 1.0);
    assert_eq!(ext.cut.duration, 5.0);
    assert_eq!(ext.cut.supervisions[0].start, 1.5);
    assert_eq!((ext.pad_left, ext.pad_right), (0.0, 0.0));

    let right = cut.extend_window(1.0, Direction::Right, true, false).unwrap();
    assert_eq!((right.cut.start, right.cut.duration), (2.0, 4.0));
    assert_eq!(right.cut.supervisions[0].start, 0.5);
}

#[test]
fn test_extend_clamps_to_recording() {
    let cut = DataCut::new("c", 2.0, 3.0, 0).with_recording(file_recording());
    let ext = cut.extend_window(6.0, Direction::Both, false, false).unwrap();
    assert_eq!((ext.cut.start, ext.cut.duration), (0.0, 10.0));
    assert_eq!((ext.pad_left, ext.pad_right), (0.0, 0.0));

    let padded = cut.extend_window(6.0, Direction::Both, false, true).unwrap();
    assert_eq!((padded.cut.start, padded.cut.duration), (0.0, 10.0));
    assert_eq!((padded.pad_left, padded.pad_right), (4.0, 1.0));
}

/// Extending left and then right lands on the same window and shortfall as
/// extending both sides at once
fn assert_sides_compose(start: Seconds, duration: Seconds, amount: Seconds, pad_silence: bool) {
    let cut = DataCut::new("c", start, duration, 0)
        .with_recording(file_recording())
        .with_supervisions(vec![sup("a", 0.5, 1.0)]);
    let both = cut.extend_window(amount, Direction::Both, true, pad_silence).unwrap();
    let left = cut.extend_window(amount, Direction::Left, true, pad_silence).unwrap();
    let right = left.cut.extend_window(amount, Direction::Right, true, pad_silence).unwrap();

    let case = format!("start={} duration={} amount={} pad={}", start, duration, amount, pad_silence);
    assert_eq!(right.cut, both.cut, "{}", case);
    assert_eq!(left.pad_left, both.pad_left, "{}", case);
    assert_eq!(right.pad_left, 0.0, "{}", case);
    assert_eq!(right.pad_right, both.pad_right, "{}", case);
}

#[test]
fn test_extend_left_then_right_matches_both() {
    let cases = [
        // inside the recording
        (2.0, 3.0, 1.0),
        // clamped at the start
        (0.5, 3.0, 1.0),
        // clamped at the end
        (2.0, 7.5, 1.0),
        // clamped on both sides
        (0.5, 9.0, 2.0),
        (0.0, 10.0, 0.25),
    ];
    for (start, duration, amount) in cases {
        assert_sides_compose(start, duration, amount, false);
        assert_sides_compose(start, duration, amount, true);
    }
}

#[test]
fn test_extend_sides_compose_with_padding_shortfall() {
    let cut = DataCut::new("c", 0.5, 9.0, 0).with_recording(file_recording());
    let both = cut.extend_window(2.0, Direction::Both, true, true).unwrap();
    assert_eq!((both.cut.start, both.cut.duration), (0.0, 10.0));
    assert_eq!((both.pad_left, both.pad_right), (1.5, 1.5));

    let left = cut.extend_window(2.0, Direction::Left, true, true).unwrap();
    assert_eq!((left.pad_left, left.pad_right), (1.5, 0.0));
    let right = left.cut.extend_window(2.0, Direction::Right, true, true).unwrap();
    assert_eq!((right.pad_left, right.pad_right), (0.0, 1.5));
    assert_eq!(right.cut, both.cut);
}

#[test]
fn test_extend_cut_sides_compose_when_clamped() {
    let cut = Cut::from(DataCut::new("c", 0.5, 9.0, 0).with_recording(file_recording()));
    let both = cut.extend_by(2.0, Direction::Both, true, false).unwrap();
    let stepped = cut
        .extend_by(2.0, Direction::Left, true, false)
        .and_then(|c| c.extend_by(2.0, Direction::Right, true, false))
        .unwrap();
    assert_eq!(stepped, both);
    assert_eq!((both.start(), both.duration()), (0.0, 10.0));
}

#[test]
fn test_extend_drops_features_that_do_not_cover() {
    let matrix = Array2::<f32>::zeros((300, 2));
    let mut narrow = Features::from_matrix("fbank", &matrix, 0.01, SR, Compression::Raw).unwrap();
    narrow.start = 2.0;
    let cut = DataCut::new("c", 2.0, 3.0, 0)
        .with_recording(file_recording())
        .with_features(Arc::new(narrow));
    let ext = cut.extend_window(1.0, Direction::Both, true, false).unwrap();
    assert!(!ext.cut.has_features());

    let wide = Features::from_matrix("fbank", &Array2::<f32>::zeros((1000, 2)), 0.01, SR, Compression::Raw).unwrap();
    let cut = cut.with_features(Arc::new(wide));
    assert!(cut.extend_window(1.0, Direction::Both, true, false).unwrap().cut.has_features());
}

#[test]
fn test_extend_requires_recording() {
    let cut = DataCut::new("c", 0.0, 1.0, 0);
    assert!(matches!(
        cut.extend_window(1.0, Direction::Both, true, false),
        Err(Error::Precondition(_))
    ));
}

// ============================================================================
// Perturbations
// ============================================================================

#[test]
fn test_perturb_speed_sample_count_and_ids() {
    let cut = DataCut::from_recording(memory_recording())
        .with_id("c")
        .with_supervisions(vec![sup("s", 0.0, 1.0)]);
    let fast = cut.perturb_speed(1.1, true).unwrap();
    assert_eq!(fast.id, "c_sp1.1");
    assert_eq!(fast.recording.as_ref().unwrap().id, "rec_sp1.1");
    assert_eq!(fast.recording.as_ref().unwrap().num_samples, 14545);
    assert_eq!(fast.num_samples(), Some(14545));
    assert_eq!(fast.supervisions[0].id, "s_sp1.1");
    assert_eq!(fast.supervisions[0].recording_id, "rec_sp1.1");
    assert_eq!(fast.load_audio().unwrap().dim(), (1, 14545));

    let plain = cut.perturb_speed(1.1, false).unwrap();
    assert_eq!(plain.id, "c");
    assert_eq!(plain.supervisions[0].id, "s");
}

#[test]
fn test_perturb_tempo_detaches_timed_fields() {
    let tensor = Tensor::Float(Array2::<f32>::zeros((100, 2)).into_dyn());
    let cut = DataCut::from_recording(memory_recording())
        .with_id("c")
        .attach_tensor("emb", &tensor, Some(0.01), Some(0), false)
        .unwrap()
        .with_custom("note", CustomValue::Value(serde_json::json!("keep")));
    let slow = cut.perturb_tempo(0.9, true).unwrap();
    assert_eq!(slow.id, "c_tp0.9");
    assert_eq!(slow.num_samples(), Some(17778));
    let custom = slow.custom.as_ref().unwrap();
    assert!(!custom.contains_key("emb"));
    assert!(custom.contains_key("note"));
}

#[test]
fn test_perturb_factor_must_be_positive() {
    let cut = DataCut::from_recording(file_recording());
    assert!(matches!(cut.perturb_speed(0.0, true), Err(Error::Precondition(_))));
    assert!(matches!(cut.perturb_tempo(-1.0, true), Err(Error::Precondition(_))));
    assert!(matches!(cut.perturb_volume(f64::NAN, true), Err(Error::Precondition(_))));
}

#[test]
fn test_resample_keeps_duration() {
    let matrix = Array2::<f32>::zeros((1000, 2));
    let features = Features::from_matrix("fbank", &matrix, 0.01, SR, Compression::Raw).unwrap();
    let cut = DataCut::new("c", 1.0, 2.0, 0)
        .with_recording(file_recording())
        .with_features(Arc::new(features));
    let rs = cut.resample(8000, true).unwrap();
    assert_eq!(rs.id, "c_rs8000");
    assert_eq!(rs.recording.as_ref().unwrap().sampling_rate, 8000);
    assert_eq!((rs.start, rs.duration), (1.0, 2.0));
    assert_eq!(rs.num_samples(), Some(16000));
    assert!(!rs.has_features());
}

#[test]
fn test_relabeling_transforms_affix_ids() {
    let cut = DataCut::from_recording(file_recording())
        .with_id("c")
        .with_supervisions(vec![sup("s", 0.0, 1.0)]);

    let vp = cut.perturb_volume(0.5, true).unwrap();
    assert_eq!(vp.id, "c_vp0.5");
    assert_eq!(vp.supervisions[0].id, "s_vp0.5");
    assert_eq!(vp.recording.as_ref().unwrap().id, "rec_vp0.5");
    assert_eq!(vp.duration, cut.duration);

    let nb = cut.narrowband(NarrowbandCodec::Mulaw, true, true).unwrap();
    assert_eq!(nb.id, "c_nb_mulaw");
    assert_eq!(nb.sampling_rate(), Some(SR));

    let ln = cut.normalize_loudness(-20.0, true).unwrap();
    assert_eq!(ln.id, "c_ln-20.0");

    let wpe = cut.dereverb_wpe(true).unwrap();
    assert_eq!(wpe.id, "c_wpe");
    assert_eq!(wpe.supervisions[0].recording_id, "rec_wpe");

    assert_eq!(cut.perturb_volume(0.5, false).unwrap().id, "c");
}

#[test]
fn test_transforms_require_recording() {
    let cut = DataCut::new("c", 0.0, 1.0, 0);
    assert!(matches!(cut.resample(8000, true), Err(Error::Precondition(_))));
    assert!(matches!(cut.perturb_speed(1.1, true), Err(Error::Precondition(_))));
    assert!(matches!(cut.dereverb_wpe(true), Err(Error::Precondition(_))));
}

#[test]
fn test_direction_parse() {
    assert_eq!("left".parse::<Direction>().unwrap(), Direction::Left);
    assert_eq!("both".parse::<Direction>().unwrap(), Direction::Both);
    assert!("up".parse::<Direction>().is_err());
    assert_eq!(Direction::Right.to_string(), "right");
    assert!(Direction::Both.includes_left() && Direction::Both.includes_right());
    assert!(!Direction::Left.includes_right());
}
