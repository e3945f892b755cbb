//! Supervision segments
//!
//! A supervision is a labeled interval attached to a cut. Its `start` is
//! relative to the cut's start and it may reach outside the cut. Transforms
//! that move or rescale a cut are applied to its supervisions in lockstep.

use crate::channel::Channel;
use cutkit_common::timing::{compute_num_samples, format_factor, perturb_num_samples, Seconds, Span};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One aligned symbol (word, phone, ...) inside a supervision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentItem {
    pub symbol: String,
    pub start: Seconds,
    pub duration: Seconds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl AlignmentItem {
    pub fn end(&self) -> Seconds {
        self.start + self.duration
    }

    fn with_offset(&self, offset: Seconds) -> AlignmentItem {
        AlignmentItem {
            start: round8(self.start + offset),
            ..self.clone()
        }
    }

    fn perturb(&self, factor: f64, sampling_rate: u32) -> AlignmentItem {
        let (start, duration) = perturb_span(self.start, self.duration, factor, sampling_rate);
        AlignmentItem {
            start,
            duration,
            ..self.clone()
        }
    }
}

/// A labeled interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisionSegment {
    pub id: String,
    pub recording_id: String,
    pub start: Seconds,
    pub duration: Seconds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<BTreeMap<String, Vec<AlignmentItem>>>,
}

impl SupervisionSegment {
    pub fn new(id: impl Into<String>, recording_id: impl Into<String>, start: Seconds, duration: Seconds) -> Self {
        SupervisionSegment {
            id: id.into(),
            recording_id: recording_id.into(),
            start,
            duration,
            channel: None,
            text: None,
            language: None,
            speaker: None,
            gender: None,
            custom: None,
            alignment: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<Channel>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_alignment(mut self, kind: impl Into<String>, items: Vec<AlignmentItem>) -> Self {
        self.alignment.get_or_insert_with(BTreeMap::new).insert(kind.into(), items);
        self
    }

    pub fn end(&self) -> Seconds {
        round8(self.start + self.duration)
    }

    /// Shift the segment (and its alignments) by `offset` seconds
    pub fn with_offset(&self, offset: Seconds) -> SupervisionSegment {
        SupervisionSegment {
            start: round8(self.start + offset),
            alignment: self.map_alignment(|item| item.with_offset(offset)),
            ..self.clone()
        }
    }

    /// Rescale for a speed change of the underlying recording
    pub fn perturb_speed(&self, factor: f64, sampling_rate: u32, affix_id: bool) -> SupervisionSegment {
        self.perturb_time(factor, sampling_rate, affix_id.then(|| format!("_sp{}", format_factor(factor))))
    }

    /// Rescale for a tempo change of the underlying recording
    pub fn perturb_tempo(&self, factor: f64, sampling_rate: u32, affix_id: bool) -> SupervisionSegment {
        self.perturb_time(factor, sampling_rate, affix_id.then(|| format!("_tp{}", format_factor(factor))))
    }

    /// Append `suffix` to both the segment id and its recording id
    pub fn with_id_affix(&self, suffix: &str) -> SupervisionSegment {
        SupervisionSegment {
            id: format!("{}{}", self.id, suffix),
            recording_id: format!("{}{}", self.recording_id, suffix),
            ..self.clone()
        }
    }

    /// Drop every alignment
    pub fn drop_alignment(&self) -> SupervisionSegment {
        SupervisionSegment {
            alignment: None,
            ..self.clone()
        }
    }

    fn perturb_time(&self, factor: f64, sampling_rate: u32, suffix: Option<String>) -> SupervisionSegment {
        let (start, duration) = perturb_span(self.start, self.duration, factor, sampling_rate);
        let mut out = SupervisionSegment {
            start,
            duration,
            alignment: self.map_alignment(|item| item.perturb(factor, sampling_rate)),
            ..self.clone()
        };
        if let Some(suffix) = suffix {
            out = out.with_id_affix(&suffix);
        }
        out
    }

    fn map_alignment(&self, f: impl Fn(&AlignmentItem) -> AlignmentItem) -> Option<BTreeMap<String, Vec<AlignmentItem>>> {
        self.alignment.as_ref().map(|alignment| {
            alignment
                .iter()
                .map(|(kind, items)| (kind.clone(), items.iter().map(&f).collect()))
                .collect()
        })
    }
}

impl Span for SupervisionSegment {
    fn start(&self) -> Seconds {
        self.start
    }

    fn end(&self) -> Seconds {
        SupervisionSegment::end(self)
    }
}

/// Start and duration after speed perturbation, computed on sample counts
///
/// Negative starts (segments beginning before the cut) are scaled by their
/// magnitude so that the perturbation is symmetric around zero.
fn perturb_span(start: Seconds, duration: Seconds, factor: f64, sampling_rate: u32) -> (Seconds, Seconds) {
    let start_samples = compute_num_samples(start, sampling_rate);
    let new_start = start_samples.signum() * perturb_num_samples(start_samples.abs(), factor);
    let new_duration = perturb_num_samples(compute_num_samples(duration, sampling_rate), factor);
    (
        new_start as f64 / sampling_rate as f64,
        new_duration as f64 / sampling_rate as f64,
    )
}

/// Round to 8 decimal digits to keep repeated shifts from drifting
fn round8(value: Seconds) -> Seconds {
    (value * 1e8).round() / 1e8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment() -> SupervisionSegment {
        SupervisionSegment::new("sup", "rec", 1.0, 2.0)
            .with_text("hello world")
            .with_alignment(
                "word",
                vec![
                    AlignmentItem {
                        symbol: "hello".into(),
                        start: 1.0,
                        duration: 0.5,
                        score: None,
                    },
                    AlignmentItem {
                        symbol: "world".into(),
                        start: 1.5,
                        duration: 0.5,
                        score: Some(0.9),
                    },
                ],
            )
    }

    #[test]
    fn test_offset_round_trip() {
        let seg = segment();
        let shifted = seg.with_offset(-0.3).with_offset(0.3);
        assert_eq!(shifted, seg);
        assert_eq!(seg.with_offset(-0.3).start, 0.7);
        let words = &seg.with_offset(-0.3).alignment.unwrap()["word"];
        assert_eq!(words[1].start, 1.2);
    }

    #[test]
    fn test_perturb_speed() {
        let seg = segment().perturb_speed(1.1, 16000, true);
        assert_eq!(seg.id, "sup_sp1.1");
        assert_eq!(seg.recording_id, "rec_sp1.1");
        assert_eq!(compute_num_samples(seg.start, 16000), 14545);
        assert_eq!(compute_num_samples(seg.duration, 16000), perturb_num_samples(32000, 1.1));
        let words = &seg.alignment.unwrap()["word"];
        assert_eq!(compute_num_samples(words[0].start, 16000), 14545);
    }

    #[test]
    fn test_perturb_tempo_without_affix() {
        let seg = segment().perturb_tempo(0.9, 16000, false);
        assert_eq!(seg.id, "sup");
        assert_eq!(compute_num_samples(seg.start, 16000), perturb_num_samples(16000, 0.9));
    }

    #[test]
    fn test_negative_start_is_scaled_symmetrically() {
        let seg = SupervisionSegment::new("s", "r", -1.0, 3.0).perturb_speed(2.0, 16000, false);
        assert_eq!(seg.start, -0.5);
        assert_eq!(seg.duration, 1.5);
    }

    #[test]
    fn test_serde_skips_empty_fields() {
        let json = serde_json::to_value(SupervisionSegment::new("s", "r", 0.0, 1.0)).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("text"));
        assert!(!obj.contains_key("alignment"));
        let back: SupervisionSegment = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, "s");
    }
}
