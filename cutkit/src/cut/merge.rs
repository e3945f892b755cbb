//! Merging supervisions into one
//!
//! Merged supervisions span from the earliest start to the latest end. Texts
//! are joined with a space, alignments concatenated, and every other label
//! (speaker, language, gender, custom entries) goes through a merge policy or
//! a caller-supplied merge function.

use crate::supervision::{AlignmentItem, SupervisionSegment};
use cutkit_common::timing::{add_durations, Seconds};
use serde_json::Value;
use std::collections::BTreeMap;

/// Prefix of merged ids and delimiter-merged labels
const MERGE_PREFIX: &str = "cat";

/// Separator of merged ids and delimiter-merged labels
const MERGE_DELIMITER: &str = "#";

/// How labels that differ between merged supervisions are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// `cat#a#b` for distinct values, the value itself when all agree
    #[default]
    Delimiter,

    /// First non-empty value
    KeepFirst,
}

/// Caller-supplied merge of the values of one label (`Null` = missing)
pub type MergeFn<'a> = &'a dyn Fn(&str, &[Value]) -> Value;

/// Merge `segments` into one supervision
///
/// Segments are taken in start order. Returns `None` for an empty input
/// and a clone for a single segment.
pub fn merge_segments(
    segments: &[SupervisionSegment],
    policy: MergePolicy,
    merge_fn: Option<MergeFn<'_>>,
    sampling_rate: Option<u32>,
) -> Option<SupervisionSegment> {
    let mut sorted = segments.to_vec();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));
    let segments = sorted.as_slice();
    let (first, rest) = segments.split_first()?;
    if rest.is_empty() {
        return Some(first.clone());
    }

    let start = segments.iter().map(|s| s.start).fold(Seconds::INFINITY, f64::min);
    let end = segments.iter().map(|s| s.end()).fold(Seconds::NEG_INFINITY, f64::max);
    let duration = match sampling_rate {
        Some(sr) => add_durations(&[end, -start], sr),
        None => end - start,
    };

    let id = std::iter::once(MERGE_PREFIX)
        .chain(segments.iter().map(|s| s.id.as_str()))
        .collect::<Vec<_>>()
        .join(MERGE_DELIMITER);

    let texts: Vec<&str> = segments
        .iter()
        .filter_map(|s| s.text.as_deref())
        .filter(|t| !t.is_empty())
        .collect();

    let merge_label = |key: &str, pick: &dyn Fn(&SupervisionSegment) -> Option<String>| -> Option<String> {
        let values: Vec<Value> = segments
            .iter()
            .map(|s| pick(s).map(Value::String).unwrap_or(Value::Null))
            .collect();
        match merge_values(key, &values, policy, merge_fn) {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    };

    let mut custom_keys: Vec<&String> = segments
        .iter()
        .filter_map(|s| s.custom.as_ref())
        .flat_map(|c| c.keys())
        .collect();
    custom_keys.sort();
    custom_keys.dedup();
    let custom = if custom_keys.is_empty() {
        None
    } else {
        Some(
            custom_keys
                .into_iter()
                .map(|key| {
                    let values: Vec<Value> = segments
                        .iter()
                        .map(|s| {
                            s.custom
                                .as_ref()
                                .and_then(|c| c.get(key))
                                .cloned()
                                .unwrap_or(Value::Null)
                        })
                        .collect();
                    (key.clone(), merge_values(key, &values, policy, merge_fn))
                })
                .collect(),
        )
    };

    let mut alignment: BTreeMap<String, Vec<AlignmentItem>> = BTreeMap::new();
    for segment in segments {
        if let Some(a) = &segment.alignment {
            for (kind, items) in a {
                alignment.entry(kind.clone()).or_default().extend(items.iter().cloned());
            }
        }
    }
    for items in alignment.values_mut() {
        items.sort_by(|a, b| a.start.total_cmp(&b.start));
    }

    Some(SupervisionSegment {
        id,
        recording_id: first.recording_id.clone(),
        start,
        duration,
        channel: first.channel.clone(),
        text: (!texts.is_empty()).then(|| texts.join(" ")),
        language: merge_label("language", &|s| s.language.clone()),
        speaker: merge_label("speaker", &|s| s.speaker.clone()),
        gender: merge_label("gender", &|s| s.gender.clone()),
        custom,
        alignment: (!alignment.is_empty()).then_some(alignment),
    })
}

fn merge_values(key: &str, values: &[Value], policy: MergePolicy, merge_fn: Option<MergeFn<'_>>) -> Value {
    if let Some(f) = merge_fn {
        return f(key, values);
    }
    let present: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
    let Some(first) = present.first() else {
        return Value::Null;
    };
    match policy {
        MergePolicy::KeepFirst => (*first).clone(),
        MergePolicy::Delimiter => {
            if present.iter().all(|v| v == first) {
                return (*first).clone();
            }
            let parts: Vec<String> = present
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            Value::String(
                std::iter::once(MERGE_PREFIX.to_string())
                    .chain(parts)
                    .collect::<Vec<_>>()
                    .join(MERGE_DELIMITER),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn segments() -> Vec<SupervisionSegment> {
        vec![
            SupervisionSegment::new("a", "rec", 0.5, 1.0).with_text("hello").with_speaker("s1"),
            SupervisionSegment::new("b", "rec", 2.0, 1.5).with_text("world").with_speaker("s2"),
        ]
    }

    #[test]
    fn test_merge_spans_and_ids() {
        let merged = merge_segments(&segments(), MergePolicy::Delimiter, None, Some(16000)).unwrap();
        assert_eq!(merged.id, "cat#a#b");
        assert_eq!(merged.start, 0.5);
        assert_eq!(merged.duration, 3.0);
        assert_eq!(merged.text.as_deref(), Some("hello world"));
        assert_eq!(merged.speaker.as_deref(), Some("cat#s1#s2"));
        assert_eq!(merged.language, None);
    }

    #[test]
    fn test_keep_first_policy() {
        let merged = merge_segments(&segments(), MergePolicy::KeepFirst, None, None).unwrap();
        assert_eq!(merged.speaker.as_deref(), Some("s1"));
    }

    #[test]
    fn test_equal_labels_are_not_prefixed() {
        let mut segs = segments();
        segs[1].speaker = Some("s1".into());
        let merged = merge_segments(&segs, MergePolicy::Delimiter, None, None).unwrap();
        assert_eq!(merged.speaker.as_deref(), Some("s1"));
    }

    #[test]
    fn test_custom_merge_fn() {
        let mut segs = segments();
        segs[0].custom = Some(serde_json::Map::from_iter([("score".to_string(), json!(1))]));
        segs[1].custom = Some(serde_json::Map::from_iter([("score".to_string(), json!(2))]));
        let sum = |key: &str, values: &[Value]| -> Value {
            if key == "score" {
                json!(values.iter().filter_map(Value::as_i64).sum::<i64>())
            } else {
                values.first().cloned().unwrap_or(Value::Null)
            }
        };
        let merged = merge_segments(&segs, MergePolicy::Delimiter, Some(&sum), None).unwrap();
        assert_eq!(merged.custom.unwrap()["score"], json!(3));
        assert_eq!(merged.speaker.as_deref(), Some("s1"));
    }

    #[test]
    fn test_trivial_inputs() {
        assert!(merge_segments(&[], MergePolicy::Delimiter, None, None).is_none());
        let one = &segments()[..1];
        assert_eq!(merge_segments(one, MergePolicy::Delimiter, None, None).unwrap(), one[0]);
    }
}
