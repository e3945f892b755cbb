//! Channel selection shared by cuts, supervisions and recordings

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single channel index or an ordered list of channel indices
///
/// Serialized untagged, so manifests carry either `0` or `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Channel {
    Single(u32),
    Multiple(Vec<u32>),
}

impl Channel {
    /// Channel indices as a list, in order
    pub fn to_vec(&self) -> Vec<u32> {
        match self {
            Channel::Single(c) => vec![*c],
            Channel::Multiple(cs) => cs.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Channel::Single(_) => 1,
            Channel::Multiple(cs) => cs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, channel: u32) -> bool {
        match self {
            Channel::Single(c) => *c == channel,
            Channel::Multiple(cs) => cs.contains(&channel),
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Channel::Single(0)
    }
}

impl From<u32> for Channel {
    fn from(channel: u32) -> Self {
        Channel::Single(channel)
    }
}

impl From<Vec<u32>> for Channel {
    fn from(channels: Vec<u32>) -> Self {
        Channel::Multiple(channels)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Single(c) => write!(f, "{}", c),
            Channel::Multiple(cs) => write!(f, "{:?}", cs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_serde() {
        let single: Channel = serde_json::from_str("1").unwrap();
        assert_eq!(single, Channel::Single(1));
        let multi: Channel = serde_json::from_str("[0, 2]").unwrap();
        assert_eq!(multi, Channel::Multiple(vec![0, 2]));
        assert_eq!(serde_json::to_string(&multi).unwrap(), "[0,2]");
    }

    #[test]
    fn test_to_vec_and_len() {
        assert_eq!(Channel::Single(3).to_vec(), vec![3]);
        assert_eq!(Channel::Multiple(vec![1, 2]).len(), 2);
        assert!(Channel::Multiple(vec![1, 2]).contains(2));
        assert!(!Channel::Single(1).contains(2));
    }
}
