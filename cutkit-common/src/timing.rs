//! Sample-accurate time arithmetic for cut manifests
//!
//! Cut boundaries are stored as floating point seconds, but every operation
//! that moves a boundary goes through integer sample counts first. Summing
//! seconds directly accumulates drift (e.g. `0.1 + 0.2 != 0.3`), while summing
//! sample counts at the recording's sampling rate does not.
//!
//! # Time representations
//!
//! 1. **Seconds**: `f64` values stored in manifests (`start`, `duration`)
//! 2. **Samples**: `i64` counts at a recording's sampling rate
//! 3. **Frames**: `i64` counts at a feature matrix's frame shift
//!
//! # Rounding rules
//!
//! - Seconds → samples rounds to 8 decimal digits first, then half-up
//! - Speed perturbation rounds half-up for factors ≥ 1, half-down otherwise
//! - Frames use the `(samples + hop / 2) / hop` convention
//!
//! # Examples
//!
//! ```rust
//! use cutkit_common::timing::*;
//!
//! // 0.1 + 0.2 at 16 kHz is exactly 0.3
//! assert_eq!(add_durations(&[0.1, 0.2], 16000), 0.3);
//!
//! // 1 second at 16 kHz
//! assert_eq!(compute_num_samples(1.0, 16000), 16000);
//!
//! // 100 frames of 10 ms
//! assert_eq!(compute_num_frames(1.0, 0.01, 16000).unwrap(), 100);
//! ```

use crate::error::{Error, Result};

/// Time expressed in seconds
pub type Seconds = f64;

/// Decimal digits kept before rounding a sample count
const ROUNDING_DIGITS: i32 = 8;

/// Absolute tolerance used when comparing span boundaries
pub const SPAN_TOLERANCE: Seconds = 1e-9;

// ============================================================================
// Core Conversion Functions
// ============================================================================

fn round_digits(value: f64) -> f64 {
    let scale = 10f64.powi(ROUNDING_DIGITS);
    (value * scale).round() / scale
}

/// Convert a duration to a number of samples
///
/// The product `duration × sampling_rate` is first rounded to 8 decimal
/// digits to remove representation noise, then rounded half-up.
///
/// # Examples
///
/// ```rust
/// use cutkit_common::timing::compute_num_samples;
///
/// assert_eq!(compute_num_samples(0.5, 16000), 8000);
/// assert_eq!(compute_num_samples(1.0 / 3.0, 3), 1);
/// assert_eq!(compute_num_samples(-0.25, 16000), -4000);
/// ```
pub fn compute_num_samples(duration: Seconds, sampling_rate: u32) -> i64 {
    round_digits(duration * sampling_rate as f64).round() as i64
}

/// Sum durations through their sample counts
///
/// Each duration is converted to samples independently, the counts are summed,
/// and the total is converted back to seconds. Negative durations are allowed,
/// which makes this the subtraction primitive as well.
///
/// # Examples
///
/// ```rust
/// use cutkit_common::timing::add_durations;
///
/// assert_eq!(add_durations(&[10.0, -2.5], 16000), 7.5);
/// ```
pub fn add_durations(durations: &[Seconds], sampling_rate: u32) -> Seconds {
    let total: i64 = durations
        .iter()
        .map(|d| compute_num_samples(*d, sampling_rate))
        .sum();
    total as f64 / sampling_rate as f64
}

/// Number of feature frames covering `duration`
///
/// Uses the same convention as frame-based feature extractors: the sample count
/// is divided by the hop size, rounding half a hop up.
///
/// # Errors
///
/// Returns [`Error::Timing`] if `frame_shift × sampling_rate` rounds to zero
/// samples.
pub fn compute_num_frames(duration: Seconds, frame_shift: Seconds, sampling_rate: u32) -> Result<i64> {
    let num_samples = (duration * sampling_rate as f64).round() as i64;
    let window_hop = (frame_shift * sampling_rate as f64).round() as i64;
    if window_hop <= 0 {
        return Err(Error::Timing(format!(
            "frame shift {}s spans no samples at {} Hz",
            frame_shift, sampling_rate
        )));
    }
    Ok((num_samples + window_hop / 2).div_euclid(window_hop))
}

/// Number of samples produced by speed perturbation of `num_samples`
///
/// Mirrors the length produced by resampling-based speed perturbation:
/// `num_samples / factor`, rounded half-up when speeding up and half-down when
/// slowing down.
///
/// # Examples
///
/// ```rust
/// use cutkit_common::timing::perturb_num_samples;
///
/// assert_eq!(perturb_num_samples(16000, 1.1), 14545);
/// assert_eq!(perturb_num_samples(16000, 0.9), 17778);
/// assert_eq!(perturb_num_samples(3, 2.0), 2);
/// assert_eq!(perturb_num_samples(1, 2.0 / 3.0), 1);
/// ```
pub fn perturb_num_samples(num_samples: i64, factor: f64) -> i64 {
    let value = round_digits(num_samples as f64 / factor);
    if factor >= 1.0 {
        value.round() as i64
    } else {
        // Half-down for the positive counts we deal with.
        (value - 0.5).ceil() as i64
    }
}

/// Format a perturbation factor the way manifest ids expect it
///
/// Integral values keep one decimal (`1.0`), everything else uses the
/// shortest round-trip representation (`1.1`, `0.95`).
pub fn format_factor(factor: f64) -> String {
    if factor.is_finite() && factor.fract() == 0.0 {
        format!("{:.1}", factor)
    } else {
        format!("{}", factor)
    }
}

/// Approximate float equality with absolute and relative tolerance
pub fn is_close(a: f64, b: f64) -> bool {
    let diff = (a - b).abs();
    diff <= SPAN_TOLERANCE || diff <= 1e-9 * a.abs().max(b.abs())
}

// ============================================================================
// Spans
// ============================================================================

/// Anything with a start and an end on a time axis
pub trait Span {
    fn start(&self) -> Seconds;
    fn end(&self) -> Seconds;

    fn duration(&self) -> Seconds {
        self.end() - self.start()
    }
}

/// A plain `[start, end]` interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSpan {
    pub start: Seconds,
    pub end: Seconds,
}

impl TimeSpan {
    pub fn new(start: Seconds, end: Seconds) -> Self {
        Self { start, end }
    }
}

impl Span for TimeSpan {
    fn start(&self) -> Seconds {
        self.start
    }

    fn end(&self) -> Seconds {
        self.end
    }
}

/// True when the two spans share a stretch of time
///
/// Spans that merely touch (one ends where the other begins) do not overlap.
pub fn overlaps<A: Span + ?Sized, B: Span + ?Sized>(lhs: &A, rhs: &B) -> bool {
    lhs.start() < rhs.end()
        && rhs.start() < lhs.end()
        && !is_close(lhs.start(), rhs.end())
        && !is_close(rhs.start(), lhs.end())
}

/// True when `spanning` fully contains `spanned` (boundaries are tolerant)
pub fn overspans<A: Span + ?Sized, B: Span + ?Sized>(spanning: &A, spanned: &B) -> bool {
    (spanning.start() <= spanned.start() || is_close(spanning.start(), spanned.start()))
        && (spanned.end() <= spanning.end() || is_close(spanned.end(), spanning.end()))
}

/// Fraction of `segment` covered by `window`
///
/// Returns 0.0 for disjoint spans and for zero-length segments.
pub fn overlap_ratio<A: Span + ?Sized, B: Span + ?Sized>(segment: &A, window: &B) -> f64 {
    let duration = segment.duration();
    if duration <= 0.0 {
        return 0.0;
    }
    let overlap = segment.end().min(window.end()) - segment.start().max(window.start());
    if overlap <= 0.0 {
        0.0
    } else {
        overlap / duration
    }
}

#[cfg(test)]
#[path = "timing_tests.rs"]
mod tests;
