//! Sample-domain audio effects
//!
//! Simple, dependency-light implementations of the effects recordings can
//! carry: gain, overlap-add time stretching, companding codecs and RMS
//! loudness normalization.

/// Frame length of the overlap-add time stretch
const STRETCH_FRAME: usize = 512;

/// Output hop of the overlap-add time stretch
const STRETCH_HOP: usize = STRETCH_FRAME / 4;

/// μ-law compression parameter
const MULAW_MU: f32 = 255.0;

/// A-law compression parameter
const ALAW_A: f32 = 87.6;

/// Multiply every sample by `factor`
pub fn apply_gain(planar: &mut [Vec<f32>], factor: f32) {
    for channel in planar.iter_mut() {
        for sample in channel.iter_mut() {
            *sample *= factor;
        }
    }
}

/// Change tempo without changing pitch
///
/// Hann-windowed overlap-add: frames are read every `STRETCH_HOP × factor`
/// input samples and written every `STRETCH_HOP` output samples. The output
/// has `round(len / factor)` samples.
pub fn time_stretch(channel: &[f32], factor: f64) -> Vec<f32> {
    let out_len = (channel.len() as f64 / factor).round() as usize;
    if channel.is_empty() || out_len == 0 {
        return vec![0.0; out_len];
    }

    let window: Vec<f32> = (0..STRETCH_FRAME)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / STRETCH_FRAME as f32;
            0.5 - 0.5 * phase.cos()
        })
        .collect();

    let mut out = vec![0.0f32; out_len];
    let mut norm = vec![0.0f32; out_len];
    let hop_in = STRETCH_HOP as f64 * factor;

    let mut k = 0usize;
    loop {
        let out_pos = k * STRETCH_HOP;
        if out_pos >= out_len {
            break;
        }
        let in_pos = (k as f64 * hop_in).round() as usize;
        for (i, w) in window.iter().enumerate() {
            let o = out_pos + i;
            if o >= out_len {
                break;
            }
            let sample = channel.get(in_pos + i).copied().unwrap_or(0.0);
            out[o] += sample * w;
            norm[o] += w;
        }
        k += 1;
    }

    for (sample, n) in out.iter_mut().zip(norm.iter()) {
        if *n > 1e-3 {
            *sample /= n;
        }
    }
    out
}

/// Compress, quantize to 8 bits and expand with μ-law
pub fn mulaw_round_trip(sample: f32) -> f32 {
    let x = sample.clamp(-1.0, 1.0);
    let compressed = x.signum() * (1.0 + MULAW_MU * x.abs()).ln() / (1.0 + MULAW_MU).ln();
    let restored = quantize_8bit(compressed);
    restored.signum() * ((1.0 + MULAW_MU).powf(restored.abs()) - 1.0) / MULAW_MU
}

/// Compress, quantize to 8 bits and expand with A-law
pub fn alaw_round_trip(sample: f32) -> f32 {
    let x = sample.clamp(-1.0, 1.0);
    let ax = x.abs();
    let denom = 1.0 + ALAW_A.ln();
    let compressed = if ax < 1.0 / ALAW_A {
        ALAW_A * ax / denom
    } else {
        (1.0 + (ALAW_A * ax).ln()) / denom
    };
    let y = quantize_8bit(x.signum() * compressed);
    let ay = y.abs();
    let expanded = if ay < 1.0 / denom {
        ay * denom / ALAW_A
    } else {
        (ay * denom - 1.0).exp() / ALAW_A
    };
    y.signum() * expanded
}

fn quantize_8bit(value: f32) -> f32 {
    let level = ((value + 1.0) / 2.0 * 255.0).round();
    level / 255.0 * 2.0 - 1.0
}

/// Root mean square level over all channels
pub fn rms(planar: &[Vec<f32>]) -> f32 {
    let (sum, count) = planar.iter().flatten().fold((0.0f64, 0usize), |(s, n), x| {
        (s + (*x as f64) * (*x as f64), n + 1)
    });
    if count == 0 {
        0.0
    } else {
        (sum / count as f64).sqrt() as f32
    }
}

/// Scale audio so its RMS level matches `target_db` (dBFS)
///
/// Silent audio is returned unchanged.
pub fn normalize_loudness(planar: &mut [Vec<f32>], target_db: f64) {
    let level = rms(planar);
    if level <= f32::EPSILON {
        return;
    }
    let current_db = 20.0 * (level as f64).log10();
    let gain = 10f64.powf((target_db - current_db) / 20.0);
    apply_gain(planar, gain as f32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain() {
        let mut planar = vec![vec![0.5, -0.25]];
        apply_gain(&mut planar, 2.0);
        assert_eq!(planar, vec![vec![1.0, -0.5]]);
    }

    #[test]
    fn test_time_stretch_length() {
        let input = vec![0.25f32; 16000];
        assert_eq!(time_stretch(&input, 2.0).len(), 8000);
        assert_eq!(time_stretch(&input, 0.5).len(), 32000);
        assert_eq!(time_stretch(&input, 1.1).len(), 14545);
    }

    #[test]
    fn test_time_stretch_preserves_constant_level() {
        let input = vec![0.25f32; 16000];
        let output = time_stretch(&input, 1.25);
        // Away from the edges the window normalization keeps the level
        for s in &output[STRETCH_FRAME..output.len() - STRETCH_FRAME] {
            assert!((s - 0.25).abs() < 1e-3, "got {}", s);
        }
    }

    #[test]
    fn test_companding_is_close_to_identity() {
        for x in [-0.9f32, -0.3, 0.0, 0.05, 0.5, 1.0] {
            assert!((mulaw_round_trip(x) - x).abs() < 0.05, "mulaw {}", x);
            assert!((alaw_round_trip(x) - x).abs() < 0.05, "alaw {}", x);
        }
    }

    #[test]
    fn test_normalize_loudness() {
        let mut planar = vec![vec![0.1f32; 1000]];
        normalize_loudness(&mut planar, -6.0);
        let level_db = 20.0 * (rms(&planar) as f64).log10();
        assert!((level_db + 6.0).abs() < 1e-3);
    }

    #[test]
    fn test_normalize_silence_is_noop() {
        let mut planar = vec![vec![0.0f32; 10]];
        normalize_loudness(&mut planar, -20.0);
        assert_eq!(planar, vec![vec![0.0f32; 10]]);
    }
}
