//! Test helpers for cutkit integration tests
//!
//! - `audio_generator`: deterministic WAV fixtures written with hound

#![allow(dead_code, unused_imports)]

pub mod audio_generator;

pub use audio_generator::{generate_sine_wav, generate_tone_channels_wav, TEST_SAMPLE_RATE};
