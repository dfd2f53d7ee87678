//! Energy-based voice activity detection (fallback).
//!
//! Uses mean absolute amplitude as a simple energy metric. Always
//! available — used when the neural Silero VAD model can't be loaded.

use super::{VadEngine, VadMode};

const THRESHOLD_RECORDING: f32 = 350.0;
const THRESHOLD_FOLLOW_UP: f32 = 250.0;
const THRESHOLD_DEFAULT: f32 = 450.0;

fn threshold_for_mode(mode: VadMode) -> f32 {
    match mode {
        VadMode::Recording => THRESHOLD_RECORDING,
        VadMode::FollowUp => THRESHOLD_FOLLOW_UP,
        VadMode::Default => THRESHOLD_DEFAULT,
    }
}

/// Mean absolute amplitude of a PCM16 chunk — a simple proxy for signal
/// energy that's good enough for speech/silence discrimination.
pub fn detect(chunk: &[i16]) -> f32 {
    if chunk.is_empty() {
        return 0.0;
    }
    let sum: i64 = chunk.iter().map(|s| (*s as i64).abs()).sum();
    (sum as f64 / chunk.len() as f64) as f32
}

#[derive(Debug, Default)]
pub struct EnergyVad;

impl VadEngine for EnergyVad {
    fn process(&mut self, chunk: &[i16], mode: VadMode) -> bool {
        detect(chunk) >= threshold_for_mode(mode)
    }

    fn reset(&mut self) {}
}
