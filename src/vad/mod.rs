//! Voice-activity detection: a common [`VadEngine`] trait with a neural
//! (Silero, ONNX) implementation and an always-available energy fallback.

pub mod energy;
pub mod silero;

/// Per-context sensitivity — thresholds differ depending on whether we're
/// gating the start of a new utterance, a quick follow-up after the device
/// already spoke, or steady-state recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadMode {
    Recording,
    FollowUp,
    Default,
}

/// A voice-activity detector consuming 16 kHz mono PCM16 frames.
pub trait VadEngine: Send {
    /// Returns true if the chunk is classified as speech.
    fn process(&mut self, chunk: &[i16], mode: VadMode) -> bool;

    fn reset(&mut self);
}

pub use energy::EnergyVad;
pub use silero::SileroVad;
