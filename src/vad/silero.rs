//! Silero VAD — single-stage ONNX recurrent model, windowed inference.
//!
//! When the `onnx` feature is disabled, or the model file is missing,
//! falls back to the energy detector rather than failing hard: a missing
//! model is a configuration issue, not grounds for aborting capture-gate
//! init.

use std::path::Path;

use tracing::warn;

use super::{energy, VadEngine, VadMode};

const WINDOW_SIZE: usize = 512;
const PROB_THRESHOLD_RECORDING: f32 = 0.5;
const PROB_THRESHOLD_FOLLOW_UP: f32 = 0.35;
const PROB_THRESHOLD_DEFAULT: f32 = 0.6;

fn threshold_for_mode(mode: VadMode) -> f32 {
    match mode {
        VadMode::Recording => PROB_THRESHOLD_RECORDING,
        VadMode::FollowUp => PROB_THRESHOLD_FOLLOW_UP,
        VadMode::Default => PROB_THRESHOLD_DEFAULT,
    }
}

#[cfg(feature = "onnx")]
mod inner {
    use super::*;
    use ort::session::Session;

    const STATE_SIZE: usize = 2 * 1 * 128;

    pub struct SileroVadInner {
        session: Option<Session>,
        h: Vec<f32>,
        c: Vec<f32>,
        buffer: Vec<i16>,
    }

    impl SileroVadInner {
        pub fn new() -> Self {
            Self {
                session: None,
                h: vec![0.0; STATE_SIZE],
                c: vec![0.0; STATE_SIZE],
                buffer: Vec::new(),
            }
        }

        pub fn load(&mut self, model_dir: &Path) -> bool {
            let path = model_dir.join("silero_vad.onnx");
            if !path.exists() {
                warn!(
                    "Silero VAD model not found at {} — falling back to energy VAD",
                    path.display()
                );
                return false;
            }
            match Session::builder()
                .and_then(|b| b.with_intra_threads(1))
                .and_then(|b| b.with_inter_threads(1))
                .and_then(|b| b.commit_from_file(&path))
            {
                Ok(session) => {
                    self.session = Some(session);
                    self.reset();
                    true
                }
                Err(e) => {
                    warn!("Failed to load Silero VAD: {e} — falling back to energy VAD");
                    false
                }
            }
        }

        fn infer_window(&mut self, window: &[f32]) -> Result<f32, String> {
            let session = self.session.as_ref().ok_or("model not loaded")?;

            let input = ort::value::Value::from_array(
                ndarray::Array2::from_shape_vec((1, WINDOW_SIZE), window.to_vec())
                    .map_err(|e| format!("input tensor: {e}"))?,
            )
            .map_err(|e| format!("input value: {e}"))?;
            let h_in = ort::value::Value::from_array(
                ndarray::Array3::from_shape_vec((2, 1, 128), self.h.clone())
                    .map_err(|e| format!("h tensor: {e}"))?,
            )
            .map_err(|e| format!("h value: {e}"))?;
            let c_in = ort::value::Value::from_array(
                ndarray::Array3::from_shape_vec((2, 1, 128), self.c.clone())
                    .map_err(|e| format!("c tensor: {e}"))?,
            )
            .map_err(|e| format!("c value: {e}"))?;
            let sr_in = ort::value::Value::from_array(ndarray::Array1::from_vec(vec![16000i64]))
                .map_err(|e| format!("sr value: {e}"))?;

            let outputs = session
                .run(
                    ort::inputs![
                        "input" => input,
                        "h" => h_in,
                        "c" => c_in,
                        "sr" => sr_in,
                    ]
                    .map_err(|e| format!("inputs: {e}"))?,
                )
                .map_err(|e| format!("inference: {e}"))?;

            let prob = *outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| format!("extract prob: {e}"))?
                .iter()
                .next()
                .ok_or("empty prob output")?;

            if let Ok(h_out) = outputs[1].try_extract_tensor::<f32>() {
                self.h = h_out.iter().copied().collect();
            }
            if let Ok(c_out) = outputs[2].try_extract_tensor::<f32>() {
                self.c = c_out.iter().copied().collect();
            }

            Ok(prob)
        }

        pub fn process_prob(&mut self, chunk: &[i16]) -> f32 {
            if self.session.is_none() {
                return energy::detect(chunk) / i16::MAX as f32;
            }
            self.buffer.extend(chunk.iter().copied());
            let mut max_prob: f32 = 0.0;
            while self.buffer.len() >= WINDOW_SIZE {
                let window: Vec<f32> = self
                    .buffer
                    .drain(..WINDOW_SIZE)
                    .map(|s| s as f32 / i16::MAX as f32)
                    .collect();
                match self.infer_window(&window) {
                    Ok(p) => max_prob = max_prob.max(p),
                    Err(e) => {
                        warn!("Silero VAD inference error: {e}");
                        return energy::detect(chunk) / i16::MAX as f32;
                    }
                }
            }
            max_prob
        }

        pub fn reset(&mut self) {
            self.h.iter_mut().for_each(|v| *v = 0.0);
            self.c.iter_mut().for_each(|v| *v = 0.0);
            self.buffer.clear();
        }
    }
}

#[cfg(not(feature = "onnx"))]
mod inner {
    use super::*;

    pub struct SileroVadInner {
        _private: (),
    }

    impl SileroVadInner {
        pub fn new() -> Self {
            Self { _private: () }
        }

        pub fn load(&mut self, _model_dir: &Path) -> bool {
            warn!("Silero VAD not available (onnx feature disabled) — using energy VAD");
            false
        }

        pub fn process_prob(&mut self, chunk: &[i16]) -> f32 {
            energy::detect(chunk) / i16::MAX as f32
        }

        pub fn reset(&mut self) {}
    }
}

pub use inner::SileroVadInner;

pub struct SileroVad(SileroVadInner);

impl SileroVad {
    pub fn new() -> Self {
        Self(SileroVadInner::new())
    }

    pub fn load(&mut self, model_dir: &Path) -> bool {
        self.0.load(model_dir)
    }
}

impl Default for SileroVad {
    fn default() -> Self {
        Self::new()
    }
}

impl VadEngine for SileroVad {
    fn process(&mut self, chunk: &[i16], mode: VadMode) -> bool {
        self.0.process_prob(chunk) >= threshold_for_mode(mode)
    }

    fn reset(&mut self) {
        self.0.reset();
    }
}
