//! OpenWakeWord 3-stage ONNX detection pipeline.
//!
//! Pipeline stages:
//!   1. `melspectrogram.onnx` — audio (1280 samples) -> mel spectrogram features
//!   2. `embedding_model.onnx` — mel features -> embeddings
//!   3. the wake word model — accumulated embeddings -> score
//!
//! When the `onnx` feature is disabled, or any of the three model files is
//! missing, `load` returns false and `process` always reports "no match" —
//! the capture gate then has to fall back to VAD-only wake mode.

use std::path::Path;

use tracing::warn;
#[cfg(feature = "onnx")]
use tracing::info;

/// Detection threshold — score must be >= this to trigger.
const DETECTION_THRESHOLD: f32 = 0.98;

/// Chunk size in samples (80 ms at 16 kHz) — matches the capture gate's
/// frame size.
pub const CHUNK_SAMPLES: usize = 1280;

#[cfg(feature = "onnx")]
mod inner {
    use super::*;
    use ort::session::Session;

    pub struct OpenWakeWord {
        mel_session: Option<Session>,
        embed_session: Option<Session>,
        ww_session: Option<Session>,
        buffer: Vec<f32>,
        embeddings: Vec<Vec<f32>>,
        embedding_window: usize,
    }

    impl OpenWakeWord {
        pub fn new() -> Self {
            Self {
                mel_session: None,
                embed_session: None,
                ww_session: None,
                buffer: Vec::new(),
                embeddings: Vec::new(),
                embedding_window: 16,
            }
        }

        pub fn is_loaded(&self) -> bool {
            self.mel_session.is_some() && self.embed_session.is_some() && self.ww_session.is_some()
        }

        pub fn load(&mut self, model_dir: &Path) -> bool {
            let mel_path = model_dir.join("melspectrogram.onnx");
            let embed_path = model_dir.join("embedding_model.onnx");
            let ww_path = model_dir.join("wake_word.onnx");

            for (name, path) in [
                ("melspectrogram", &mel_path),
                ("embedding_model", &embed_path),
                ("wake_word", &ww_path),
            ] {
                if !path.exists() {
                    warn!(
                        "wake word model not found: {} at {} — wake word disabled",
                        name,
                        path.display()
                    );
                    return false;
                }
            }

            let load = |path: &Path| -> Result<Session, String> {
                Session::builder()
                    .and_then(|b| b.with_intra_threads(1))
                    .and_then(|b| b.with_inter_threads(1))
                    .and_then(|b| b.commit_from_file(path))
                    .map_err(|e| format!("{}: {e}", path.display()))
            };

            match (load(&mel_path), load(&embed_path), load(&ww_path)) {
                (Ok(mel), Ok(embed), Ok(ww)) => {
                    self.mel_session = Some(mel);
                    self.embed_session = Some(embed);
                    self.ww_session = Some(ww);
                    self.reset();
                    info!("wake word detector loaded (3-stage pipeline)");
                    true
                }
                (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                    warn!("Failed to load wake word detector: {e} — wake word disabled");
                    self.mel_session = None;
                    self.embed_session = None;
                    self.ww_session = None;
                    false
                }
            }
        }

        pub fn reset(&mut self) {
            self.buffer.clear();
            self.embeddings.clear();
        }

        fn run_pipeline(&mut self, chunk: &[f32]) -> Result<f32, String> {
            let mel_session = self.mel_session.as_ref().ok_or("mel model not loaded")?;
            let embed_session = self.embed_session.as_ref().ok_or("embed model not loaded")?;
            let ww_session = self.ww_session.as_ref().ok_or("ww model not loaded")?;

            let audio_input = ort::value::Value::from_array(
                ndarray::Array2::from_shape_vec((1, CHUNK_SAMPLES), chunk.to_vec())
                    .map_err(|e| format!("mel input tensor: {e}"))?,
            )
            .map_err(|e| format!("mel input value: {e}"))?;

            let mel_outputs = mel_session
                .run(ort::inputs!["input" => audio_input].map_err(|e| format!("mel inputs: {e}"))?)
                .map_err(|e| format!("mel inference: {e}"))?;
            let mel_output = &mel_outputs[0];

            let embed_input = mel_output
                .try_extract_tensor::<f32>()
                .map_err(|e| format!("extract mel output: {e}"))?;
            let embed_input_val = ort::value::Value::from_array(embed_input.to_owned())
                .map_err(|e| format!("embed input value: {e}"))?;

            let embed_outputs = embed_session
                .run(ort::inputs!["input" => embed_input_val].map_err(|e| format!("embed inputs: {e}"))?)
                .map_err(|e| format!("embed inference: {e}"))?;

            let embedding = embed_outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| format!("extract embedding: {e}"))?;
            let embed_vec: Vec<f32> = embedding.iter().copied().collect();

            self.embeddings.push(embed_vec);
            if self.embeddings.len() > self.embedding_window {
                self.embeddings.drain(..self.embeddings.len() - self.embedding_window);
            }
            if self.embeddings.len() < self.embedding_window {
                return Ok(0.0);
            }

            let embed_dim = self.embeddings[0].len();
            let flat: Vec<f32> = self.embeddings.iter().flat_map(|e| e.iter().copied()).collect();

            let ww_input = ort::value::Value::from_array(
                ndarray::Array3::from_shape_vec((1, self.embedding_window, embed_dim), flat)
                    .map_err(|e| format!("ww input tensor: {e}"))?,
            )
            .map_err(|e| format!("ww input value: {e}"))?;

            let ww_outputs = ww_session
                .run(ort::inputs!["input" => ww_input].map_err(|e| format!("ww inputs: {e}"))?)
                .map_err(|e| format!("ww inference: {e}"))?;

            let tensor = ww_outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| format!("extract ww score: {e}"))?;
            Ok(*tensor.iter().next().ok_or("empty ww output")?)
        }

        pub fn process(&mut self, audio_chunk: &[i16]) -> (bool, f32) {
            if !self.is_loaded() {
                return (false, 0.0);
            }

            self.buffer
                .extend(audio_chunk.iter().map(|&s| s as f32 / i16::MAX as f32));

            let mut max_score: f32 = 0.0;
            while self.buffer.len() >= CHUNK_SAMPLES {
                let chunk: Vec<f32> = self.buffer.drain(..CHUNK_SAMPLES).collect();
                match self.run_pipeline(&chunk) {
                    Ok(score) => max_score = max_score.max(score),
                    Err(e) => warn!("wake word pipeline error: {e}"),
                }
            }

            (max_score >= DETECTION_THRESHOLD, max_score)
        }
    }
}

#[cfg(not(feature = "onnx"))]
mod inner {
    use super::*;

    pub struct OpenWakeWord {
        _private: (),
    }

    impl OpenWakeWord {
        pub fn new() -> Self {
            Self { _private: () }
        }

        pub fn is_loaded(&self) -> bool {
            false
        }

        pub fn load(&mut self, _model_dir: &Path) -> bool {
            warn!("wake word detector not available (onnx feature disabled)");
            false
        }

        pub fn reset(&mut self) {}

        pub fn process(&mut self, _audio_chunk: &[i16]) -> (bool, f32) {
            (false, 0.0)
        }
    }
}

pub use inner::OpenWakeWord;
