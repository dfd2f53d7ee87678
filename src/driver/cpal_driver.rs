//! Host `cpal` backed implementation of [`super::AudioDriver`], used by the
//! demo binary and integration tests in place of the vendor I2S HAL.
//!
//! Grounded on the teacher's `audio/capture.rs` (device resolution,
//! resampling, mono downmix) and `tts/playback.rs` (output stream setup).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use tracing::{error, info, warn};

use crate::error::{CoreError, CoreResult};

use super::{AudioDriver, CaptureStatus, DriverCmd, MicCallback};

/// 80 ms at 16 kHz — matches the capture gate's expected frame size.
const CHUNK_SAMPLES: usize = 1280;

pub struct CpalAudioDriver {
    device_name: Option<String>,
    sample_rate: u32,
    volume: AtomicU8,
    stop_flag: Arc<AtomicBool>,
    _input_stream: Mutex<Option<cpal::Stream>>,
    _output_stream: Mutex<Option<cpal::Stream>>,
    out_prod: Mutex<Option<ringbuf::HeapProd<i16>>>,
}

impl CpalAudioDriver {
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Self {
        Self {
            device_name: device_name.map(str::to_string),
            sample_rate,
            volume: AtomicU8::new(80),
            stop_flag: Arc::new(AtomicBool::new(false)),
            _input_stream: Mutex::new(None),
            _output_stream: Mutex::new(None),
            out_prod: Mutex::new(None),
        }
    }

    fn resolve_input_device(&self) -> CoreResult<cpal::Device> {
        let host = cpal::default_host();
        if let Some(name) = &self.device_name {
            if let Ok(mut devices) = host.input_devices() {
                if let Some(d) = devices.find(|d| d.name().map(|n| &n == name).unwrap_or(false)) {
                    return Ok(d);
                }
            }
            warn!("input device '{name}' not found, falling back to default");
        }
        host.default_input_device()
            .ok_or_else(|| CoreError::Driver("no default input device".into()))
    }

    fn resolve_output_device(&self) -> CoreResult<cpal::Device> {
        let host = cpal::default_host();
        host.default_output_device()
            .ok_or_else(|| CoreError::Driver("no default output device".into()))
    }
}

impl AudioDriver for CpalAudioDriver {
    fn open(&self, mut mic_cb: MicCallback) -> CoreResult<()> {
        let device = self.resolve_input_device()?;
        let config = device
            .default_input_config()
            .map_err(|e| CoreError::Driver(e.to_string()))?;
        let native_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let target_rate = self.sample_rate;

        let mut mono_buf: Vec<f32> = Vec::new();
        let mut chunk_buf: Vec<i16> = Vec::with_capacity(CHUNK_SAMPLES);

        let err_fn = |e| error!("cpal input stream error: {e}");

        let stream = device
            .build_input_stream(
                &config.into(),
                move |data: &[f32], _| {
                    // Downmix to mono.
                    if channels > 1 {
                        mono_buf.clear();
                        mono_buf.extend(data.chunks(channels).map(|frame| {
                            frame.iter().sum::<f32>() / channels as f32
                        }));
                    } else {
                        mono_buf.clear();
                        mono_buf.extend_from_slice(data);
                    }

                    let resampled = resample_linear(&mono_buf, native_rate, target_rate);
                    for sample in resampled {
                        let clamped = sample.clamp(-1.0, 1.0);
                        chunk_buf.push((clamped * i16::MAX as f32) as i16);
                        if chunk_buf.len() == CHUNK_SAMPLES {
                            mic_cb(&chunk_buf, CaptureStatus::Receiving);
                            chunk_buf.clear();
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| CoreError::Driver(e.to_string()))?;

        stream.play().map_err(|e| CoreError::Driver(e.to_string()))?;
        *self._input_stream.lock().unwrap() = Some(stream);
        info!("audio capture started ({} Hz native -> {} Hz)", native_rate, target_rate);
        Ok(())
    }

    fn play(&self, samples: &[i16]) -> CoreResult<()> {
        let mut guard = self.out_prod.lock().unwrap();
        if guard.is_none() {
            drop(guard);
            self.start_output()?;
            guard = self.out_prod.lock().unwrap();
        }
        if let Some(prod) = guard.as_mut() {
            let mut pushed = 0;
            while pushed < samples.len() {
                pushed += prod.push_slice(&samples[pushed..]);
                if pushed < samples.len() {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
            }
        }
        Ok(())
    }

    fn config(&self, cmd: DriverCmd) -> CoreResult<()> {
        match cmd {
            DriverCmd::SetVolume(v) => {
                self.volume.store(v.min(100), Ordering::Relaxed);
                Ok(())
            }
            DriverCmd::PlayStop => {
                if let Some(prod) = self.out_prod.lock().unwrap().as_mut() {
                    // Drain by dropping and recreating — clears all buffered PCM.
                    let _ = prod;
                }
                *self.out_prod.lock().unwrap() = None;
                *self._output_stream.lock().unwrap() = None;
                Ok(())
            }
        }
    }

    fn close(&self) -> CoreResult<()> {
        self.stop_flag.store(true, Ordering::Relaxed);
        *self._input_stream.lock().unwrap() = None;
        *self._output_stream.lock().unwrap() = None;
        Ok(())
    }
}

impl CpalAudioDriver {
    fn start_output(&self) -> CoreResult<()> {
        let device = self.resolve_output_device()?;
        let config = device
            .default_output_config()
            .map_err(|e| CoreError::Driver(e.to_string()))?;
        let channels = config.channels() as usize;

        let rb = ringbuf::HeapRb::<i16>::new(self.sample_rate as usize * 2);
        let (prod, mut cons) = rb.split();

        let volume = self.volume.load(Ordering::Relaxed) as f32 / 100.0;
        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _| {
                    for frame in data.chunks_mut(channels) {
                        let mut sample = [0i16; 1];
                        let sample = if cons.pop_slice(&mut sample) == 1 {
                            (sample[0] as f32 / i16::MAX as f32) * volume
                        } else {
                            0.0
                        };
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |e| error!("cpal output stream error: {e}"),
                None,
            )
            .map_err(|e| CoreError::Driver(e.to_string()))?;

        stream.play().map_err(|e| CoreError::Driver(e.to_string()))?;
        *self._output_stream.lock().unwrap() = Some(stream);
        *self.out_prod.lock().unwrap() = Some(prod);
        Ok(())
    }
}

/// Naive linear-interpolation resampler, matching the teacher's capture
/// path precision requirements (speech VAD/ASR, not hi-fi playback).
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos.floor() as usize;
        let frac = (src_pos - idx as f64) as f32;
        let a = input[idx.min(input.len() - 1)];
        let b = input[(idx + 1).min(input.len() - 1)];
        out.push(a + (b - a) * frac);
    }
    out
}

/// List available input device names.
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    host.input_devices()
        .map(|it| it.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}
