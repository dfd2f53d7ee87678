//! C2 — capture gate. Receives PCM frames from the audio driver, optionally
//! feeds a VAD/wake-word detector, writes to the input ring buffer, and
//! emits wake/sleep events to a user callback.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::driver::CaptureStatus;
use crate::error::CoreResult;
use crate::ring_buffer::RingBuffer;
use crate::vad::{VadEngine, VadMode};
use crate::wake_word::OpenWakeWord;

/// How the gate decides when the user is "awake" (speaking to the device).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeMethod {
    /// State is set externally (PTT-style); never inferred from audio.
    Manual,
    Vad,
    AsrWakeup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum GateState {
    Idle = 0,
    Detecting = 1,
    Awake = 2,
}

impl GateState {
    fn from_u8(v: u8) -> Self {
        match v {
            2 => GateState::Awake,
            1 => GateState::Detecting,
            _ => GateState::Idle,
        }
    }
}

/// Edge events derived from `(last_state, new_state)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    ValidVoiceStart,
    ValidVoiceStop,
    AsrWakeupWord,
    AsrWakeupStop,
}

pub struct CaptureGateConfig {
    pub wake_method: WakeMethod,
    /// Whether the device has real AEC; if false, the gate drops mic frames
    /// while the player is speaking to avoid self-listening.
    pub aec_enabled: bool,
    pub post_wake_silence_ms: u64,
    pub ring_buffer_ms: u64,
    pub sample_rate: u32,
}

impl Default for CaptureGateConfig {
    fn default() -> Self {
        Self {
            wake_method: WakeMethod::Vad,
            aec_enabled: false,
            post_wake_silence_ms: 1500,
            ring_buffer_ms: 10_000,
            sample_rate: 16_000,
        }
    }
}

pub type EventCallback = Box<dyn FnMut(CaptureEvent) + Send>;

pub struct CaptureGate {
    config: CaptureGateConfig,
    enabled: AtomicBool,
    state: AtomicU8,
    manual_awake: AtomicBool,
    vad: Mutex<Box<dyn VadEngine>>,
    wake_word: Mutex<Option<OpenWakeWord>>,
    ring: Arc<RingBuffer>,
    event_cb: Mutex<EventCallback>,
    player_playing: Arc<AtomicBool>,
    last_speech_at: Mutex<Instant>,
}

impl CaptureGate {
    /// `init(config, event_cb)`. Allocates the ring buffer sized for
    /// `config.ring_buffer_ms` of audio and starts the worker that recomputes
    /// the wake state.
    pub fn new(
        config: CaptureGateConfig,
        vad: Box<dyn VadEngine>,
        wake_word: Option<OpenWakeWord>,
        player_playing: Arc<AtomicBool>,
        event_cb: EventCallback,
    ) -> Arc<Self> {
        let ring = Arc::new(RingBuffer::for_duration_ms(
            config.ring_buffer_ms,
            config.sample_rate,
        ));
        Arc::new(Self {
            config,
            enabled: AtomicBool::new(true),
            state: AtomicU8::new(GateState::Idle as u8),
            manual_awake: AtomicBool::new(false),
            vad: Mutex::new(vad),
            wake_word: Mutex::new(wake_word),
            ring,
            event_cb: Mutex::new(event_cb),
            player_playing,
            last_speech_at: Mutex::new(Instant::now()),
        })
    }

    pub fn ring_buffer(&self) -> Arc<RingBuffer> {
        Arc::clone(&self.ring)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Manual wake-method control (PTT). Recomputed on the next tick.
    pub fn set_manual_awake(&self, awake: bool) {
        self.manual_awake.store(awake, Ordering::Relaxed);
    }

    /// The driver callback, invoked for every captured frame. Ordering of
    /// steps is load-bearing: echo suppression before detection, detection
    /// before the ring-buffer write.
    pub fn feed(&self, frame: &[i16], _status: CaptureStatus) -> CoreResult<()> {
        if !self.enabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        let echo_risk = !self.config.aec_enabled && self.player_playing.load(Ordering::Relaxed);
        if echo_risk {
            self.vad.lock().unwrap().reset();
            return Ok(());
        }

        let mut is_speech = false;
        match self.config.wake_method {
            WakeMethod::Manual => {}
            WakeMethod::Vad => {
                is_speech = self.vad.lock().unwrap().process(frame, VadMode::Default);
                if is_speech {
                    *self.last_speech_at.lock().unwrap() = Instant::now();
                }
            }
            WakeMethod::AsrWakeup => {
                if let Some(ww) = self.wake_word.lock().unwrap().as_mut() {
                    let (matched, _score) = ww.process(frame);
                    if matched {
                        *self.last_speech_at.lock().unwrap() = Instant::now();
                        self.try_transition(GateState::Awake);
                        (self.event_cb.lock().unwrap())(CaptureEvent::AsrWakeupWord);
                    }
                }
            }
        }

        if self.config.wake_method == WakeMethod::Vad {
            let target = if is_speech { GateState::Awake } else { GateState::Detecting };
            self.try_transition(target);
        }

        let bytes: Vec<u8> = frame.iter().flat_map(|s| s.to_le_bytes()).collect();
        if !self.ring.write(&bytes) {
            debug!("capture ring buffer full — frame dropped");
        }

        Ok(())
    }

    /// Recompute state for the post-wake silence timeout (ASR wake-word
    /// mode) and manual mode. Call periodically from a lightweight worker
    /// tick; VAD mode transitions happen inline in `feed`.
    pub fn tick(&self) {
        match self.config.wake_method {
            WakeMethod::Manual => {
                let target = if self.manual_awake.load(Ordering::Relaxed) {
                    GateState::Awake
                } else {
                    GateState::Detecting
                };
                self.try_transition(target);
            }
            WakeMethod::AsrWakeup => {
                if self.current_state() == GateState::Awake {
                    let elapsed = self.last_speech_at.lock().unwrap().elapsed();
                    if elapsed >= Duration::from_millis(self.config.post_wake_silence_ms) {
                        self.try_transition(GateState::Detecting);
                        (self.event_cb.lock().unwrap())(CaptureEvent::AsrWakeupStop);
                    }
                }
            }
            WakeMethod::Vad => {}
        }
    }

    fn current_state(&self) -> GateState {
        GateState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn try_transition(&self, target: GateState) {
        let prev = self.state.swap(target as u8, Ordering::AcqRel);
        let prev = GateState::from_u8(prev);
        if prev == target {
            return;
        }
        match (prev, target) {
            (_, GateState::Awake) if prev != GateState::Awake => {
                (self.event_cb.lock().unwrap())(CaptureEvent::ValidVoiceStart);
            }
            (GateState::Awake, _) => {
                (self.event_cb.lock().unwrap())(CaptureEvent::ValidVoiceStop);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::EnergyVad;
    use std::sync::atomic::AtomicU32;

    fn make_gate(wake_method: WakeMethod) -> (Arc<CaptureGate>, Arc<AtomicU32>) {
        let events = Arc::new(AtomicU32::new(0));
        let events2 = Arc::clone(&events);
        let cfg = CaptureGateConfig {
            wake_method,
            ..Default::default()
        };
        let gate = CaptureGate::new(
            cfg,
            Box::new(EnergyVad),
            None,
            Arc::new(AtomicBool::new(false)),
            Box::new(move |_ev| {
                events2.fetch_add(1, Ordering::Relaxed);
            }),
        );
        (gate, events)
    }

    #[test]
    fn loud_frame_transitions_to_awake_and_emits_event() {
        let (gate, events) = make_gate(WakeMethod::Vad);
        let loud = vec![20_000i16; 320];
        gate.feed(&loud, CaptureStatus::Receiving).unwrap();
        assert_eq!(events.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn disabled_gate_drops_frames() {
        let (gate, events) = make_gate(WakeMethod::Vad);
        gate.set_enabled(false);
        let loud = vec![20_000i16; 320];
        gate.feed(&loud, CaptureStatus::Receiving).unwrap();
        assert_eq!(events.load(Ordering::Relaxed), 0);
        assert_eq!(gate.ring_buffer().used(), 0);
    }

    #[test]
    fn echo_suppression_drops_frame_while_player_speaking() {
        let events = Arc::new(AtomicU32::new(0));
        let events2 = Arc::clone(&events);
        let playing = Arc::new(AtomicBool::new(true));
        let cfg = CaptureGateConfig {
            wake_method: WakeMethod::Vad,
            aec_enabled: false,
            ..Default::default()
        };
        let gate = CaptureGate::new(
            cfg,
            Box::new(EnergyVad),
            None,
            Arc::clone(&playing),
            Box::new(move |_ev| {
                events2.fetch_add(1, Ordering::Relaxed);
            }),
        );
        let loud = vec![20_000i16; 320];
        gate.feed(&loud, CaptureStatus::Receiving).unwrap();
        assert_eq!(gate.ring_buffer().used(), 0);
        assert_eq!(events.load(Ordering::Relaxed), 0);
    }
}
