//! C5 — cloud-ASR state machine. Owns the upload lifecycle
//! (`START → UPLOADING → STOP → WAIT_ASR → IDLE`), pulls from the capture
//! gate's ring buffer, pushes to the transport agent.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::ring_buffer::RingBuffer;

/// Wait-ASR timer default.
const WAIT_ASR_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-tick queue fetch timeout.
const TICK_TIMEOUT: Duration = Duration::from_millis(20);
/// Below this much buffered audio, `UPLOADING` is a no-op (wait for data).
const MIN_UPLOAD_MS: u64 = 100;
/// Upload scratch size — one chunk's worth of audio per `upload_data` call.
const SCRATCH_MS: u64 = 100;
/// VAD-active window kept across a `UPDATE_VAD` trim: 300 ms pre + 300 ms
/// post speech (the source's `VAD_ACTIVE_TM_MS` was referenced but never
/// defined; this is the documented default).
const VAD_ACTIVE_WINDOW_MS: u64 = 600;

/// Thin translation layer to the transport (C11 in the platform contract);
/// implemented by the agent adapter.
pub trait UploadAgent: Send + Sync {
    /// Returns true on success. A new cloud-ASR session begins here.
    fn upload_start(&self, new_session: bool) -> bool;
    fn upload_data(&self, bytes: &[u8]);
    fn upload_stop(&self);
    /// Server- or user-initiated interrupt of any in-progress upload.
    fn chat_interrupt(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AsrState {
    Idle = 0,
    Upload = 1,
    WaitAsr = 2,
}

impl AsrState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => AsrState::Upload,
            2 => AsrState::WaitAsr,
            _ => AsrState::Idle,
        }
    }
}

enum Event {
    EnterIdle { force: bool },
    UpdateVad,
    Start,
    Uploading,
    Stop,
}

pub struct CloudAsr {
    ring: Arc<RingBuffer>,
    tx: mpsc::Sender<Event>,
    state: Arc<AtomicU8>,
    is_uploading: Arc<AtomicBool>,
    sample_rate: u32,
}

impl CloudAsr {
    pub fn new(ring: Arc<RingBuffer>, agent: Arc<dyn UploadAgent>, sample_rate: u32) -> Self {
        let (tx, rx) = mpsc::channel();
        let state = Arc::new(AtomicU8::new(AsrState::Idle as u8));
        let is_uploading = Arc::new(AtomicBool::new(false));

        {
            let ring = Arc::clone(&ring);
            let state = Arc::clone(&state);
            let is_uploading = Arc::clone(&is_uploading);
            std::thread::spawn(move || {
                worker_loop(ring, rx, agent, state, is_uploading, sample_rate)
            });
        }

        Self { ring, tx, state, is_uploading, sample_rate }
    }

    pub fn current_state(&self) -> AsrState {
        AsrState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_uploading(&self) -> bool {
        self.is_uploading.load(Ordering::Acquire)
    }

    pub fn ring_buffer(&self) -> Arc<RingBuffer> {
        Arc::clone(&self.ring)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Posts `START`.
    pub fn start(&self) {
        let _ = self.tx.send(Event::Start);
    }

    /// Posts `STOP`.
    pub fn stop(&self) {
        let _ = self.tx.send(Event::Stop);
    }

    /// Posts `ENTER_IDLE`, optionally forcing a chat-interrupt first.
    pub fn set_idle(&self, force: bool) {
        let _ = self.tx.send(Event::EnterIdle { force });
    }

    /// Posts `ENTER_IDLE` only if currently `WAIT_ASR`. Returns `true` if
    /// the transition was requested, `false` (no-op) otherwise.
    pub fn stop_wait_asr(&self) -> bool {
        if self.current_state() != AsrState::WaitAsr {
            return false;
        }
        let _ = self.tx.send(Event::EnterIdle { force: false });
        true
    }
}

fn worker_loop(
    ring: Arc<RingBuffer>,
    rx: mpsc::Receiver<Event>,
    agent: Arc<dyn UploadAgent>,
    state: Arc<AtomicU8>,
    is_uploading: Arc<AtomicBool>,
    sample_rate: u32,
) {
    let scratch_bytes = (SCRATCH_MS as u128 * sample_rate as u128 * 2 / 1000) as usize;
    let min_upload_bytes = (MIN_UPLOAD_MS as u128 * sample_rate as u128 * 2 / 1000) as usize;
    let vad_window_bytes = (VAD_ACTIVE_WINDOW_MS as u128 * sample_rate as u128 * 2 / 1000) as usize;

    let mut wait_asr_deadline: Option<Instant> = None;

    loop {
        let event = match rx.recv_timeout(TICK_TIMEOUT) {
            Ok(ev) => Some(ev),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if let Some(deadline) = wait_asr_deadline {
                    if Instant::now() >= deadline {
                        info!("wait-ASR timeout — returning to idle");
                        wait_asr_deadline = None;
                        Some(Event::EnterIdle { force: false })
                    } else if is_uploading.load(Ordering::Acquire) {
                        Some(Event::Uploading)
                    } else {
                        Some(Event::UpdateVad)
                    }
                } else if is_uploading.load(Ordering::Acquire) {
                    Some(Event::Uploading)
                } else {
                    Some(Event::UpdateVad)
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        };

        let Some(event) = event else { continue };

        if let Event::EnterIdle { force: true } = event {
            agent.chat_interrupt();
        }

        match event {
            Event::EnterIdle { .. } => {
                wait_asr_deadline = None;
                state.store(AsrState::Idle as u8, Ordering::Release);
                ring.trim_to_at_most(vad_window_bytes);
            }
            Event::UpdateVad => {
                ring.trim_to_at_most(vad_window_bytes);
            }
            Event::Start => {
                wait_asr_deadline = None;
                if agent.upload_start(true) {
                    is_uploading.store(true, Ordering::Release);
                    state.store(AsrState::Upload as u8, Ordering::Release);
                } else {
                    state.store(AsrState::Idle as u8, Ordering::Release);
                }
            }
            Event::Uploading => {
                if !is_uploading.load(Ordering::Acquire) {
                    continue;
                }
                if ring.used() < min_upload_bytes {
                    continue;
                }
                let mut buf = vec![0u8; scratch_bytes];
                let n = ring.read(&mut buf);
                if n > 0 {
                    agent.upload_data(&buf[..n]);
                }
            }
            Event::Stop => {
                // Drain the entire remaining ring buffer, bounded iteration.
                loop {
                    if !is_uploading.load(Ordering::Acquire) {
                        break;
                    }
                    let mut buf = vec![0u8; scratch_bytes];
                    let n = ring.read(&mut buf);
                    if n == 0 {
                        break;
                    }
                    agent.upload_data(&buf[..n]);
                }
                agent.upload_stop();
                is_uploading.store(false, Ordering::Release);
                wait_asr_deadline = Some(Instant::now() + WAIT_ASR_TIMEOUT);
                state.store(AsrState::WaitAsr as u8, Ordering::Release);
                debug!("upload stopped, entering wait-ASR");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockAgent {
        started: AtomicBool,
        delivered: Mutex<Vec<u8>>,
        stopped: AtomicBool,
        interrupted: AtomicBool,
    }

    impl MockAgent {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: AtomicBool::new(false),
                delivered: Mutex::new(Vec::new()),
                stopped: AtomicBool::new(false),
                interrupted: AtomicBool::new(false),
            })
        }
    }

    impl UploadAgent for MockAgent {
        fn upload_start(&self, _new_session: bool) -> bool {
            self.started.store(true, Ordering::SeqCst);
            true
        }
        fn upload_data(&self, bytes: &[u8]) {
            self.delivered.lock().unwrap().extend_from_slice(bytes);
        }
        fn upload_stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
        fn chat_interrupt(&self) {
            self.interrupted.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn stop_wait_asr_is_noop_outside_wait_asr() {
        let ring = Arc::new(RingBuffer::new(1000));
        let agent = MockAgent::new();
        let asr = CloudAsr::new(Arc::clone(&ring), agent, 16_000);
        assert_eq!(asr.current_state(), AsrState::Idle);
        assert!(!asr.stop_wait_asr());
    }

    #[test]
    fn full_session_delivers_all_bytes_then_stops() {
        let ring = Arc::new(RingBuffer::new(100_000));
        let agent = MockAgent::new();
        let asr = CloudAsr::new(Arc::clone(&ring), Arc::clone(&agent) as Arc<dyn UploadAgent>, 16_000);

        let payload = vec![7u8; 6400]; // 200ms @16kHz/16-bit
        ring.write(&payload);

        asr.start();
        std::thread::sleep(Duration::from_millis(100));
        asr.stop();
        std::thread::sleep(Duration::from_millis(150));

        assert!(agent.started.load(Ordering::SeqCst));
        assert!(agent.stopped.load(Ordering::SeqCst));
        assert_eq!(asr.current_state(), AsrState::WaitAsr);
    }
}
