//! C3 — MP3 decoder sink. Single-producer/single-consumer decode loop
//! converting a raw MP3 byte stream into PCM frames pushed to the playback
//! driver; owns the playback state machine.

pub mod alert;
mod mpeg;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::driver::{AudioDriver, DriverCmd};
use crate::error::{CoreError, CoreResult};
use crate::ring_buffer::RingBuffer;

/// Raw-byte ring buffer capacity — large enough to absorb network jitter.
const STREAM_BUF_LEN: usize = 131_072;
/// Exceeds the worst-case MP3 frame size; do not shrink.
const MAINBUF_SIZE: usize = 1940;
/// Max decoded PCM samples per frame (grains * channels).
const PCM_SIZE_MAX: usize = 4608;
const NO_DATA_TIMEOUT: Duration = Duration::from_secs(5);
const PLAY_TICK: Duration = Duration::from_millis(5);
const IDLE_TICK: Duration = Duration::from_millis(500);
/// Backpressure poll interval while `write` blocks on a full ring buffer.
const WRITE_POLL: Duration = Duration::from_millis(10);

enum Msg {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Start,
    Play,
    Stop,
}

pub struct Mp3Player {
    ring: Arc<RingBuffer>,
    tx: mpsc::Sender<Msg>,
    is_playing: Arc<AtomicBool>,
    is_eof: Arc<AtomicBool>,
}

impl Mp3Player {
    /// `init()` — allocates the raw-byte ring buffer, decoder scratch, and
    /// state queue, and spawns the worker thread. The decoder handle itself
    /// is lazily allocated on the first `START`.
    pub fn new(driver: Arc<dyn AudioDriver>) -> Self {
        let ring = Arc::new(RingBuffer::new(STREAM_BUF_LEN));
        let (tx, rx) = mpsc::channel();
        let is_playing = Arc::new(AtomicBool::new(false));
        let is_eof = Arc::new(AtomicBool::new(false));

        {
            let ring = Arc::clone(&ring);
            let is_playing = Arc::clone(&is_playing);
            let is_eof = Arc::clone(&is_eof);
            std::thread::spawn(move || worker_loop(ring, rx, driver, is_playing, is_eof));
        }

        Self { ring, tx, is_playing, is_eof }
    }

    /// Posts `START`.
    pub fn start(&self) -> CoreResult<()> {
        self.is_eof.store(false, Ordering::Relaxed);
        self.tx
            .send(Msg::Start)
            .map_err(|_| CoreError::Driver("player worker gone".into()))
    }

    /// Appends to the raw-byte ring buffer, blocking the caller while the
    /// buffer is full — backpressure is intentional; never silently drop.
    pub fn write(&self, bytes: &[u8], is_eof: bool) -> CoreResult<()> {
        let mut offset = 0;
        while offset < bytes.len() {
            let chunk_end = (offset + self.ring.capacity()).min(bytes.len());
            let chunk = &bytes[offset..chunk_end];
            if self.ring.write(chunk) {
                offset = chunk_end;
            } else {
                std::thread::sleep(WRITE_POLL);
            }
        }
        if is_eof {
            self.is_eof.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Posts `STOP` and blocks until the worker observes `is_playing==false`,
    /// then clears the driver's PCM queue.
    pub fn stop(&self, driver: &dyn AudioDriver) -> CoreResult<()> {
        if !self.is_playing.load(Ordering::Acquire) {
            return Ok(());
        }
        let _ = self.tx.send(Msg::Stop);
        while self.is_playing.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(1));
        }
        driver.config(DriverCmd::PlayStop)
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::Acquire)
    }

    /// Shared flag for the capture gate's echo-suppression check (§4.2):
    /// drop mic frames while this player is speaking and the device has no
    /// real AEC.
    pub fn playing_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.is_playing)
    }
}

fn worker_loop(
    ring: Arc<RingBuffer>,
    rx: mpsc::Receiver<Msg>,
    driver: Arc<dyn AudioDriver>,
    is_playing: Arc<AtomicBool>,
    is_eof: Arc<AtomicBool>,
) {
    let mut state = State::Idle;
    let mut main_buf: Vec<u8> = Vec::with_capacity(MAINBUF_SIZE);
    let mut decoder = mpeg::FrameDecoder::new();
    let mut starved_since: Option<Instant> = None;

    loop {
        match state {
            State::Idle => {
                match rx.recv_timeout(IDLE_TICK) {
                    Ok(Msg::Start) => state = State::Start,
                    Ok(Msg::Stop) => {}
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => return,
                }
            }
            State::Start => {
                main_buf.clear();
                decoder.reset();
                starved_since = None;
                is_playing.store(true, Ordering::Release);
                state = State::Play;
            }
            State::Play => {
                match rx.try_recv() {
                    Ok(Msg::Stop) => {
                        state = State::Stop;
                        continue;
                    }
                    Ok(Msg::Start) => {
                        // A new reply started before this one finished —
                        // restart the decoder rather than drop the request.
                        ring.reset();
                        state = State::Start;
                        continue;
                    }
                    Err(_) => {}
                }

                // Top up the main buffer from the ring buffer up to capacity.
                if main_buf.len() < MAINBUF_SIZE {
                    let want = MAINBUF_SIZE - main_buf.len();
                    let mut tmp = vec![0u8; want];
                    let n = ring.read(&mut tmp);
                    if n > 0 {
                        main_buf.extend_from_slice(&tmp[..n]);
                        starved_since = None;
                    }
                }

                match decoder.decode_one(&main_buf) {
                    mpeg::DecodeOutcome::Frame { consumed, pcm } => {
                        main_buf.drain(..consumed);
                        if !pcm.is_empty() {
                            let n = pcm.len().min(PCM_SIZE_MAX);
                            if let Err(e) = driver.play(&pcm[..n]) {
                                warn!("playback write error: {e}");
                            }
                        }
                    }
                    mpeg::DecodeOutcome::NeedMoreData => {}
                    mpeg::DecodeOutcome::Invalid => {
                        if !main_buf.is_empty() {
                            debug!("discarding {} unparseable bytes", main_buf.len());
                            main_buf.clear();
                        }
                    }
                }

                let starved = ring.used() == 0 && main_buf.is_empty();
                if starved && is_eof.load(Ordering::Acquire) {
                    state = State::Stop;
                    continue;
                }
                if starved && !is_eof.load(Ordering::Acquire) {
                    let since = *starved_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= NO_DATA_TIMEOUT {
                        warn!("player starved for {:?} — forcing stop", NO_DATA_TIMEOUT);
                        state = State::Stop;
                        continue;
                    }
                } else {
                    starved_since = None;
                }

                std::thread::sleep(PLAY_TICK);
            }
            State::Stop => {
                starved_since = None;
                is_playing.store(false, Ordering::Release);
                is_eof.store(false, Ordering::Release);
                ring.reset();
                state = State::Idle;
            }
        }
    }
}
