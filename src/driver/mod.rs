//! External collaborator contracts (§6): the audio driver and the network
//! link-status signal. These are traits so the core pipeline stays
//! independent of any particular codec/I2S HAL or socket implementation;
//! [`cpal_driver`] supplies a concrete host implementation used by the demo
//! binary and integration tests.

pub mod cpal_driver;

use crate::error::CoreResult;

/// Status carried alongside captured PCM frames, mirroring the vendor
/// driver's VAD start/end/receiving/finish signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    VadStart,
    Receiving,
    VadEnd,
    Finish,
}

/// `config(handle, cmd, args)` commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCmd {
    /// 0-100.
    SetVolume(u8),
    /// Clear the output queue.
    PlayStop,
}

pub type MicCallback = Box<dyn FnMut(&[i16], CaptureStatus) + Send>;

/// The microphone/speaker driver contract consumed by the capture gate (C2)
/// and the MP3 decoder sink (C3).
pub trait AudioDriver: Send + Sync {
    /// Install the producer callback. Invoked once at startup.
    fn open(&self, mic_cb: MicCallback) -> CoreResult<()>;

    /// Enqueue PCM16 samples for output. Blocks or returns once the driver
    /// has accepted them.
    fn play(&self, samples: &[i16]) -> CoreResult<()>;

    fn config(&self, cmd: DriverCmd) -> CoreResult<()>;

    fn close(&self) -> CoreResult<()>;
}

/// OS link-status events consumed by the WebSocket client runtime (C10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Up,
    Down,
}
