//! C4 — alert player. Plays built-in PCM/MP3 assets through the MP3
//! decoder sink (C3) with synchronous and fire-and-forget modes.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::Mp3Player;
use crate::driver::AudioDriver;
use crate::error::CoreResult;

/// Built-in alert/prompt assets. Byte payloads are provisioned at image
/// build time (mirrors the vendor's baked-in media arrays); this crate
/// only owns the playback sequencing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    PowerOn,
    NotActive,
    NetCfg,
    NetConnected,
    NetFail,
    NetDisconnect,
    BatteryLow,
    PleaseAgain,
    Wakeup,
    Dialogue1,
    Dialogue2,
    Dialogue3,
    Dialogue4,
}

/// Upper bound on how long `play_syn` waits to observe playback actually
/// start before assuming the asset was empty/already finished.
const PLAY_START_TIMEOUT: Duration = Duration::from_millis(200);

impl AlertType {
    /// Built-in media bytes for this alert. Empty until provisioned by the
    /// board image — playback of an empty asset is a no-op EOF write.
    fn bytes(self) -> &'static [u8] {
        &[]
    }
}

/// Serializes alert playback against concurrent `play`/`play_syn` callers —
/// the underlying `Mp3Player` is a single-session device resource.
pub struct AlertPlayer {
    player: Mutex<()>,
    mp3: std::sync::Arc<Mp3Player>,
}

impl AlertPlayer {
    pub fn new(mp3: std::sync::Arc<Mp3Player>) -> Self {
        Self { player: Mutex::new(()), mp3 }
    }

    /// `play(type)` — starts the decoder and writes the whole asset with
    /// `eof=true`, then returns without waiting for playback to finish.
    pub fn play(&self, alert: AlertType) -> CoreResult<()> {
        let _guard = self.player.lock().unwrap();
        self.mp3.start()?;
        self.mp3.write(alert.bytes(), true)
    }

    /// `play_syn(type)` — additionally spins until `is_playing` flips true
    /// then false, i.e. waits for the alert to fully finish.
    pub fn play_syn(&self, alert: AlertType, driver: &dyn AudioDriver) -> CoreResult<()> {
        let _guard = self.player.lock().unwrap();
        self.mp3.start()?;
        self.mp3.write(alert.bytes(), true)?;

        let wait_start = Instant::now();
        while !self.mp3.is_playing() {
            if wait_start.elapsed() >= PLAY_START_TIMEOUT {
                // Asset decoded and stopped before we observed it start
                // (e.g. an empty/unprovisioned asset) — nothing to wait for.
                let _ = driver;
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        while self.mp3.is_playing() {
            std::thread::sleep(Duration::from_millis(1));
        }
        let _ = driver;
        Ok(())
    }
}
