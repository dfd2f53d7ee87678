//! Always-on voice-assistant endpoint core.
//!
//! Wires together capture (C2) -> cloud-ASR upload (C5) -> the agent
//! adapter (C11) over the WebSocket client (C6-C10), and the server's
//! reply stream back down through the MP3 decoder sink (C3) to the audio
//! driver. Runs as a single long-lived process; there is no host-side IPC
//! surface here, only the on-device pipeline.

mod agent;
mod capture;
mod cloud_asr;
mod config;
mod driver;
mod error;
mod player;
mod ring_buffer;
mod telemetry;
mod vad;
mod wake_word;
mod ws;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use agent::{Agent, AgentHandlers, Message};
use capture::{CaptureEvent, CaptureGate, CaptureGateConfig, WakeMethod};
use cloud_asr::CloudAsr;
use config::{read_device_config, WorkMode, WsConfig};
use driver::cpal_driver::CpalAudioDriver;
use driver::{AudioDriver, LinkEvent};
use player::alert::{AlertPlayer, AlertType};
use player::Mp3Player;
use vad::{SileroVad, VadEngine};
use wake_word::OpenWakeWord;

fn wake_method_for(mode: WorkMode) -> WakeMethod {
    match mode {
        WorkMode::ManualSingleTalk => WakeMethod::Manual,
        WorkMode::VadFreeTalk => WakeMethod::Vad,
        WorkMode::AsrWakeupSingleTalk | WorkMode::AsrWakeupFreeTalk => WakeMethod::AsrWakeup,
    }
}

/// Picks the neural VAD; when the `onnx` feature isn't compiled in, or the
/// model file is missing from `<data_dir>/models`, `SileroVad` falls back
/// to the always-available energy detector internally.
fn build_vad(models_dir: &std::path::Path) -> Box<dyn VadEngine> {
    let mut vad = SileroVad::new();
    vad.load(models_dir);
    Box::new(vad)
}

fn ws_config() -> WsConfig {
    let uri = std::env::var("VOICE_CORE_WS_URI").unwrap_or_else(|_| "wss://localhost:8443/agent".into());
    WsConfig { uri, ..WsConfig::default() }
}

fn main() -> anyhow::Result<()> {
    let device_config = read_device_config();
    let data_dir = config::paths::get_data_dir();
    let _telemetry_guard = telemetry::init(&data_dir);

    info!(
        work_mode = ?device_config.work_mode,
        sample_rate = device_config.sample_rate,
        "voice-endpoint-core starting"
    );

    let driver: Arc<dyn AudioDriver> =
        Arc::new(CpalAudioDriver::new(None, device_config.sample_rate));
    driver.config(driver::DriverCmd::SetVolume(device_config.spk_volume))?;

    let mp3 = Arc::new(Mp3Player::new(Arc::clone(&driver)));
    let alert = Arc::new(AlertPlayer::new(Arc::clone(&mp3)));

    let wake_method = wake_method_for(device_config.work_mode);
    let wake_word = matches!(wake_method, WakeMethod::AsrWakeup).then(|| {
        let mut ww = OpenWakeWord::new();
        ww.load(&data_dir.join("models"));
        ww
    });

    let gate_config = CaptureGateConfig {
        wake_method,
        aec_enabled: false,
        post_wake_silence_ms: 1500,
        ring_buffer_ms: 10_000,
        sample_rate: device_config.sample_rate,
    };

    // Filled in once the cloud-ASR state machine exists, so the capture
    // gate's event callback (constructed first) can still call into it.
    let cloud_asr_slot: Arc<Mutex<Option<Arc<CloudAsr>>>> = Arc::new(Mutex::new(None));
    let asr_for_cb = Arc::clone(&cloud_asr_slot);
    let alert_for_cb = Arc::clone(&alert);
    let driver_for_cb = Arc::clone(&driver);

    let event_cb: capture::EventCallback = Box::new(move |event| {
        let Some(asr) = asr_for_cb.lock().unwrap().clone() else { return };
        match event {
            CaptureEvent::ValidVoiceStart => asr.start(),
            CaptureEvent::ValidVoiceStop => asr.stop(),
            CaptureEvent::AsrWakeupWord => {
                if let Err(e) = alert_for_cb.play_syn(AlertType::Wakeup, driver_for_cb.as_ref()) {
                    warn!("wakeup alert playback failed: {e}");
                }
                asr.start();
            }
            CaptureEvent::AsrWakeupStop => asr.stop(),
        }
    });

    let capture_gate = CaptureGate::new(
        gate_config,
        build_vad(&data_dir.join("models")),
        wake_word,
        mp3.playing_flag(),
        event_cb,
    );

    let mp3_for_agent = Arc::clone(&mp3);
    let mp3_for_audio = Arc::clone(&mp3);
    let asr_for_link = Arc::clone(&cloud_asr_slot);
    let driver_for_agent = Arc::clone(&driver);

    let agent_handlers = AgentHandlers {
        on_message: Box::new(move |msg| match msg {
            Message::AudioStart { .. } => {
                // A reply mid-playback still gets here as a fresh
                // AUDIO_START; stop the previous one before starting.
                if mp3_for_agent.is_playing() {
                    if let Err(e) = mp3_for_agent.stop(driver_for_agent.as_ref()) {
                        warn!("failed to stop previous TTS playback: {e}");
                    }
                }
                if let Err(e) = mp3_for_agent.start() {
                    warn!("failed to start TTS playback: {e}");
                }
            }
            Message::AudioStop { .. } | Message::End { .. } => {
                if let Err(e) = mp3_for_agent.write(&[], true) {
                    warn!("failed to mark TTS stream eof: {e}");
                }
            }
            Message::ChatBreak { .. } | Message::ServerVad { .. } => {
                // Server-initiated barge-in: hard-stop playback and drop
                // to idle without a redundant chat-interrupt re-entry
                // (that path is only for the device-initiated case in
                // `CloudAsr::set_idle`).
                if let Err(e) = mp3_for_agent.stop(driver_for_agent.as_ref()) {
                    warn!("failed to stop playback on barge-in: {e}");
                }
                if let Some(asr) = asr_for_link.lock().unwrap().clone() {
                    asr.set_idle(false);
                }
            }
            Message::TextAsr { .. } => {
                if let Some(asr) = asr_for_link.lock().unwrap().clone() {
                    asr.stop_wait_asr();
                }
            }
            Message::TextNlgStart { .. }
            | Message::TextNlgData { .. }
            | Message::TextNlgStop { .. }
            | Message::Emotion { .. } => {}
        }),
        on_audio: Box::new(move |bytes| {
            if let Err(e) = mp3_for_audio.write(&bytes, false) {
                warn!("failed to queue TTS audio: {e}");
            }
        }),
        on_link: Box::new(|event| match event {
            LinkEvent::Up => info!("agent link up"),
            LinkEvent::Down => warn!("agent link down — reconnecting"),
        }),
    };

    let agent = Agent::connect(ws_config(), agent_handlers)?;
    let cloud_asr = CloudAsr::new(
        capture_gate.ring_buffer(),
        agent as Arc<dyn cloud_asr::UploadAgent>,
        device_config.sample_rate,
    );
    *cloud_asr_slot.lock().unwrap() = Some(Arc::new(cloud_asr));

    let gate_for_mic = Arc::clone(&capture_gate);
    driver.open(Box::new(move |frame, status| {
        if let Err(e) = gate_for_mic.feed(frame, status) {
            warn!("capture feed error: {e}");
        }
    }))?;

    alert.play(AlertType::PowerOn)?;

    loop {
        capture_gate.tick();
        std::thread::sleep(Duration::from_millis(50));
    }
}
