//! C11 — agent adapter. Translates between the cloud-ASR upload state
//! machine (C5) and the WebSocket client (C10): outgoing audio and control
//! events become JSON text / binary frames; incoming frames become the
//! tagged `Message` union the rest of the pipeline reacts to.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cloud_asr::UploadAgent;
use crate::driver::LinkEvent;
use crate::ws::{WsClient, WsHandlers};

/// Tagged event union exchanged with the server. Audio payloads
/// (`AUDIO_DATA`, TTS playback bytes) travel as binary frames out-of-band,
/// correlated to their JSON event by `event_id`; everything else is JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "TEXT_ASR")]
    TextAsr { event_id: String, text: String },
    #[serde(rename = "AUDIO_START")]
    AudioStart { event_id: String },
    #[serde(rename = "AUDIO_STOP")]
    AudioStop { event_id: String },
    #[serde(rename = "TEXT_NLG_START")]
    TextNlgStart { event_id: String },
    #[serde(rename = "TEXT_NLG_DATA")]
    TextNlgData { event_id: String, text: String },
    #[serde(rename = "TEXT_NLG_STOP")]
    TextNlgStop { event_id: String },
    #[serde(rename = "EMOTION")]
    Emotion { event_id: String, emotion: String },
    #[serde(rename = "CHAT_BREAK")]
    ChatBreak { event_id: String },
    #[serde(rename = "SERVER_VAD")]
    ServerVad { event_id: String, active: bool },
    #[serde(rename = "END")]
    End { event_id: String },
}

/// Upcalls for events and for TTS audio bytes delivered on a binary frame.
pub struct AgentHandlers {
    pub on_message: Box<dyn Fn(Message) + Send + Sync>,
    pub on_audio: Box<dyn Fn(Vec<u8>) + Send + Sync>,
    pub on_link: Box<dyn Fn(LinkEvent) + Send + Sync>,
}

/// Binds the current upload session to the `event_id` every outgoing frame
/// of that session must carry so the server (and any later `AUDIO_DATA`
/// frame) can be correlated back to it.
struct Session {
    event_id: String,
}

pub struct Agent {
    ws: Arc<WsClient>,
    session: Mutex<Option<Session>>,
    event_seq: AtomicU64,
    /// Latched true for the duration of a chat turn — set when the device
    /// or the server opens one, cleared on `END` or on either side's
    /// barge-in (§4.11).
    is_chating: Arc<AtomicBool>,
}

/// Updates the chat latch for an incoming server event (§4.11): a reply
/// opens the turn, `END` or either side's barge-in closes it.
fn update_chating_latch(is_chating: &AtomicBool, msg: &Message) {
    match msg {
        Message::AudioStart { .. } | Message::TextNlgStart { .. } => {
            is_chating.store(true, Ordering::Release);
        }
        Message::End { .. } | Message::ChatBreak { .. } | Message::ServerVad { .. } => {
            is_chating.store(false, Ordering::Release);
        }
        _ => {}
    }
}

impl Agent {
    pub fn new(ws: Arc<WsClient>) -> Arc<Self> {
        Self::with_chating_flag(ws, Arc::new(AtomicBool::new(false)))
    }

    fn with_chating_flag(ws: Arc<WsClient>, is_chating: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(Self { ws, session: Mutex::new(None), event_seq: AtomicU64::new(0), is_chating })
    }

    /// Wraps `WsClient::start` with the JSON/binary demultiplexing this
    /// adapter needs, forwarding parsed events and raw TTS audio to the
    /// caller's handlers.
    pub fn connect(config: crate::config::WsConfig, handlers: AgentHandlers) -> crate::error::CoreResult<Arc<Self>> {
        let handlers = Arc::new(handlers);
        let is_chating = Arc::new(AtomicBool::new(false));

        let text_handlers = Arc::clone(&handlers);
        let is_chating_for_text = Arc::clone(&is_chating);
        let bin_handlers = Arc::clone(&handlers);
        let link_handlers = Arc::clone(&handlers);

        let ws_handlers = WsHandlers {
            on_text: Box::new(move |text| match serde_json::from_str::<Message>(&text) {
                Ok(msg) => {
                    update_chating_latch(&is_chating_for_text, &msg);
                    (text_handlers.on_message)(msg)
                }
                Err(e) => warn!("unrecognized agent event ({e}): {text}"),
            }),
            on_binary: Box::new(move |bytes| (bin_handlers.on_audio)(bytes)),
            on_link: Box::new(move |event| (link_handlers.on_link)(event)),
        };

        let ws = WsClient::start(config, ws_handlers)?;
        Ok(Self::with_chating_flag(ws, is_chating))
    }

    /// Whether a chat turn is currently open (§4.11's `is_chating`).
    pub fn is_chating(&self) -> bool {
        self.is_chating.load(Ordering::Acquire)
    }

    fn new_event_id(&self) -> String {
        let seq = self.event_seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{seq}", Uuid::new_v4())
    }

    fn send_json(&self, msg: &Message) {
        match serde_json::to_string(msg) {
            Ok(text) => {
                if let Err(e) = self.ws.send_text(&text) {
                    debug!("dropped agent event, link down: {e}");
                }
            }
            Err(e) => warn!("failed to encode agent event: {e}"),
        }
    }
}

impl UploadAgent for Agent {
    fn upload_start(&self, new_session: bool) -> bool {
        let event_id = self.new_event_id();
        if new_session || self.session.lock().unwrap().is_none() {
            *self.session.lock().unwrap() = Some(Session { event_id: event_id.clone() });
        }
        self.is_chating.store(true, Ordering::Release);
        self.send_json(&Message::AudioStart { event_id });
        true
    }

    fn upload_data(&self, bytes: &[u8]) {
        if let Err(e) = self.ws.send_binary(bytes) {
            debug!("dropped audio chunk, link down: {e}");
        }
    }

    fn upload_stop(&self) {
        let event_id = self
            .session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.event_id.clone())
            .unwrap_or_else(|| self.new_event_id());
        self.send_json(&Message::AudioStop { event_id });
    }

    fn chat_interrupt(&self) {
        let event_id = self
            .session
            .lock()
            .unwrap()
            .take()
            .map(|s| s.event_id)
            .unwrap_or_else(|| self.new_event_id());
        self.is_chating.store(false, Ordering::Release);
        self.send_json(&Message::ChatBreak { event_id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips_through_json_tag() {
        let msg = Message::TextNlgData { event_id: "abc".into(), text: "hello".into() };
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains("TEXT_NLG_DATA"));
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        matches!(decoded, Message::TextNlgData { .. });
    }

    #[test]
    fn chating_latch_opens_on_reply_and_closes_on_end() {
        let flag = AtomicBool::new(false);
        update_chating_latch(&flag, &Message::AudioStart { event_id: "e1".into() });
        assert!(flag.load(Ordering::Acquire));
        update_chating_latch(&flag, &Message::End { event_id: "e1".into() });
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn chating_latch_closes_on_either_sides_barge_in() {
        let flag = AtomicBool::new(true);
        update_chating_latch(&flag, &Message::ChatBreak { event_id: "e1".into() });
        assert!(!flag.load(Ordering::Acquire));

        flag.store(true, Ordering::Release);
        update_chating_latch(&flag, &Message::ServerVad { event_id: "e1".into(), active: true });
        assert!(!flag.load(Ordering::Acquire));
    }
}
