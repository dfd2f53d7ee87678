//! C10 — client runtime. One worker thread per client cycling through
//! `{INIT, CONNECT, RECEIVE, SHUTDOWN}`, reconnecting with jittered backoff
//! and running the heartbeat while connected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::WsConfig;
use crate::driver::LinkEvent;
use crate::error::{CoreError, CoreResult};
use crate::ws::frame::{self, Opcode};
use crate::ws::handshake::{self, WsUri};
use crate::ws::heartbeat::Heartbeat;
use crate::ws::netio::Socket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Connect,
    Receive,
    Shutdown,
}

pub struct WsHandlers {
    pub on_binary: Box<dyn Fn(Vec<u8>) + Send + Sync>,
    pub on_text: Box<dyn Fn(String) + Send + Sync>,
    pub on_link: Box<dyn Fn(LinkEvent) + Send + Sync>,
}

pub struct WsClient {
    socket: Mutex<Option<Arc<Socket>>>,
    shutdown: Arc<AtomicBool>,
    uri: WsUri,
}

impl WsClient {
    pub fn start(config: WsConfig, handlers: WsHandlers) -> CoreResult<Arc<Self>> {
        let uri = handshake::parse_uri(&config.uri)?;
        let client = Arc::new(Self {
            socket: Mutex::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
            uri,
        });

        let worker_client = Arc::clone(&client);
        std::thread::spawn(move || worker_loop(worker_client, config, handlers));

        Ok(client)
    }

    /// Sends a text frame; a no-op (returns `NotConnected`) while disconnected.
    pub fn send_text(&self, text: &str) -> CoreResult<()> {
        let guard = self.socket.lock().unwrap();
        let socket = guard.as_ref().ok_or(CoreError::NotConnected)?;
        let mut buf = Vec::new();
        frame::send_frame(&mut buf, Opcode::Text, text.as_bytes(), true, true)?;
        socket.send(&buf)
    }

    pub fn send_binary(&self, data: &[u8]) -> CoreResult<()> {
        let guard = self.socket.lock().unwrap();
        let socket = guard.as_ref().ok_or(CoreError::NotConnected)?;
        let mut buf = Vec::new();
        frame::send_frame(&mut buf, Opcode::Binary, data, true, true)?;
        socket.send(&buf)
    }

    /// Requests the worker to close the connection and stop reconnecting.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(socket) = self.socket.lock().unwrap().as_ref() {
            socket.shutdown();
        }
    }
}

/// `sleep = min(reconnect_wait_time, 1000ms + rand(0..=reconnect_wait_time + fail_cnt*1000))`
fn backoff_delay(reconnect_wait_time: Duration, fail_cnt: u32) -> Duration {
    let jitter_ceiling = reconnect_wait_time + Duration::from_millis(fail_cnt as u64 * 1000);
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ceiling.as_millis() as u64));
    (Duration::from_millis(1000) + jitter).min(reconnect_wait_time)
}

fn worker_loop(client: Arc<WsClient>, config: WsConfig, handlers: WsHandlers) {
    let mut state = State::Init;
    let mut fail_cnt: u32 = 0;
    let keep_alive = Duration::from_millis(config.keep_alive_time_ms);
    let connect_timeout = Duration::from_millis(config.handshake_conn_timeout_ms);
    let handshake_recv_timeout = Duration::from_millis(config.handshake_recv_timeout_ms);
    let reconnect_wait = Duration::from_millis(config.reconnect_wait_time_ms);

    loop {
        if client.shutdown.load(Ordering::Acquire) {
            state = State::Shutdown;
        }

        match state {
            State::Init => {
                state = State::Connect;
            }
            State::Shutdown => {
                *client.socket.lock().unwrap() = None;
                (handlers.on_link)(LinkEvent::Down);
                return;
            }
            State::Connect => {
                match connect_once(&client.uri, connect_timeout, handshake_recv_timeout) {
                    Ok(socket) => {
                        fail_cnt = 0;
                        *client.socket.lock().unwrap() = Some(Arc::new(socket));
                        (handlers.on_link)(LinkEvent::Up);
                        info!("websocket connected");
                        state = State::Receive;
                    }
                    Err(e) => {
                        fail_cnt = fail_cnt.saturating_add(1);
                        warn!("websocket connect failed (attempt {fail_cnt}): {e}");
                        let delay = backoff_delay(reconnect_wait, fail_cnt);
                        std::thread::sleep(delay);
                    }
                }
            }
            State::Receive => {
                let socket = client.socket.lock().unwrap().clone();
                let Some(socket) = socket else {
                    state = State::Connect;
                    continue;
                };
                match receive_until_disconnect(&socket, keep_alive, &client.shutdown, &handlers) {
                    DisconnectReason::PeerClosed | DisconnectReason::PongTimeout | DisconnectReason::Protocol => {
                        *client.socket.lock().unwrap() = None;
                        (handlers.on_link)(LinkEvent::Down);
                        state = State::Connect;
                    }
                    DisconnectReason::ShutdownRequested => {
                        state = State::Shutdown;
                    }
                }
            }
        }
    }
}

fn connect_once(
    uri: &WsUri,
    connect_timeout: Duration,
    handshake_recv_timeout: Duration,
) -> CoreResult<Socket> {
    let socket = Socket::connect(uri, connect_timeout)?;
    socket.set_read_timeout(Some(handshake_recv_timeout))?;
    handshake::perform_handshake(&mut &socket, uri)?;
    Ok(socket)
}

enum DisconnectReason {
    PeerClosed,
    PongTimeout,
    Protocol,
    ShutdownRequested,
}

fn receive_until_disconnect(
    socket: &Arc<Socket>,
    keep_alive: Duration,
    shutdown: &Arc<AtomicBool>,
    handlers: &WsHandlers,
) -> DisconnectReason {
    let mut hb = Heartbeat::new(keep_alive);
    let mut fragment_opcode: Option<Opcode> = None;
    let mut fragment_buf: Vec<u8> = Vec::new();

    loop {
        if shutdown.load(Ordering::Acquire) {
            let mut buf = Vec::new();
            let _ = frame::send_frame(&mut buf, Opcode::Close, &[], true, true);
            let _ = socket.send(&buf);
            return DisconnectReason::ShutdownRequested;
        }

        let tick = hb.next_wakeup().max(Duration::from_millis(10));
        if socket.set_read_timeout(Some(tick)).is_err() {
            return DisconnectReason::PeerClosed;
        }

        match socket.recv_frame() {
            Ok(f) => {
                hb.on_frame_received();
                match f.opcode {
                    Opcode::Ping => {
                        let mut buf = Vec::new();
                        let _ = frame::send_frame(&mut buf, Opcode::Pong, &f.payload, true, true);
                        let _ = socket.send(&buf);
                    }
                    Opcode::Pong => {}
                    Opcode::Close => {
                        let mut buf = Vec::new();
                        let _ = frame::send_frame(&mut buf, Opcode::Close, &[], true, true);
                        let _ = socket.send(&buf);
                        return DisconnectReason::PeerClosed;
                    }
                    Opcode::Text | Opcode::Binary => {
                        if f.fin {
                            deliver(handlers, f.opcode, f.payload);
                        } else {
                            fragment_opcode = Some(f.opcode);
                            fragment_buf = f.payload;
                        }
                    }
                    Opcode::Continuation => {
                        fragment_buf.extend_from_slice(&f.payload);
                        if f.fin {
                            if let Some(opcode) = fragment_opcode.take() {
                                let complete = std::mem::take(&mut fragment_buf);
                                deliver(handlers, opcode, complete);
                            }
                        }
                    }
                }
            }
            Err(CoreError::Timeout) => {
                if hb.pong_expired() {
                    debug!("pong timeout — declaring link dead");
                    return DisconnectReason::PongTimeout;
                }
                if hb.ping_due() {
                    let mut buf = Vec::new();
                    let _ = frame::send_frame(&mut buf, Opcode::Ping, &[], true, true);
                    if socket.send(&buf).is_err() {
                        return DisconnectReason::PeerClosed;
                    }
                    hb.ping_sent();
                }
            }
            Err(CoreError::Protocol(msg)) => {
                warn!("websocket protocol error: {msg}");
                return DisconnectReason::Protocol;
            }
            Err(_) => return DisconnectReason::PeerClosed,
        }
    }
}

fn deliver(handlers: &WsHandlers, opcode: Opcode, payload: Vec<u8>) {
    match opcode {
        Opcode::Text => {
            let text = String::from_utf8_lossy(&payload).into_owned();
            (handlers.on_text)(text);
        }
        Opcode::Binary => (handlers.on_binary)(payload),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_never_exceeds_reconnect_wait_time() {
        let wait = Duration::from_millis(5000);
        for fail_cnt in 0..20 {
            let delay = backoff_delay(wait, fail_cnt);
            assert!(delay <= wait);
        }
    }

    #[test]
    fn backoff_grows_with_failure_count_on_average() {
        let wait = Duration::from_millis(60_000);
        let low: u64 = (0..50).map(|_| backoff_delay(wait, 1).as_millis() as u64).sum();
        let high: u64 = (0..50).map(|_| backoff_delay(wait, 10).as_millis() as u64).sum();
        assert!(high >= low);
    }
}
