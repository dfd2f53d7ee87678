//! C8 — blocking socket transport. Wraps a plain `TcpStream` or a
//! `native-tls` session behind one `Read + Write` surface, with a send-side
//! lock so frame writes from different callers (data, ping, close) never
//! interleave mid-frame on the wire.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;

use native_tls::{TlsConnector, TlsStream};

use crate::error::{CoreError, CoreResult};
use crate::ws::handshake::WsUri;

enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls(s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.flush(),
            Transport::Tls(s) => s.flush(),
        }
    }
}

/// A connected transport behind one lock shared by `send` and `recv_exact`.
/// TLS record framing isn't safely splittable across threads, so reads and
/// writes share the mutex; the client runtime keeps the read timeout short
/// (the heartbeat tick interval) so a blocked read never starves a pending
/// ping send for long.
pub struct Socket {
    send_lock: Mutex<Transport>,
}

impl Socket {
    /// Opens a TCP connection to `uri.host:uri.port` with `connect_timeout`,
    /// wrapping it in TLS when `uri.secure`.
    pub fn connect(uri: &WsUri, connect_timeout: Duration) -> CoreResult<Self> {
        let addr = format!("{}:{}", uri.host, uri.port);
        let mut last_err = None;
        let mut stream = None;
        for sock_addr in addr
            .to_socket_addrs()
            .map_err(|e| CoreError::Driver(e.to_string()))?
        {
            match TcpStream::connect_timeout(&sock_addr, connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let tcp = stream.ok_or_else(|| {
            CoreError::Driver(
                last_err.map(|e| e.to_string()).unwrap_or_else(|| "no addresses resolved".into()),
            )
        })?;
        tcp.set_nodelay(true).ok();

        let transport = if uri.secure {
            let connector = TlsConnector::new().map_err(|e| CoreError::Driver(e.to_string()))?;
            let tls = connector
                .connect(&uri.host, tcp)
                .map_err(|e| CoreError::Driver(e.to_string()))?;
            Transport::Tls(Box::new(tls))
        } else {
            Transport::Plain(tcp)
        };

        Ok(Self { send_lock: Mutex::new(transport) })
    }

    /// Sets the blocking read timeout. `recv_ext` relies on this to bound
    /// how long a single `read` call can stall.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> CoreResult<()> {
        let guard = self.send_lock.lock().unwrap();
        let result = match &*guard {
            Transport::Plain(s) => s.set_read_timeout(timeout),
            Transport::Tls(s) => s.get_ref().set_read_timeout(timeout),
        };
        result.map_err(CoreError::from)
    }

    /// Writes `data` atomically with respect to other `send` callers.
    pub fn send(&self, data: &[u8]) -> CoreResult<()> {
        let mut guard = self.send_lock.lock().unwrap();
        guard.write_all(data).map_err(|e| CoreError::SendError(e.to_string()))
    }

    /// Reads exactly `buf.len()` bytes, looping over short reads. Only the
    /// single owning worker thread calls this — the lock above guards
    /// writes only.
    pub fn recv_exact(&self, buf: &mut [u8]) -> CoreResult<()> {
        let mut guard = self.send_lock.lock().unwrap();
        guard.read_exact(buf).map_err(CoreError::from)
    }

    /// Reads and decodes exactly one server-to-client frame.
    pub fn recv_frame(&self) -> CoreResult<crate::ws::frame::Frame> {
        crate::ws::frame::recv_frame(&mut &*self)
    }

    pub fn shutdown(&self) {
        if let Transport::Plain(s) = &*self.send_lock.lock().unwrap() {
            let _ = s.shutdown(std::net::Shutdown::Both);
        }
    }
}

/// Lets `&Socket` stand in for the handshake/frame code's generic
/// `Read + Write` transport, serialized through the same lock as `send`.
impl Read for &Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.send_lock.lock().unwrap().read(buf)
    }
}

impl Write for &Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send_lock.lock().unwrap().write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.send_lock.lock().unwrap().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_to_closed_port_fails_fast() {
        let uri = WsUri { secure: false, host: "127.0.0.1".into(), port: 1, path: "/".into() };
        let result = Socket::connect(&uri, Duration::from_millis(200));
        assert!(result.is_err());
    }
}
