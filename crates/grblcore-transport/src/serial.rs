//! The serial transport itself.
//!
//! The underlying `serialport` handle is blocking, so all reading happens
//! on one dedicated OS thread per connection (`RealSerialPort` in
//! `src/communication/serial.rs` is driven the same way, from tokio tasks
//! that never themselves block on the handle).
//! Writes go through a `parking_lot::Mutex`-guarded clone of the handle so
//! the async side never blocks on the reader thread's read timeout.

use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use grblcore_types::error::TransportError;
use grblcore_types::{Error, Result};

use crate::framing::LineFramer;

#[derive(Debug, Clone)]
pub struct SerialTransportConfig {
    pub baud_rate: u32,
    /// Read timeout on the blocking reader thread. Short, so the thread
    /// notices a stop request promptly; unrelated to `response_timeout`.
    pub read_timeout_ms: u64,
}

impl Default for SerialTransportConfig {
    fn default() -> Self {
        Self {
            baud_rate: grblcore_protocol::GRBL_DEFAULT_BAUD_RATE,
            read_timeout_ms: 100,
        }
    }
}

/// What the reader thread forwards to the async world.
#[derive(Debug, Clone)]
pub enum InboundLine {
    Line(String),
    Disconnected,
}

/// Narrow capability CommandManager and StreamingEngine depend on,
/// breaking the cyclic manager references the source exhibits (see the
/// `StatusSink`/`CommandSender`/`StateReader` split called out for this
/// core).
#[async_trait]
pub trait Transport: Send + Sync {
    fn write_bytes(&self, buf: &[u8]) -> Result<()>;
    fn write_realtime_byte(&self, byte: u8) -> Result<()>;
    fn is_connected(&self) -> bool;
    async fn disconnect(&self) -> Result<()>;
}

struct Inner {
    write_port: Mutex<Box<dyn serialport::SerialPort>>,
    faulted: AtomicBool,
    connected: AtomicBool,
    stop_flag: Arc<AtomicBool>,
    reader_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

/// An open connection to a GRBL controller over a serial port.
pub struct SerialTransport {
    inner: Arc<Inner>,
    port_name: String,
}

impl SerialTransport {
    /// Opens `port_name` at the configured baud rate and spawns the
    /// dedicated reader thread. Returns the transport plus a channel of
    /// framed inbound lines.
    pub fn connect(
        port_name: &str,
        config: &SerialTransportConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InboundLine>)> {
        let write_port = serialport::new(port_name, config.baud_rate)
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .open()
            .map_err(|e| {
                Error::Transport(TransportError::Open {
                    port: port_name.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                })
            })?;

        let mut read_port = write_port.try_clone().map_err(|e| {
            Error::Transport(TransportError::Open {
                port: port_name.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let reader_stop = Arc::clone(&stop_flag);
        let reader_port_name = port_name.to_string();

        let reader_handle = std::thread::Builder::new()
            .name(format!("grblcore-reader-{port_name}"))
            .spawn(move || {
                let mut framer = LineFramer::new();
                let mut buf = [0u8; 256];
                loop {
                    if reader_stop.load(Ordering::Relaxed) {
                        debug!(port = %reader_port_name, "reader thread stopping on request");
                        break;
                    }
                    match read_port.read(&mut buf) {
                        Ok(0) => continue,
                        Ok(n) => {
                            for line in framer.feed(&buf[..n]) {
                                if tx.send(InboundLine::Line(line)).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(e) => {
                            warn!(port = %reader_port_name, error = %e, "serial read failed, ending inbound loop");
                            let _ = tx.send(InboundLine::Disconnected);
                            return;
                        }
                    }
                }
            })
            .expect("failed to spawn serial reader thread");

        info!(port = %port_name, baud = config.baud_rate, "serial transport connected");

        Ok((
            Self {
                inner: Arc::new(Inner {
                    write_port: Mutex::new(write_port),
                    faulted: AtomicBool::new(false),
                    connected: AtomicBool::new(true),
                    stop_flag,
                    reader_handle: Mutex::new(Some(reader_handle)),
                }),
                port_name: port_name.to_string(),
            },
            rx,
        ))
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn write_bytes(&self, buf: &[u8]) -> Result<()> {
        if self.inner.faulted.load(Ordering::Relaxed) {
            return Err(Error::Transport(TransportError::Faulted));
        }
        let mut port = self.inner.write_port.lock();
        if let Err(e) = port.write_all(buf).and_then(|_| port.flush()) {
            self.inner.faulted.store(true, Ordering::Relaxed);
            error!(error = %e, "serial write failed, transport faulted");
            return Err(Error::Transport(TransportError::Write(e)));
        }
        Ok(())
    }

    fn write_realtime_byte(&self, byte: u8) -> Result<()> {
        self.write_bytes(&[byte])
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed) && !self.inner.faulted.load(Ordering::Relaxed)
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.connected.store(false, Ordering::Relaxed);
        self.inner.stop_flag.store(true, Ordering::Relaxed);
        let handle = self.inner.reader_handle.lock().take();
        if let Some(handle) = handle {
            // The reader thread wakes on its own read timeout; join it off
            // the async executor so we never block a tokio worker here.
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
        info!(port = %self.port_name, "serial transport disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_matches_protocol_defaults() {
        let cfg = SerialTransportConfig::default();
        assert_eq!(cfg.baud_rate, 115_200);
    }
}
