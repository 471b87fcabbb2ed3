//! Serial link to the lantern
//!
//! Opens the port at the firmware's fixed rate and runs one reader thread
//! that feeds raw chunks through the line codec and forwards every decoded
//! object over an mpsc channel. The read timeout doubles as the poll tick for
//! the stop flag, so teardown never waits on a stuck read.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::constants::serial;
use crate::wire::LineCodec;

pub struct SerialLink {
    port_name: String,
    writer: Box<dyn serialport::SerialPort>,
    keep_reading: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SerialLink {
    /// Open the port and start the reader thread
    ///
    /// Decoded inbound objects arrive on `tx` until the link is shut down or
    /// the device goes away.
    pub fn open(port_name: &str, tx: Sender<Value>) -> Result<Self> {
        let writer = serialport::new(port_name, serial::BAUD_RATE)
            .timeout(Duration::from_millis(serial::READ_POLL_MS))
            .open()
            .context(format!("Failed to open serial port {port_name}"))?;
        Self::from_port(port_name, writer, tx)
    }

    /// Wrap an already opened port: clone off the reader half, start the loop
    pub fn from_port(
        port_name: &str,
        writer: Box<dyn serialport::SerialPort>,
        tx: Sender<Value>,
    ) -> Result<Self> {
        let reader_port = writer
            .try_clone()
            .context("Failed to clone serial port for reader")?;

        let keep_reading = Arc::new(AtomicBool::new(true));
        let flag = keep_reading.clone();
        let reader = thread::spawn(move || run_reader(reader_port, flag, tx));

        info!(port = %port_name, baud = serial::BAUD_RATE, "Opened serial link");
        Ok(Self {
            port_name: port_name.to_string(),
            writer,
            keep_reading,
            reader: Some(reader),
        })
    }

    /// Write one newline-terminated JSON frame
    ///
    /// Failures are reported, not fatal; the caller decides whether the
    /// session is still worth keeping.
    pub fn send_frame<T: Serialize>(&mut self, payload: &T) -> Result<()> {
        let mut frame =
            serde_json::to_string(payload).context("Failed to serialize outgoing frame")?;
        debug!(frame = %frame, "send");
        frame.push('\n');
        self.writer
            .write_all(frame.as_bytes())
            .context("Failed to write serial frame")?;
        self.writer
            .flush()
            .context("Failed to flush serial port")?;
        Ok(())
    }

    /// Tear the link down: stop the read loop, then close writer and port
    ///
    /// Each step is guarded on its own; the link always ends closed.
    pub fn shutdown(self) {
        let Self {
            port_name,
            writer,
            keep_reading,
            reader,
        } = self;

        keep_reading.store(false, Ordering::SeqCst);
        if let Some(handle) = reader {
            if handle.join().is_err() {
                warn!(port = %port_name, "Serial reader thread panicked during shutdown");
            }
        }
        drop(writer);
        info!(port = %port_name, "Serial link closed");
    }
}

/// Enumerate host serial ports; empty when there are none or the probe fails
pub fn available_ports() -> Vec<serialport::SerialPortInfo> {
    match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!(error = %e, "Serial port enumeration failed");
            Vec::new()
        }
    }
}

/// Reader loop: poll, decode, forward
///
/// The stop flag is checked before every read; a timeout is just the poll
/// tick. EOF, a read error, or a closed channel ends the loop silently and
/// the session counts as torn down.
fn run_reader<R: Read>(mut reader: R, keep_reading: Arc<AtomicBool>, tx: Sender<Value>) {
    let mut codec = LineCodec::new();
    let mut buf = [0u8; 512];

    while keep_reading.load(Ordering::SeqCst) {
        match reader.read(&mut buf) {
            Ok(0) => {
                debug!(pending = %codec.pending(), "Serial stream ended");
                break;
            }
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                for value in codec.feed(&text) {
                    if tx.send(value).is_err() {
                        return;
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                debug!(error = %e, "Serial read failed, ending loop");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::mpsc;

    /// Read impl that only ever times out, like an idle port
    struct IdlePort;

    impl Read for IdlePort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(5));
            Err(std::io::Error::from(std::io::ErrorKind::TimedOut))
        }
    }

    /// Read impl that emits the same line forever
    struct ChattyPort;

    impl Read for ChattyPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let line = b"{\"status\":\"tick\"}\n";
            buf[..line.len()].copy_from_slice(line);
            Ok(line.len())
        }
    }

    #[test]
    fn test_reader_decodes_and_forwards_then_ends_at_eof() {
        let (tx, rx) = mpsc::channel();
        let flag = Arc::new(AtomicBool::new(true));
        let data = Cursor::new(b"{\"mode\":\"fade\"}\n{\"ack\":1}{\"ok\":true}\n".to_vec());

        let handle = thread::spawn({
            let flag = flag.clone();
            move || run_reader(data, flag, tx)
        });

        assert_eq!(rx.recv().unwrap(), json!({"mode": "fade"}));
        assert_eq!(rx.recv().unwrap(), json!({"ack": 1}));
        assert_eq!(rx.recv().unwrap(), json!({"ok": true}));

        // Cursor hits EOF, loop ends on its own with the flag still set
        handle.join().unwrap();
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_reader_stops_promptly_when_flag_cleared() {
        let (tx, _rx) = mpsc::channel();
        let flag = Arc::new(AtomicBool::new(true));

        let handle = thread::spawn({
            let flag = flag.clone();
            move || run_reader(IdlePort, flag, tx)
        });

        // Let it spin on timeouts, then cancel; join hangs if the flag
        // check is broken
        thread::sleep(Duration::from_millis(25));
        flag.store(false, Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn test_reader_exits_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel();
        let flag = Arc::new(AtomicBool::new(true));

        let handle = thread::spawn({
            let flag = flag.clone();
            move || run_reader(ChattyPort, flag, tx)
        });

        assert_eq!(rx.recv().unwrap(), json!({"status": "tick"}));
        drop(rx);
        handle.join().unwrap();
    }

    /// Read impl that hands out one fixed chunk per call, then EOF
    struct ChunkedPort {
        chunks: Vec<&'static [u8]>,
        next: usize,
    }

    impl Read for ChunkedPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let Some(chunk) = self.chunks.get(self.next) else {
                return Ok(0);
            };
            self.next += 1;
            buf[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn test_reader_survives_fragmented_chunks() {
        let (tx, rx) = mpsc::channel();
        let flag = Arc::new(AtomicBool::new(true));
        let data = ChunkedPort {
            chunks: vec![
                b"{\"solid_bright\":0.5}\n{\"fade",
                b"_min\":0.2}",
                b"\n",
            ],
            next: 0,
        };

        let handle = thread::spawn({
            let flag = flag.clone();
            move || run_reader(data, flag, tx)
        });

        assert_eq!(rx.recv().unwrap(), json!({"solid_bright": 0.5}));
        assert_eq!(rx.recv().unwrap(), json!({"fade_min": 0.2}));
        handle.join().unwrap();
    }
}
