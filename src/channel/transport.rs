use super::{ChannelError, Result};
use crate::protocol::codec;
use async_trait::async_trait;
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;

// Granularity of the async polling read over the blocking serial handle.
const POLL_SLICE: Duration = Duration::from_millis(10);

/// Byte transport under a [`super::PortChannel`]: the real serial port in
/// production, a scripted mock in tests.
#[async_trait]
pub trait Transport: Send {
    fn is_open(&self) -> bool;
    async fn open(&mut self) -> Result<()>;
    fn close(&mut self);
    async fn send(&mut self, data: &[u8]) -> Result<()>;
    /// Receives bytes until a line terminator, bounded by `timeout`.
    async fn recv_line(&mut self, timeout: Duration) -> Result<Vec<u8>>;
    fn describe(&self) -> String;
}

/// Serial link to one HV module. The module speaks 8 data bits, even
/// parity, one stop bit; baud comes from configuration.
pub struct SerialTransport {
    path: String,
    baud: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
            port: None,
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn open(&mut self) -> Result<()> {
        let port = serialport::new(&self.path, self.baud)
            .parity(serialport::Parity::Even)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| ChannelError::ConnectionFailed(format!("{}: {}", self.path, e)))?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ChannelError::NotOpen(self.path.clone()))?;
        // Drop any stale reply bytes before starting a new exchange; the
        // line is half-duplex and a timed-out reply may arrive late.
        port.clear(serialport::ClearBuffer::Input)?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    async fn recv_line(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ChannelError::NotOpen(self.path.clone()))?;

        let read_line = async {
            let mut line = Vec::new();
            loop {
                match port.bytes_to_read() {
                    Ok(0) => tokio::time::sleep(POLL_SLICE).await,
                    Ok(_) => {
                        let mut buf = [0u8; 256];
                        match port.read(&mut buf) {
                            Ok(0) => tokio::time::sleep(POLL_SLICE).await,
                            Ok(n) => {
                                for &byte in &buf[..n] {
                                    line.push(byte);
                                    if byte == codec::CR || byte == b'\n' {
                                        return Ok(line);
                                    }
                                }
                            }
                            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                            Err(e) => return Err(ChannelError::Io(e)),
                        }
                    }
                    Err(e) => return Err(ChannelError::Serial(e)),
                }
            }
        };

        tokio::time::timeout(timeout, read_line)
            .await
            .map_err(|_| ChannelError::Timeout)?
    }

    fn describe(&self) -> String {
        format!("{} @ {} 8E1", self.path, self.baud)
    }
}
