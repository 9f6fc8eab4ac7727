pub mod mock;
pub mod transport;

pub use mock::{MockHandle, MockTransport};
pub use transport::{SerialTransport, Transport};

use crate::protocol::codec;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Port not open: {0}")]
    NotOpen(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Communication timeout")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Exclusive owner of one serial connection.
///
/// One `exchange` is one framed write followed by one reply line, bounded
/// by the configured timeout. The caller serializes access (the manager
/// wraps each channel in a mutex); this type adds lazy reconnection with
/// capped exponential backoff so a dead port fails fast between attempts
/// instead of blocking every exchange on an open() that cannot succeed.
pub struct PortChannel {
    transport: Box<dyn Transport>,
    timeout: Duration,
    backoff_initial: Duration,
    backoff_max: Duration,
    backoff: Duration,
    retry_at: Option<Instant>,
}

impl PortChannel {
    pub fn new(
        transport: Box<dyn Transport>,
        timeout: Duration,
        backoff_initial: Duration,
        backoff_max: Duration,
    ) -> Self {
        Self {
            transport,
            timeout,
            backoff_initial,
            backoff_max,
            backoff: backoff_initial,
            retry_at: None,
        }
    }

    /// Sends one framed command body and returns the raw reply line.
    pub async fn exchange(&mut self, body: &str) -> Result<Vec<u8>> {
        self.ensure_open().await?;
        let frame = codec::build_frame(body);
        if let Err(e) = self.transport.send(&frame).await {
            self.drop_connection();
            return Err(e);
        }
        match self.transport.recv_line(self.timeout).await {
            Ok(line) => Ok(line),
            // A timeout leaves the connection up; the retry policy above
            // this layer decides whether to try again.
            Err(ChannelError::Timeout) => Err(ChannelError::Timeout),
            Err(e) => {
                self.drop_connection();
                Err(e)
            }
        }
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    async fn ensure_open(&mut self) -> Result<()> {
        if self.transport.is_open() {
            return Ok(());
        }
        if let Some(at) = self.retry_at {
            if Instant::now() < at {
                return Err(ChannelError::NotOpen(self.transport.describe()));
            }
        }
        match self.transport.open().await {
            Ok(()) => {
                log::info!("Opened {}", self.transport.describe());
                self.backoff = self.backoff_initial;
                self.retry_at = None;
                Ok(())
            }
            Err(e) => {
                log::warn!(
                    "Open failed for {} ({}); next attempt in {:?}",
                    self.transport.describe(),
                    e,
                    self.backoff
                );
                self.retry_at = Some(Instant::now() + self.backoff);
                self.backoff = (self.backoff * 2).min(self.backoff_max);
                Err(e)
            }
        }
    }

    fn drop_connection(&mut self) {
        log::warn!("Dropping connection to {}", self.transport.describe());
        self.transport.close();
    }
}
