//! Scripted transport used by the integration tests to emulate a module
//! without hardware: queue replies, timeouts and faults, then inspect the
//! frames the engine actually put on the wire.

use super::{ChannelError, Result, Transport};
use crate::protocol::codec;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug)]
enum Step {
    Reply(Vec<u8>),
    Timeout,
    Disconnect,
}

#[derive(Debug, Default)]
struct Inner {
    script: VecDeque<Step>,
    default_reply: Option<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    open: bool,
    failing_opens: u32,
    open_attempts: u32,
}

/// Test-side handle onto a [`MockTransport`] that has been moved into the
/// engine. Cloneable; all clones share the script and the sent-frame log.
#[derive(Clone, Default)]
pub struct MockHandle {
    inner: Arc<Mutex<Inner>>,
}

impl MockHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues a raw reply frame.
    pub fn push_reply(&self, frame: Vec<u8>) {
        self.lock().script.push_back(Step::Reply(frame));
    }

    /// Queues a reply built from a body the way the module frames it.
    pub fn push_body(&self, body: &str) {
        self.push_reply(codec::build_frame(body));
    }

    /// Queues one exchange that never answers.
    pub fn push_timeout(&self) {
        self.lock().script.push_back(Step::Timeout);
    }

    /// Queues one exchange that kills the connection mid-read.
    pub fn push_disconnect(&self) {
        self.lock().script.push_back(Step::Disconnect);
    }

    /// Reply body used whenever the script queue is empty.
    pub fn set_default_body(&self, body: &str) {
        self.lock().default_reply = Some(codec::build_frame(body));
    }

    pub fn clear_default(&self) {
        self.lock().default_reply = None;
    }

    /// Makes the next `n` open attempts fail.
    pub fn fail_opens(&self, n: u32) {
        self.lock().failing_opens = n;
    }

    pub fn open_attempts(&self) -> u32 {
        self.lock().open_attempts
    }

    /// Every frame sent so far, raw.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Command bodies sent so far, with the framing stripped.
    pub fn sent_bodies(&self) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .filter_map(|frame| {
                let etx = frame.iter().position(|&b| b == codec::ETX)?;
                std::str::from_utf8(frame.get(1..etx)?).ok().map(String::from)
            })
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.lock().sent.len()
    }
}

pub struct MockTransport {
    shared: MockHandle,
    name: String,
}

impl MockTransport {
    /// Creates a transport (starts open) and the handle to script it.
    pub fn new(name: impl Into<String>) -> (Self, MockHandle) {
        let handle = MockHandle::default();
        handle.lock().open = true;
        (
            Self {
                shared: handle.clone(),
                name: name.into(),
            },
            handle,
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn is_open(&self) -> bool {
        self.shared.lock().open
    }

    async fn open(&mut self) -> Result<()> {
        let mut inner = self.shared.lock();
        inner.open_attempts += 1;
        if inner.failing_opens > 0 {
            inner.failing_opens -= 1;
            return Err(ChannelError::ConnectionFailed(format!(
                "{}: scripted open failure",
                self.name
            )));
        }
        inner.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.shared.lock().open = false;
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut inner = self.shared.lock();
        if !inner.open {
            return Err(ChannelError::NotOpen(self.name.clone()));
        }
        inner.sent.push(data.to_vec());
        Ok(())
    }

    async fn recv_line(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let step = {
            let mut inner = self.shared.lock();
            match inner.script.pop_front() {
                Some(step) => step,
                None => match &inner.default_reply {
                    Some(frame) => Step::Reply(frame.clone()),
                    None => Step::Timeout,
                },
            }
        };
        match step {
            Step::Reply(frame) => Ok(frame),
            Step::Timeout => {
                tokio::time::sleep(timeout).await;
                Err(ChannelError::Timeout)
            }
            Step::Disconnect => {
                self.shared.lock().open = false;
                Err(ChannelError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "scripted disconnect",
                )))
            }
        }
    }

    fn describe(&self) -> String {
        format!("mock:{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_sent_bodies() {
        let (mut transport, handle) = MockTransport::new("m0");
        handle.push_body("hon");
        transport.send(&codec::build_frame("HON")).await.unwrap();
        let line = transport.recv_line(Duration::from_millis(10)).await.unwrap();
        assert_eq!(line, codec::build_frame("hon"));
        assert_eq!(handle.sent_bodies(), vec!["HON".to_string()]);
    }

    #[tokio::test]
    async fn empty_script_times_out() {
        let (mut transport, _handle) = MockTransport::new("m0");
        let err = transport
            .recv_line(Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Timeout));
    }
}
