//! Mock conduit for testing
//!
//! A channel-backed conduit pair: the [`MockConduit`] side is handed to
//! the protocol driver, the [`MockConduitHandle`] side plays the embedded
//! device in tests (inspect written bytes, inject incoming bytes, close
//! the stream).

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::debug;

use super::traits::Conduit;
use crate::error::{LinkError, Result};

/// Host-facing half of a mock byte stream
pub struct MockConduit {
    name: String,
    open: Arc<AtomicBool>,
    closed: Arc<Notify>,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    /// Bytes from an injected chunk that did not fit the caller's buffer
    leftover: std::sync::Mutex<Vec<u8>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

/// Test-facing half of a mock byte stream
pub struct MockConduitHandle {
    open: Arc<AtomicBool>,
    closed: Arc<Notify>,
    to_host: mpsc::UnboundedSender<Vec<u8>>,
    from_host: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MockConduit {
    /// Create a connected conduit/handle pair
    pub fn pair(name: impl Into<String>) -> (MockConduit, MockConduitHandle) {
        let (to_host, inbound) = mpsc::unbounded_channel();
        let (outbound, from_host) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let closed = Arc::new(Notify::new());

        let conduit = MockConduit {
            name: name.into(),
            open: Arc::clone(&open),
            closed: Arc::clone(&closed),
            inbound: Mutex::new(inbound),
            leftover: std::sync::Mutex::new(Vec::new()),
            outbound,
        };
        let handle = MockConduitHandle {
            open,
            closed,
            to_host,
            from_host: Mutex::new(from_host),
        };
        (conduit, handle)
    }

    fn take_leftover(&self, buf: &mut [u8]) -> usize {
        let mut leftover = self.leftover.lock().expect("leftover lock poisoned");
        if leftover.is_empty() {
            return 0;
        }
        let n = leftover.len().min(buf.len());
        buf[..n].copy_from_slice(&leftover[..n]);
        leftover.drain(..n);
        n
    }

    fn stash_remainder(&self, data: &[u8]) {
        if !data.is_empty() {
            self.leftover
                .lock()
                .expect("leftover lock poisoned")
                .extend_from_slice(data);
        }
    }
}

impl std::fmt::Debug for MockConduit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConduit")
            .field("name", &self.name)
            .field("open", &self.open.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl Conduit for MockConduit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(LinkError::disconnected("mock conduit closed"));
        }
        self.outbound
            .send(data.to_vec())
            .map_err(|_| LinkError::disconnected("mock conduit peer dropped"))?;
        debug!(conduit = %self.name, bytes = data.len(), "mock conduit wrote");
        Ok(data.len())
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let n = self.take_leftover(buf);
        if n > 0 {
            return Ok(n);
        }
        if !self.open.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            chunk = inbound.recv() => match chunk {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    self.stash_remainder(&chunk[n..]);
                    Ok(n)
                }
                // Sender dropped: stream closed
                None => Ok(0),
            },
            _ = self.closed.notified() => Ok(0),
        }
    }

    async fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.closed.notify_waiters();
        Ok(())
    }
}

impl MockConduitHandle {
    /// Push bytes toward the host side
    pub fn inject(&self, data: impl Into<Vec<u8>>) {
        // Ignore send failures: the host half may already be gone
        let _ = self.to_host.send(data.into());
    }

    /// Push a full wire-text line toward the host side
    pub fn inject_line(&self, line: &str) {
        self.inject(line.as_bytes().to_vec());
    }

    /// Await the next chunk written by the host, if any
    pub async fn next_write(&self) -> Option<Vec<u8>> {
        self.from_host.lock().await.recv().await
    }

    /// Signal stream closure to the host side
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closed.notify_waiters();
    }

    /// Whether the host has closed its side
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_reaches_handle() {
        let (conduit, handle) = MockConduit::pair("test");
        conduit.write(b"01 02 \n").await.unwrap();
        assert_eq!(handle.next_write().await.unwrap(), b"01 02 \n");
    }

    #[tokio::test]
    async fn test_injected_bytes_are_read() {
        let (conduit, handle) = MockConduit::pair("test");
        handle.inject(b"AB".to_vec());

        let mut buf = [0u8; 16];
        let n = conduit.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"AB");
    }

    #[tokio::test]
    async fn test_short_buffer_keeps_remainder() {
        let (conduit, handle) = MockConduit::pair("test");
        handle.inject(b"ABCD".to_vec());

        let mut buf = [0u8; 2];
        let n = conduit.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"AB");
        let n = conduit.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"CD");
    }

    #[tokio::test]
    async fn test_close_signals_eof() {
        let (conduit, handle) = MockConduit::pair("test");
        handle.close();

        let mut buf = [0u8; 4];
        assert_eq!(conduit.read(&mut buf).await.unwrap(), 0);
        assert!(conduit.write(b"x").await.is_err());
    }
}
