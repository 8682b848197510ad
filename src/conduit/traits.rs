//! Conduit trait
//!
//! The boundary contract to the external transport is deliberately
//! narrow: sequential byte writes, sequential byte reads, and a closure
//! signal. Everything else (framing, correlation, state) is layered on
//! top by this crate.

use async_trait::async_trait;
use std::fmt;

use crate::error::Result;

/// A raw bidirectional byte stream
///
/// Implementations must tolerate one task reading while another writes.
/// The protocol driver guarantees that only a single task ever calls
/// [`read`](Conduit::read), and serializes calls to
/// [`write`](Conduit::write) behind its own lock, so implementations do
/// not need internal ordering beyond plain stream semantics.
#[async_trait]
pub trait Conduit: Send + Sync + fmt::Debug {
    /// Human-readable conduit name for logging
    fn name(&self) -> &str;

    /// Write bytes to the stream, returning the number written
    async fn write(&self, data: &[u8]) -> Result<usize>;

    /// Read available bytes into `buf`, blocking until data arrives.
    ///
    /// Returns `Ok(0)` if and only if the stream has closed; this is the
    /// closure signal the driver's receive loop acts on.
    async fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Whether the stream is still open
    async fn is_open(&self) -> bool;

    /// Close the stream and release resources
    async fn close(&self) -> Result<()>;
}
