//! Conduit abstraction
//!
//! A conduit is the raw bidirectional byte stream connecting the host to
//! the embedded container (serial line, TCP socket, stdio pipe). The
//! physical implementations live outside this crate; this module defines
//! the contract they must satisfy plus an in-memory implementation for
//! tests.

pub mod mock;
pub mod traits;

pub use mock::{MockConduit, MockConduitHandle};
pub use traits::Conduit;
