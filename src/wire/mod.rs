//! Wire format handling
//!
//! The embedded protocol is textual on the wire: every payload byte is a
//! two-character hex pair, free-text annotations ride between pairs in
//! square brackets, and a newline terminates one frame. Object addresses
//! travel as identifier chains with a per-byte continuation bit.

pub mod chain;
pub mod hex;

pub use chain::IdChain;
pub use hex::{WireCodec, WireFrame};
