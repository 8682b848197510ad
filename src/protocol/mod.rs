//! Protocol engine
//!
//! Command encoding/decoding and the asynchronous driver that issues
//! commands over a conduit, correlates responses positionally, and
//! dispatches unsolicited events.

pub mod commands;
pub mod driver;
pub mod stats;

pub use commands::{CommandStatus, ObjectDefinition, ObjectEvent, Opcode, ProfileId, Response};
pub use driver::{LinkState, ProtocolDriver};
pub use stats::DriverStats;
