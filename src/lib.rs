//! boxlink: host-side connector for embedded object containers
//!
//! Talks to a microcontroller that exposes its behavior as a tree of
//! typed objects behind a byte-stream conduit. The crate layers, bottom
//! up:
//!
//! - [`conduit`]: the raw byte-stream boundary and a mock for tests
//! - [`wire`]: hex-pair text framing with annotations, and id chains
//! - [`protocol`]: command encoding and the FIFO-correlating driver
//! - [`registry`] / [`object`]: typed codecs and per-object adapters
//! - [`container`]: the reconciling mirror of the device's object tree
//!
//! # Example
//!
//! ```no_run
//! use boxlink::{
//!     CodecRegistry, Container, DriverConfig, IdChain, ProtocolDriver, RawCodec,
//! };
//! use std::sync::Arc;
//!
//! # async fn run(conduit: Arc<dyn boxlink::Conduit>) -> boxlink::Result<()> {
//! let driver = ProtocolDriver::connect(conduit, DriverConfig::default())?;
//!
//! let registry = Arc::new(CodecRegistry::new());
//! registry.register(Arc::new(RawCodec::new(6)));
//!
//! let container = Container::new(driver, registry, IdChain::root());
//! container.sync().await?;
//!
//! for chain in container.chains() {
//!     println!("{chain}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod conduit;
pub mod config;
pub mod container;
pub mod error;
pub mod events;
pub mod object;
pub mod protocol;
pub mod registry;
pub mod wire;

pub use conduit::{Conduit, MockConduit, MockConduitHandle};
pub use config::DriverConfig;
pub use container::{Container, ContainerEvent, SyncState};
pub use error::{LinkError, Result};
pub use events::{EventSource, SubscriberId};
pub use object::{ObjectAdapter, ObjectUpdate};
pub use protocol::{
    CommandStatus, DriverStats, LinkState, ObjectDefinition, ObjectEvent, Opcode, ProfileId,
    ProtocolDriver, Response,
};
pub use registry::{CodecRegistry, RawCodec, TypeCodec};
pub use wire::{IdChain, WireCodec, WireFrame};
