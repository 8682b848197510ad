//! Object adapters
//!
//! An [`ObjectAdapter`] is the host-side face of one remote object: it
//! pairs the object's id chain with its type codec and the shared
//! protocol driver, exposing typed read/write plus subscription to
//! state updates pushed by the device.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::events::{EventSource, SubscriberId};
use crate::protocol::ProtocolDriver;
use crate::registry::TypeCodec;
use crate::wire::IdChain;

/// A decoded state change for one object
#[derive(Debug, Clone)]
pub struct ObjectUpdate {
    pub chain: IdChain,
    pub state: Value,
    pub at: DateTime<Utc>,
}

/// Typed host-side proxy for a remote object
pub struct ObjectAdapter {
    chain: IdChain,
    codec: Arc<dyn TypeCodec>,
    driver: ProtocolDriver,
    system: bool,
    subscribers: EventSource<ObjectUpdate>,
}

impl std::fmt::Debug for ObjectAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectAdapter")
            .field("chain", &self.chain.to_string())
            .field("type_id", &self.codec.type_id())
            .field("system", &self.system)
            .finish()
    }
}

impl ObjectAdapter {
    pub fn new(
        driver: ProtocolDriver,
        codec: Arc<dyn TypeCodec>,
        chain: IdChain,
        system: bool,
    ) -> Self {
        Self {
            chain,
            codec,
            driver,
            system,
            subscribers: EventSource::new(),
        }
    }

    pub fn chain(&self) -> &IdChain {
        &self.chain
    }

    pub fn type_id(&self) -> u16 {
        self.codec.type_id()
    }

    pub fn is_system(&self) -> bool {
        self.system
    }

    /// Read and decode the object's current state
    pub async fn read(&self) -> Result<Value> {
        let data = if self.system {
            self.driver.read_system_object(&self.chain).await?
        } else {
            self.driver.read_object(&self.chain).await?
        };
        self.codec.decode_state(&data)
    }

    /// Write the object's state; a mask value restricts which bits change.
    ///
    /// Returns the state as the device holds it after the write, which
    /// for a masked write includes the untouched bits.
    pub async fn write(&self, value: &Value, mask: Option<&Value>) -> Result<Value> {
        let (bytes, mask_bytes) = self.codec.encode_write(value, mask)?;
        let written = if self.system {
            self.driver
                .write_system_object(&self.chain, &bytes, mask_bytes.as_deref())
                .await?
        } else {
            self.driver
                .write_object(&self.chain, &bytes, mask_bytes.as_deref())
                .await?
        };
        let state = self.codec.decode_state(&written)?;
        self.notify(state.clone());
        Ok(state)
    }

    /// Decode a device-pushed state payload and notify subscribers
    pub fn apply_update(&self, payload: &[u8]) -> Result<Value> {
        let state = self.codec.decode_state(payload)?;
        debug!(chain = %self.chain, "object state update");
        self.notify(state.clone());
        Ok(state)
    }

    /// Register a listener for state updates on this object
    pub fn subscribe<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&ObjectUpdate) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.unsubscribe(id)
    }

    /// Drop every subscription; called when the object leaves its container
    pub fn clear_subscriptions(&self) {
        self.subscribers.clear()
    }

    fn notify(&self, state: Value) {
        self.subscribers.fire(&ObjectUpdate {
            chain: self.chain.clone(),
            state,
            at: Utc::now(),
        });
    }
}
