//! Type codec registry
//!
//! The embedded side exchanges object state and configuration as opaque
//! byte blocks; a [`TypeCodec`] gives those blocks meaning on the host by
//! converting them to and from JSON values. The [`CodecRegistry`] maps a
//! numeric object type id to its codec. Types without a registered codec
//! are skipped during container sync and surface as
//! [`LinkError::UnknownType`] when addressed directly.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::{LinkError, Result};

/// Host-side value conversion for one object type
pub trait TypeCodec: Send + Sync {
    /// Numeric type id this codec serves
    fn type_id(&self) -> u16;

    /// Short name for logging and diagnostics
    fn name(&self) -> &str;

    /// Decode a state block read from the device
    fn decode_state(&self, data: &[u8]) -> Result<Value>;

    /// Decode a construction block; state layout by default
    fn decode_config(&self, data: &[u8]) -> Result<Value> {
        self.decode_state(data)
    }

    /// Encode a construction value into the device's byte layout
    fn encode_config(&self, value: &Value) -> Result<Vec<u8>>;

    /// Encode a write, optionally with a mask value selecting which
    /// bits to change; returns the value bytes and mask bytes
    fn encode_write(&self, value: &Value, mask: Option<&Value>)
        -> Result<(Vec<u8>, Option<Vec<u8>>)>;
}

impl std::fmt::Debug for dyn TypeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeCodec")
            .field("type_id", &self.type_id())
            .field("name", &self.name())
            .finish()
    }
}

/// Thread-safe map of object type id to codec
#[derive(Default)]
pub struct CodecRegistry {
    codecs: DashMap<u16, Arc<dyn TypeCodec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a codec, replacing any previous codec for the same type
    pub fn register(&self, codec: Arc<dyn TypeCodec>) {
        debug!(type_id = codec.type_id(), codec = codec.name(), "codec registered");
        self.codecs.insert(codec.type_id(), codec);
    }

    /// Look up the codec for a type id
    pub fn lookup(&self, type_id: u16) -> Result<Arc<dyn TypeCodec>> {
        self.codecs
            .get(&type_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LinkError::UnknownType(type_id))
    }

    pub fn contains(&self, type_id: u16) -> bool {
        self.codecs.contains_key(&type_id)
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.codecs.len())
            .finish()
    }
}

/// Pass-through codec: state and config are JSON arrays of byte values
///
/// Useful for types whose layout the host does not model, and as the
/// baseline codec in tests.
pub struct RawCodec {
    type_id: u16,
}

impl RawCodec {
    pub fn new(type_id: u16) -> Self {
        Self { type_id }
    }

    fn bytes_from_value(value: &Value) -> Result<Vec<u8>> {
        let Value::Array(items) = value else {
            return Err(LinkError::codec("raw codec expects an array of bytes"));
        };
        items
            .iter()
            .map(|item| {
                item.as_u64()
                    .filter(|n| *n <= 0xFF)
                    .map(|n| n as u8)
                    .ok_or_else(|| {
                        LinkError::codec(format!("raw codec array item {item} is not a byte"))
                    })
            })
            .collect()
    }
}

impl TypeCodec for RawCodec {
    fn type_id(&self) -> u16 {
        self.type_id
    }

    fn name(&self) -> &str {
        "raw"
    }

    fn decode_state(&self, data: &[u8]) -> Result<Value> {
        Ok(Value::Array(
            data.iter().map(|b| Value::from(*b)).collect(),
        ))
    }

    fn encode_config(&self, value: &Value) -> Result<Vec<u8>> {
        Self::bytes_from_value(value)
    }

    fn encode_write(
        &self,
        value: &Value,
        mask: Option<&Value>,
    ) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let bytes = Self::bytes_from_value(value)?;
        let mask_bytes = mask.map(Self::bytes_from_value).transpose()?;
        Ok((bytes, mask_bytes))
    }
}
