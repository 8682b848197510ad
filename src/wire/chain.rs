//! Identifier chains
//!
//! An identifier chain locates an object inside the container tree: an
//! ordered sequence of slot indices, one per nesting level. On the wire
//! each element is a single byte whose low 7 bits hold the slot value and
//! whose top bit flags that more elements follow; decoding stops at the
//! first byte with the continuation bit clear.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LinkError, Result};

/// Highest representable chain element value
pub const MAX_ELEMENT: u8 = 0x7F;

const CONTINUATION: u8 = 0x80;

/// An object's position in the container tree
///
/// Chains compare by exact sequence equality; a chain is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdChain(Vec<u8>);

impl IdChain {
    /// Build a chain from slot values, validating range and non-emptiness
    pub fn new(parts: impl Into<Vec<u8>>) -> Result<Self> {
        let parts = parts.into();
        if parts.is_empty() {
            return Err(LinkError::validation("id chain must not be empty"));
        }
        if let Some(bad) = parts.iter().find(|p| **p > MAX_ELEMENT) {
            return Err(LinkError::validation(format!(
                "id chain element {bad} exceeds {MAX_ELEMENT}"
            )));
        }
        Ok(IdChain(parts))
    }

    /// Chain addressing slot 0 of the root container
    pub fn root() -> Self {
        IdChain(vec![0])
    }

    pub fn parts(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        // the non-empty invariant is enforced at construction
        false
    }

    /// Last element: the object's slot within its parent container
    pub fn slot(&self) -> u8 {
        *self.0.last().expect("id chain is never empty")
    }

    /// Chain for a child slot beneath this chain
    pub fn child(&self, slot: u8) -> Result<IdChain> {
        if slot > MAX_ELEMENT {
            return Err(LinkError::validation(format!(
                "slot {slot} exceeds {MAX_ELEMENT}"
            )));
        }
        let mut parts = self.0.clone();
        parts.push(slot);
        Ok(IdChain(parts))
    }

    /// Whether `other` is this chain plus one or more trailing elements
    pub fn is_ancestor_of(&self, other: &IdChain) -> bool {
        other.0.len() > self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// Number of bytes this chain occupies on the wire
    pub fn encoded_len(&self) -> usize {
        self.0.len()
    }

    /// Append the wire encoding of this chain to `out`
    pub fn encode_onto(&self, out: &mut Vec<u8>) {
        let last = self.0.len() - 1;
        for (i, part) in self.0.iter().enumerate() {
            if i < last {
                out.push(part | CONTINUATION);
            } else {
                out.push(*part);
            }
        }
    }

    /// Decode a chain from the front of `input`, consuming its bytes
    pub fn decode(input: &mut &[u8]) -> Result<IdChain> {
        let mut parts = Vec::new();
        loop {
            let Some((&b, rest)) = input.split_first() else {
                return Err(LinkError::frame("truncated id chain"));
            };
            *input = rest;
            parts.push(b & MAX_ELEMENT);
            if b & CONTINUATION == 0 {
                break;
            }
        }
        Ok(IdChain(parts))
    }
}

impl fmt::Display for IdChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

impl TryFrom<&[u8]> for IdChain {
    type Error = LinkError;

    fn try_from(parts: &[u8]) -> Result<Self> {
        IdChain::new(parts.to_vec())
    }
}
