//! Command frame construction and response parsing
//!
//! One command occupies one wire frame: opcode byte, then the id chain
//! where the command addresses an object, then an opcode-specific
//! payload. Responses echo the opcode and addressing bytes of the
//! request, followed by a signed status byte and a result payload.
//! Variable-length blocks are length-prefixed; masked writes interleave
//! value and mask bytes with the length prefix counting value bytes only.
//!
//! Frames whose opcode byte carries the async flag (0x80) are unsolicited
//! events, not responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LinkError, Result};
use crate::wire::IdChain;

/// Flag bit marking a frame as an unsolicited event
pub const ASYNC_FLAG: u8 = 0x80;

/// Opcode of the state-log event frame
pub const EVENT_STATE_LOG: u8 = ASYNC_FLAG | 0x0A;

/// Command opcodes, fixed by the embedded protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    ReadObject = 0x01,
    WriteObject = 0x02,
    CreateObject = 0x03,
    DeleteObject = 0x04,
    ListObjects = 0x05,
    CreateProfile = 0x07,
    DeleteProfile = 0x08,
    ActivateProfile = 0x09,
    Reset = 0x0B,
    ListProfiles = 0x0E,
    ReadSystemObject = 0x0F,
    WriteSystemObject = 0x10,
    MaskedWrite = 0x11,
    MaskedSystemWrite = 0x12,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        match byte {
            0x01 => Some(Opcode::ReadObject),
            0x02 => Some(Opcode::WriteObject),
            0x03 => Some(Opcode::CreateObject),
            0x04 => Some(Opcode::DeleteObject),
            0x05 => Some(Opcode::ListObjects),
            0x07 => Some(Opcode::CreateProfile),
            0x08 => Some(Opcode::DeleteProfile),
            0x09 => Some(Opcode::ActivateProfile),
            0x0B => Some(Opcode::Reset),
            0x0E => Some(Opcode::ListProfiles),
            0x0F => Some(Opcode::ReadSystemObject),
            0x10 => Some(Opcode::WriteSystemObject),
            0x11 => Some(Opcode::MaskedWrite),
            0x12 => Some(Opcode::MaskedSystemWrite),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::ReadObject => "read-object",
            Opcode::WriteObject => "write-object",
            Opcode::CreateObject => "create-object",
            Opcode::DeleteObject => "delete-object",
            Opcode::ListObjects => "list-objects",
            Opcode::CreateProfile => "create-profile",
            Opcode::DeleteProfile => "delete-profile",
            Opcode::ActivateProfile => "activate-profile",
            Opcode::Reset => "reset",
            Opcode::ListProfiles => "list-profiles",
            Opcode::ReadSystemObject => "read-system-object",
            Opcode::WriteSystemObject => "write-system-object",
            Opcode::MaskedWrite => "masked-write",
            Opcode::MaskedSystemWrite => "masked-system-write",
        };
        f.write_str(name)
    }
}

/// Signed status byte carried by every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStatus(pub i8);

impl CommandStatus {
    pub const OK: CommandStatus = CommandStatus(0);

    pub fn is_ok(self) -> bool {
        self.0 >= 0
    }
}

/// Human-readable name for an embedded status code
pub fn describe_status(status: i8) -> String {
    let name = match status {
        0 => "ok",
        -1 => "unknown error",
        -2 => "stream error",
        -3 => "profile not active",
        -16 => "insufficient persistent storage",
        -17 => "insufficient heap",
        -32 => "object not writable",
        -33 => "object not readable",
        -34 => "object not creatable",
        -35 => "object not deletable",
        -36 => "object not a container",
        -37 => "container not open",
        -38 => "container full",
        -64 => "invalid parameter",
        -65 => "invalid object id",
        -66 => "invalid type",
        -67 => "invalid size",
        -68 => "invalid profile",
        -69 => "invalid id chain",
        s if s > 0 => return format!("status {s}"),
        _ => "unrecognized error",
    };
    format!("{name} (status {status})")
}

/// Profile identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileId(pub u8);

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "profile {}", self.0)
    }
}

/// Byte-exact construction payload of a remote object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDefinition {
    pub type_id: u16,
    pub config: Vec<u8>,
}

/// Unsolicited notification from the embedded side
#[derive(Debug, Clone)]
pub struct ObjectEvent {
    pub chain: IdChain,
    pub type_id: u16,
    pub payload: Vec<u8>,
    pub at: DateTime<Utc>,
}

/// Decoded result payload of a successful command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// create-object: the chain the embedded side assigned
    ObjectCreated { chain: IdChain },
    /// delete-object, delete-profile, reset: bare acknowledgment
    Ack,
    /// read/write: current or as-written state bytes
    State { data: Vec<u8> },
    /// list-objects: enumerated entries
    Listing {
        entries: Vec<(IdChain, ObjectDefinition)>,
    },
    /// create-profile / activate-profile: the profile in effect
    Profile { id: ProfileId },
    /// list-profiles
    Profiles {
        active: Option<ProfileId>,
        defined: Vec<ProfileId>,
    },
}

// ---------------------------------------------------------------------------
// Request builders
// ---------------------------------------------------------------------------

/// Interleave value and mask bytes for a masked write block
pub fn interleave(value: &[u8], mask: &[u8]) -> Vec<u8> {
    debug_assert_eq!(value.len(), mask.len());
    let mut out = Vec::with_capacity(value.len() * 2);
    for (v, m) in value.iter().zip(mask.iter()) {
        out.push(*v);
        out.push(*m);
    }
    out
}

/// Merge semantics the embedded side applies to a masked write:
/// masked bits come from `value`, unmasked bits keep `current`.
pub fn masked_merge(current: &[u8], value: &[u8], mask: &[u8]) -> Vec<u8> {
    current
        .iter()
        .zip(value.iter().zip(mask.iter()))
        .map(|(c, (v, m))| (c & !m) | (v & m))
        .collect()
}

fn push_type_id(out: &mut Vec<u8>, type_id: u16) -> Result<()> {
    // the embedded protocol currently defines one-byte type ids only
    if type_id > 0xFF {
        return Err(LinkError::validation(format!(
            "object type {type_id} exceeds the one-byte wire range"
        )));
    }
    out.push(type_id as u8);
    Ok(())
}

fn push_vardata(out: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    if data.len() > 0xFF {
        return Err(LinkError::validation(format!(
            "data block of {} bytes exceeds the 255-byte wire limit",
            data.len()
        )));
    }
    out.push(data.len() as u8);
    out.extend_from_slice(data);
    Ok(())
}

pub fn create_object(parent: &IdChain, type_id: u16, config: &[u8]) -> Result<Vec<u8>> {
    let mut frame = vec![Opcode::CreateObject.as_byte()];
    parent.encode_onto(&mut frame);
    push_type_id(&mut frame, type_id)?;
    push_vardata(&mut frame, config)?;
    Ok(frame)
}

pub fn delete_object(chain: &IdChain) -> Vec<u8> {
    let mut frame = vec![Opcode::DeleteObject.as_byte()];
    chain.encode_onto(&mut frame);
    frame
}

pub fn read_object(chain: &IdChain, system: bool) -> Vec<u8> {
    let opcode = if system {
        Opcode::ReadSystemObject
    } else {
        Opcode::ReadObject
    };
    let mut frame = vec![opcode.as_byte()];
    chain.encode_onto(&mut frame);
    frame
}

pub fn write_object(
    chain: &IdChain,
    value: &[u8],
    mask: Option<&[u8]>,
    system: bool,
) -> Result<Vec<u8>> {
    let opcode = match (mask, system) {
        (None, false) => Opcode::WriteObject,
        (None, true) => Opcode::WriteSystemObject,
        (Some(_), false) => Opcode::MaskedWrite,
        (Some(_), true) => Opcode::MaskedSystemWrite,
    };
    let mut frame = vec![opcode.as_byte()];
    chain.encode_onto(&mut frame);
    match mask {
        None => push_vardata(&mut frame, value)?,
        Some(mask) => {
            if mask.len() != value.len() {
                return Err(LinkError::validation(
                    "write mask must be the same length as the value",
                ));
            }
            if value.len() > 0xFF {
                return Err(LinkError::validation(format!(
                    "data block of {} bytes exceeds the 255-byte wire limit",
                    value.len()
                )));
            }
            // length counts value bytes; the block itself is interleaved 2x
            frame.push(value.len() as u8);
            frame.extend_from_slice(&interleave(value, mask));
        }
    }
    Ok(frame)
}

pub fn list_objects(chain: &IdChain) -> Vec<u8> {
    let mut frame = vec![Opcode::ListObjects.as_byte()];
    chain.encode_onto(&mut frame);
    frame
}

pub fn create_profile() -> Vec<u8> {
    vec![Opcode::CreateProfile.as_byte()]
}

pub fn delete_profile(id: ProfileId) -> Vec<u8> {
    vec![Opcode::DeleteProfile.as_byte(), id.0]
}

pub fn activate_profile(id: ProfileId) -> Vec<u8> {
    vec![Opcode::ActivateProfile.as_byte(), id.0]
}

pub fn list_profiles() -> Vec<u8> {
    vec![Opcode::ListProfiles.as_byte()]
}

pub fn reset(flags: u8) -> Vec<u8> {
    vec![Opcode::Reset.as_byte(), flags]
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn take_byte(input: &mut &[u8], what: &str) -> Result<u8> {
    let Some((&b, rest)) = input.split_first() else {
        return Err(LinkError::frame(format!("truncated response: missing {what}")));
    };
    *input = rest;
    Ok(b)
}

fn take_block<'a>(input: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8]> {
    if input.len() < len {
        return Err(LinkError::frame(format!(
            "truncated response: {what} needs {len} bytes, {} left",
            input.len()
        )));
    }
    let (block, rest) = input.split_at(len);
    *input = rest;
    Ok(block)
}

fn take_vardata(input: &mut &[u8], what: &str) -> Result<Vec<u8>> {
    let len = take_byte(input, what)? as usize;
    Ok(take_block(input, len, what)?.to_vec())
}

fn take_status(input: &mut &[u8]) -> Result<CommandStatus> {
    Ok(CommandStatus(take_byte(input, "status byte")? as i8))
}

fn check_status(status: CommandStatus) -> Result<()> {
    if status.is_ok() {
        Ok(())
    } else {
        Err(LinkError::Protocol(status.0))
    }
}

/// Parse a response frame for the command at the head of the FIFO queue.
///
/// `expected` is the opcode of that command; because correlation is
/// positional, an echoed opcode that differs from it means host and
/// device have lost step, which is reported as a frame error.
pub fn parse_response(expected: Opcode, frame: &[u8]) -> Result<Response> {
    let mut input = frame;
    let echoed = take_byte(&mut input, "opcode")?;
    if echoed != expected.as_byte() {
        return Err(LinkError::frame(format!(
            "response opcode 0x{echoed:02X} does not match outstanding {expected} command"
        )));
    }

    match expected {
        Opcode::CreateObject => {
            let _parent = IdChain::decode(&mut input)?;
            check_status(take_status(&mut input)?)?;
            let assigned = IdChain::decode(&mut input)?;
            Ok(Response::ObjectCreated { chain: assigned })
        }
        Opcode::DeleteObject => {
            let _chain = IdChain::decode(&mut input)?;
            check_status(take_status(&mut input)?)?;
            Ok(Response::Ack)
        }
        Opcode::ReadObject
        | Opcode::ReadSystemObject
        | Opcode::WriteObject
        | Opcode::WriteSystemObject
        | Opcode::MaskedWrite
        | Opcode::MaskedSystemWrite => {
            let _chain = IdChain::decode(&mut input)?;
            check_status(take_status(&mut input)?)?;
            let data = take_vardata(&mut input, "state block")?;
            Ok(Response::State { data })
        }
        Opcode::ListObjects => {
            let _chain = IdChain::decode(&mut input)?;
            check_status(take_status(&mut input)?)?;
            let mut entries = Vec::new();
            while !input.is_empty() {
                let marker = take_byte(&mut input, "entry marker")?;
                if marker != Opcode::CreateObject.as_byte() {
                    return Err(LinkError::frame(format!(
                        "listing entry marker 0x{marker:02X} is not create-object"
                    )));
                }
                let chain = IdChain::decode(&mut input)?;
                let type_id = take_byte(&mut input, "entry type")? as u16;
                let config = take_vardata(&mut input, "entry config")?;
                entries.push((chain, ObjectDefinition { type_id, config }));
            }
            Ok(Response::Listing { entries })
        }
        Opcode::CreateProfile => {
            let status = take_status(&mut input)?;
            check_status(status)?;
            Ok(Response::Profile {
                id: ProfileId(status.0 as u8),
            })
        }
        Opcode::DeleteProfile => {
            let _id = take_byte(&mut input, "profile id")?;
            check_status(take_status(&mut input)?)?;
            Ok(Response::Ack)
        }
        Opcode::ActivateProfile => {
            let id = take_byte(&mut input, "profile id")?;
            check_status(take_status(&mut input)?)?;
            Ok(Response::Profile { id: ProfileId(id) })
        }
        Opcode::ListProfiles => {
            let status = take_status(&mut input)?;
            // the status byte doubles as the active profile id; -1 = none
            let active = if status.0 >= 0 {
                Some(ProfileId(status.0 as u8))
            } else if status.0 == -1 {
                None
            } else {
                return Err(LinkError::Protocol(status.0));
            };
            let defined = input.iter().map(|b| ProfileId(*b)).collect();
            Ok(Response::Profiles { active, defined })
        }
        Opcode::Reset => {
            let _flags = take_byte(&mut input, "reset flags")?;
            check_status(take_status(&mut input)?)?;
            Ok(Response::Ack)
        }
    }
}

/// Whether a frame is an unsolicited event rather than a response
pub fn is_event_frame(frame: &[u8]) -> bool {
    frame.first().is_some_and(|b| b & ASYNC_FLAG != 0)
}

/// Parse an unsolicited event frame: 0x8A, chain, type, state block
pub fn parse_event(frame: &[u8]) -> Result<ObjectEvent> {
    let mut input = frame;
    let opcode = take_byte(&mut input, "event opcode")?;
    if opcode != EVENT_STATE_LOG {
        return Err(LinkError::frame(format!(
            "unrecognized event opcode 0x{opcode:02X}"
        )));
    }
    let chain = IdChain::decode(&mut input)?;
    let type_id = take_byte(&mut input, "event type")? as u16;
    let payload = take_vardata(&mut input, "event payload")?;
    Ok(ObjectEvent {
        chain,
        type_id,
        payload,
        at: Utc::now(),
    })
}
