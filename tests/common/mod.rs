//! Shared test fixtures
//!
//! [`EmulatedDevice`] plays the embedded side of the protocol over a
//! mock conduit: it decodes hex-text command frames, keeps an in-memory
//! object table, and answers with properly framed responses. Tests seed
//! it with objects, point a driver or container at the other half of the
//! conduit, and assert on what comes back.

// Each test binary uses a different slice of these helpers
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use boxlink::protocol::commands::masked_merge;
use boxlink::MockConduitHandle;

const CONTINUATION: u8 = 0x80;

/// Initialize test logging; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
pub struct DeviceObject {
    pub type_id: u8,
    pub config: Vec<u8>,
    pub state: Vec<u8>,
}

#[derive(Debug, Default)]
struct DeviceState {
    /// Keyed by chain parts (continuation bits stripped)
    objects: BTreeMap<Vec<u8>, DeviceObject>,
    next_slot: u8,
    profiles: Vec<u8>,
    active_profile: Option<u8>,
    next_profile: u8,
}

/// Scripted embedded-container peer for integration tests
pub struct EmulatedDevice {
    state: Arc<Mutex<DeviceState>>,
    handle: Arc<MockConduitHandle>,
}

pub fn decode_hex_line(line: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pending: Option<u8> = None;
    let mut in_annotation = 0u32;
    for &c in line {
        match c {
            b'[' => in_annotation += 1,
            b']' => in_annotation = in_annotation.saturating_sub(1),
            _ if in_annotation > 0 => {}
            b'0'..=b'9' | b'A'..=b'F' | b'a'..=b'f' => {
                let digit = match c {
                    b'0'..=b'9' => c - b'0',
                    b'A'..=b'F' => c - b'A' + 10,
                    _ => c - b'a' + 10,
                };
                match pending.take() {
                    Some(hi) => out.push((hi << 4) | digit),
                    None => pending = Some(digit),
                }
            }
            _ => {}
        }
    }
    out
}

pub fn encode_hex_line(payload: &[u8]) -> String {
    let mut line = String::new();
    for byte in payload {
        line.push_str(&format!("{byte:02X} "));
    }
    line.push('\n');
    line
}

fn take_chain(input: &mut &[u8]) -> Vec<u8> {
    let mut parts = Vec::new();
    while let Some((&b, rest)) = input.split_first() {
        *input = rest;
        parts.push(b & 0x7F);
        if b & CONTINUATION == 0 {
            break;
        }
    }
    parts
}

fn encode_chain(parts: &[u8], out: &mut Vec<u8>) {
    let last = parts.len() - 1;
    for (i, part) in parts.iter().enumerate() {
        out.push(if i < last { part | CONTINUATION } else { *part });
    }
}

fn take_byte(input: &mut &[u8]) -> u8 {
    let (&b, rest) = input.split_first().expect("truncated command frame");
    *input = rest;
    b
}

fn take_vardata(input: &mut &[u8]) -> Vec<u8> {
    let len = take_byte(input) as usize;
    let (block, rest) = input.split_at(len);
    *input = rest;
    block.to_vec()
}

impl EmulatedDevice {
    /// Take over the handle side of a mock conduit and start answering
    pub fn start(handle: MockConduitHandle) -> Self {
        let handle = Arc::new(handle);
        let state = Arc::new(Mutex::new(DeviceState::default()));
        let device = EmulatedDevice {
            state: Arc::clone(&state),
            handle: Arc::clone(&handle),
        };

        tokio::spawn(async move {
            let mut pending = Vec::new();
            while let Some(chunk) = handle.next_write().await {
                pending.extend_from_slice(&chunk);
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    let frame = decode_hex_line(&line);
                    if frame.is_empty() {
                        continue;
                    }
                    let reply = handle_command(&state, &frame);
                    handle.inject_line(&encode_hex_line(&reply));
                }
            }
        });
        device
    }

    /// Install an object without going through the protocol
    pub fn seed_object(&self, chain: &[u8], type_id: u8, config: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.next_slot = state.next_slot.max(chain[chain.len() - 1] + 1);
        state.objects.insert(
            chain.to_vec(),
            DeviceObject {
                type_id,
                config: config.to_vec(),
                state: config.to_vec(),
            },
        );
    }

    /// Drop an object without going through the protocol
    pub fn drop_object(&self, chain: &[u8]) {
        self.state.lock().unwrap().objects.remove(chain);
    }

    pub fn object(&self, chain: &[u8]) -> Option<DeviceObject> {
        self.state.lock().unwrap().objects.get(chain).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    /// Push an unsolicited state-log event toward the host
    pub fn emit_event(&self, chain: &[u8], type_id: u8, payload: &[u8]) {
        let mut frame = vec![0x8A];
        encode_chain(chain, &mut frame);
        frame.push(type_id);
        frame.push(payload.len() as u8);
        frame.extend_from_slice(payload);
        self.handle.inject_line(&encode_hex_line(&frame));
    }

    /// Close the device side of the conduit
    pub fn close(&self) {
        self.handle.close();
    }
}

fn handle_command(state: &Arc<Mutex<DeviceState>>, frame: &[u8]) -> Vec<u8> {
    let mut input = frame;
    let opcode = take_byte(&mut input);
    let mut state = state.lock().unwrap();

    match opcode {
        // read / read-system
        0x01 | 0x0F => {
            let chain = take_chain(&mut input);
            let mut reply = vec![opcode];
            encode_chain(&chain, &mut reply);
            match state.objects.get(&chain) {
                Some(object) => {
                    reply.push(0x00);
                    reply.push(object.state.len() as u8);
                    reply.extend_from_slice(&object.state);
                }
                // -65: invalid object id
                None => reply.push((-65i8) as u8),
            }
            reply
        }
        // write / write-system
        0x02 | 0x10 => {
            let chain = take_chain(&mut input);
            let value = take_vardata(&mut input);
            let mut reply = vec![opcode];
            encode_chain(&chain, &mut reply);
            match state.objects.get_mut(&chain) {
                Some(object) => {
                    object.state = value;
                    reply.push(0x00);
                    reply.push(object.state.len() as u8);
                    reply.extend_from_slice(&object.state);
                }
                None => reply.push((-65i8) as u8),
            }
            reply
        }
        // masked write / masked system write
        0x11 | 0x12 => {
            let chain = take_chain(&mut input);
            let len = take_byte(&mut input) as usize;
            let mut value = Vec::with_capacity(len);
            let mut mask = Vec::with_capacity(len);
            for _ in 0..len {
                value.push(take_byte(&mut input));
                mask.push(take_byte(&mut input));
            }
            let mut reply = vec![opcode];
            encode_chain(&chain, &mut reply);
            match state.objects.get_mut(&chain) {
                Some(object) => {
                    object.state = masked_merge(&object.state, &value, &mask);
                    reply.push(0x00);
                    reply.push(object.state.len() as u8);
                    reply.extend_from_slice(&object.state);
                }
                None => reply.push((-65i8) as u8),
            }
            reply
        }
        // create
        0x03 => {
            let parent = take_chain(&mut input);
            let type_id = take_byte(&mut input);
            let config = take_vardata(&mut input);

            let slot = state.next_slot;
            state.next_slot += 1;
            let mut assigned = parent.clone();
            assigned.push(slot);
            state.objects.insert(
                assigned.clone(),
                DeviceObject {
                    type_id,
                    config: config.clone(),
                    state: config,
                },
            );

            let mut reply = vec![opcode];
            encode_chain(&parent, &mut reply);
            reply.push(0x00);
            encode_chain(&assigned, &mut reply);
            reply
        }
        // delete
        0x04 => {
            let chain = take_chain(&mut input);
            let mut reply = vec![opcode];
            encode_chain(&chain, &mut reply);
            match state.objects.remove(&chain) {
                Some(_) => reply.push(0x00),
                None => reply.push((-65i8) as u8),
            }
            reply
        }
        // list objects
        0x05 => {
            let chain = take_chain(&mut input);
            let mut reply = vec![opcode];
            encode_chain(&chain, &mut reply);
            reply.push(0x00);
            for (object_chain, object) in state.objects.iter() {
                reply.push(0x03);
                encode_chain(object_chain, &mut reply);
                reply.push(object.type_id);
                reply.push(object.config.len() as u8);
                reply.extend_from_slice(&object.config);
            }
            reply
        }
        // create profile
        0x07 => {
            let id = state.next_profile;
            state.next_profile += 1;
            state.profiles.push(id);
            vec![opcode, id]
        }
        // delete profile
        0x08 => {
            let id = take_byte(&mut input);
            state.profiles.retain(|p| *p != id);
            if state.active_profile == Some(id) {
                state.active_profile = None;
            }
            vec![opcode, id, 0x00]
        }
        // activate profile
        0x09 => {
            let id = take_byte(&mut input);
            if state.profiles.contains(&id) {
                state.active_profile = Some(id);
                vec![opcode, id, 0x00]
            } else {
                // -68: invalid profile
                vec![opcode, id, (-68i8) as u8]
            }
        }
        // reset
        0x0B => {
            let flags = take_byte(&mut input);
            vec![opcode, flags, 0x00]
        }
        // list profiles
        0x0E => {
            let mut reply = vec![opcode];
            reply.push(state.active_profile.map_or((-1i8) as u8, |id| id));
            reply.extend_from_slice(&state.profiles);
            reply
        }
        other => {
            // -1: unknown error for anything unrecognized
            vec![other, (-1i8) as u8]
        }
    }
}
