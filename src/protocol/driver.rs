//! Protocol driver
//!
//! Owns one conduit and runs the request/response protocol over it.
//! Correlation is positional: the embedded side answers commands in the
//! order it received them, so the driver keeps a FIFO of outstanding
//! commands and matches each incoming response frame to the front of
//! that queue. Frames with the async flag set are unsolicited events
//! and bypass the queue entirely.
//!
//! A command timeout resolves the caller early but leaves the command's
//! queue slot in place; the eventual response is consumed against that
//! slot and discarded, keeping every later command correctly paired.

use bytes::BytesMut;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::conduit::Conduit;
use crate::error::{LinkError, Result};
use crate::protocol::commands::{
    self, ObjectDefinition, ObjectEvent, Opcode, ProfileId, Response,
};
use crate::protocol::stats::DriverStats;
use crate::wire::{IdChain, WireCodec, WireFrame};

/// Link lifecycle as observed by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

struct PendingRequest {
    opcode: Opcode,
    sent_at: Instant,
    responder: oneshot::Sender<Result<Response>>,
}

struct DriverShared {
    config: DriverConfig,
    conduit: Arc<dyn Conduit>,
    /// Held across queue push + conduit write so queue order equals wire order
    write_lock: Mutex<()>,
    queue: std::sync::Mutex<VecDeque<PendingRequest>>,
    state_tx: watch::Sender<LinkState>,
    events_tx: broadcast::Sender<ObjectEvent>,
    stats: std::sync::Mutex<DriverStats>,
}

/// Asynchronous command driver over one conduit
///
/// Cloning is cheap; clones share the conduit, the pending queue, and
/// the receive loop.
#[derive(Clone)]
pub struct ProtocolDriver {
    shared: Arc<DriverShared>,
}

impl std::fmt::Debug for ProtocolDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolDriver")
            .field("conduit", &self.shared.conduit.name())
            .field("state", &*self.shared.state_tx.borrow())
            .finish()
    }
}

impl ProtocolDriver {
    /// Start a driver over `conduit` and spawn its receive loop
    pub fn connect(conduit: Arc<dyn Conduit>, config: DriverConfig) -> Result<Self> {
        config.validate()?;
        let (state_tx, _) = watch::channel(LinkState::Connected);
        let (events_tx, _) = broadcast::channel(config.event_buffer);

        let shared = Arc::new(DriverShared {
            config,
            conduit,
            write_lock: Mutex::new(()),
            queue: std::sync::Mutex::new(VecDeque::new()),
            state_tx,
            events_tx,
            stats: std::sync::Mutex::new(DriverStats::default()),
        });

        info!(conduit = %shared.conduit.name(), "protocol driver connected");
        tokio::spawn(receive_loop(Arc::clone(&shared)));
        Ok(ProtocolDriver { shared })
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        *self.shared.state_tx.borrow()
    }

    /// Watch link state transitions
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribe to unsolicited object events
    pub fn events(&self) -> broadcast::Receiver<ObjectEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Snapshot of driver counters
    pub fn stats(&self) -> DriverStats {
        self.shared.stats().clone()
    }

    /// Close the conduit; pending commands fail as the receive loop winds down
    pub async fn shutdown(&self) -> Result<()> {
        info!(conduit = %self.shared.conduit.name(), "shutting down protocol driver");
        self.shared.conduit.close().await
    }

    // -- typed command surface ---------------------------------------------

    /// Create an object under `parent`; returns the chain the device assigned
    pub async fn create_object(
        &self,
        parent: &IdChain,
        type_id: u16,
        config: &[u8],
    ) -> Result<IdChain> {
        let frame = commands::create_object(parent, type_id, config)?;
        match self.request(Opcode::CreateObject, frame).await? {
            Response::ObjectCreated { chain } => Ok(chain),
            other => Err(unexpected(Opcode::CreateObject, &other)),
        }
    }

    pub async fn delete_object(&self, chain: &IdChain) -> Result<()> {
        let frame = commands::delete_object(chain);
        match self.request(Opcode::DeleteObject, frame).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(Opcode::DeleteObject, &other)),
        }
    }

    pub async fn read_object(&self, chain: &IdChain) -> Result<Vec<u8>> {
        self.read_impl(chain, false).await
    }

    pub async fn read_system_object(&self, chain: &IdChain) -> Result<Vec<u8>> {
        self.read_impl(chain, true).await
    }

    async fn read_impl(&self, chain: &IdChain, system: bool) -> Result<Vec<u8>> {
        let opcode = if system {
            Opcode::ReadSystemObject
        } else {
            Opcode::ReadObject
        };
        let frame = commands::read_object(chain, system);
        match self.request(opcode, frame).await? {
            Response::State { data } => Ok(data),
            other => Err(unexpected(opcode, &other)),
        }
    }

    /// Write an object's state; with a mask only the masked bits change.
    /// Returns the state as the device holds it after the write.
    pub async fn write_object(
        &self,
        chain: &IdChain,
        value: &[u8],
        mask: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        self.write_impl(chain, value, mask, false).await
    }

    pub async fn write_system_object(
        &self,
        chain: &IdChain,
        value: &[u8],
        mask: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        self.write_impl(chain, value, mask, true).await
    }

    async fn write_impl(
        &self,
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
        let frame = commands::write_object(chain, value, mask, system)?;
        match self.request(opcode, frame).await? {
            Response::State { data } => Ok(data),
            other => Err(unexpected(opcode, &other)),
        }
    }

    /// Enumerate the objects under a container chain
    pub async fn list_objects(
        &self,
        chain: &IdChain,
    ) -> Result<Vec<(IdChain, ObjectDefinition)>> {
        let frame = commands::list_objects(chain);
        match self.request(Opcode::ListObjects, frame).await? {
            Response::Listing { entries } => Ok(entries),
            other => Err(unexpected(Opcode::ListObjects, &other)),
        }
    }

    pub async fn create_profile(&self) -> Result<ProfileId> {
        match self
            .request(Opcode::CreateProfile, commands::create_profile())
            .await?
        {
            Response::Profile { id } => Ok(id),
            other => Err(unexpected(Opcode::CreateProfile, &other)),
        }
    }

    pub async fn delete_profile(&self, id: ProfileId) -> Result<()> {
        match self
            .request(Opcode::DeleteProfile, commands::delete_profile(id))
            .await?
        {
            Response::Ack => Ok(()),
            other => Err(unexpected(Opcode::DeleteProfile, &other)),
        }
    }

    pub async fn activate_profile(&self, id: ProfileId) -> Result<ProfileId> {
        match self
            .request(Opcode::ActivateProfile, commands::activate_profile(id))
            .await?
        {
            Response::Profile { id } => Ok(id),
            other => Err(unexpected(Opcode::ActivateProfile, &other)),
        }
    }

    /// List defined profiles and which one is active
    pub async fn list_profiles(&self) -> Result<(Option<ProfileId>, Vec<ProfileId>)> {
        match self
            .request(Opcode::ListProfiles, commands::list_profiles())
            .await?
        {
            Response::Profiles { active, defined } => Ok((active, defined)),
            other => Err(unexpected(Opcode::ListProfiles, &other)),
        }
    }

    pub async fn reset(&self, flags: u8) -> Result<()> {
        match self.request(Opcode::Reset, commands::reset(flags)).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(Opcode::Reset, &other)),
        }
    }

    // -- core request path -------------------------------------------------

    async fn request(&self, opcode: Opcode, frame: Vec<u8>) -> Result<Response> {
        let shared = &self.shared;
        if *shared.state_tx.borrow() == LinkState::Disconnected {
            return Err(LinkError::disconnected(format!(
                "{opcode} rejected: conduit {} is down",
                shared.conduit.name()
            )));
        }

        let mut encoded = BytesMut::new();
        let mut encoder = WireCodec::new(shared.config.max_frame_len);
        encoder.encode(&frame[..], &mut encoded)?;

        let (responder, waiter) = oneshot::channel();
        {
            // queue position and wire position must agree, so both happen
            // under the same lock
            let _guard = shared.write_lock.lock().await;
            shared.queue().push_back(PendingRequest {
                opcode,
                sent_at: Instant::now(),
                responder,
            });
            if let Err(err) = write_all(shared.conduit.as_ref(), &encoded).await {
                shared.queue().pop_back();
                return Err(err);
            }
        }
        shared.stats().record_request(encoded.len());
        debug!(command = %opcode, frame = %hex::encode(&frame), "command sent");

        match tokio::time::timeout(shared.config.response_timeout, waiter).await {
            Ok(Ok(result)) => result,
            // Receive loop dropped the responder without sending: link died
            Ok(Err(_)) => Err(LinkError::disconnected(format!(
                "{opcode} abandoned: conduit {} closed",
                shared.conduit.name()
            ))),
            Err(_) => {
                shared.stats().record_timeout();
                warn!(
                    command = %opcode,
                    timeout_ms = shared.config.response_timeout.as_millis() as u64,
                    "command timed out; wire slot retained"
                );
                Err(LinkError::timeout(format!(
                    "{opcode} after {:?}",
                    shared.config.response_timeout
                )))
            }
        }
    }
}

fn unexpected(opcode: Opcode, response: &Response) -> LinkError {
    LinkError::internal(format!(
        "{opcode} produced mismatched response {response:?}"
    ))
}

async fn write_all(conduit: &dyn Conduit, mut data: &[u8]) -> Result<()> {
    while !data.is_empty() {
        let n = conduit.write(data).await?;
        if n == 0 {
            return Err(LinkError::disconnected("conduit accepted zero bytes"));
        }
        data = &data[n..];
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Receive loop
// ---------------------------------------------------------------------------

async fn receive_loop(shared: Arc<DriverShared>) {
    let mut codec = WireCodec::new(shared.config.max_frame_len);
    let mut buffer = BytesMut::new();
    let mut chunk = vec![0u8; shared.config.read_chunk];

    let reason = loop {
        match shared.conduit.read(&mut chunk).await {
            Ok(0) => break "conduit closed".to_string(),
            Ok(n) => {
                shared.stats().record_received(n);
                buffer.extend_from_slice(&chunk[..n]);
                while let Ok(Some(frame)) = codec.decode(&mut buffer) {
                    handle_frame(&shared, frame);
                }
            }
            Err(err) => break format!("conduit read failed: {err}"),
        }
    };

    info!(conduit = %shared.conduit.name(), %reason, "receive loop stopped");
    fail_all_pending(&shared, &reason);
    let _ = shared.state_tx.send(LinkState::Disconnected);
}

fn handle_frame(shared: &Arc<DriverShared>, frame: WireFrame) {
    match frame {
        WireFrame::Malformed(defect) => {
            shared.stats().record_frame_error();
            // A response we cannot decode still answers the oldest command;
            // consuming the slot keeps later commands correctly paired.
            match shared.queue().pop_front() {
                Some(pending) => {
                    warn!(command = %pending.opcode, %defect, "malformed response frame");
                    deliver(shared, pending, Err(LinkError::frame(defect)));
                }
                None => warn!(%defect, "malformed frame with no command outstanding"),
            }
        }
        WireFrame::Complete(payload) => {
            if commands::is_event_frame(&payload) {
                dispatch_event(shared, &payload);
                return;
            }
            let Some(pending) = shared.queue().pop_front() else {
                shared.stats().record_frame_error();
                warn!(
                    frame = %hex::encode(&payload),
                    "response frame with no command outstanding"
                );
                return;
            };
            let result = commands::parse_response(pending.opcode, &payload);
            {
                let mut stats = shared.stats();
                match &result {
                    Ok(_) => stats.record_response(),
                    Err(LinkError::Protocol(_)) => stats.record_protocol_error(),
                    Err(_) => stats.record_frame_error(),
                }
            }
            debug!(
                command = %pending.opcode,
                elapsed_ms = pending.sent_at.elapsed().as_millis() as u64,
                ok = result.is_ok(),
                "response matched"
            );
            deliver(shared, pending, result);
        }
    }
}

fn dispatch_event(shared: &Arc<DriverShared>, payload: &[u8]) {
    match commands::parse_event(payload) {
        Ok(event) => {
            shared.stats().record_event();
            debug!(chain = %event.chain, type_id = event.type_id, "object event");
            // No subscribers is fine; the event is simply dropped
            let _ = shared.events_tx.send(event);
        }
        Err(err) => {
            shared.stats().record_frame_error();
            warn!(frame = %hex::encode(payload), %err, "undecodable event frame");
        }
    }
}

fn deliver(
    shared: &Arc<DriverShared>,
    pending: PendingRequest,
    result: Result<Response>,
) {
    if pending.responder.send(result).is_err() {
        // Caller timed out and went away; the slot has served its purpose
        shared.stats().record_late_response();
        debug!(command = %pending.opcode, "late response discarded");
    }
}

fn fail_all_pending(shared: &Arc<DriverShared>, reason: &str) {
    let drained: Vec<PendingRequest> = shared.queue().drain(..).collect();
    if !drained.is_empty() {
        warn!(count = drained.len(), %reason, "failing pending commands");
    }
    for pending in drained {
        deliver(shared, pending, Err(LinkError::disconnected(reason)));
    }
}

impl DriverShared {
    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<PendingRequest>> {
        // Counters and queue entries stay usable even if a holder panicked
        self.queue.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, DriverStats> {
        self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }
}
