//! Container model
//!
//! The [`Container`] mirrors the device's object tree on the host. It
//! reaches a consistent view by reconciliation: enumerate what the
//! device holds, then apply the set difference against the local model,
//! removing entries the device no longer has and adopting entries the
//! host did not know about. Objects whose type has no registered codec
//! are skipped with a warning and do not abort the sync.
//!
//! A pump task routes driver events to the owning adapter and collapses
//! the container to `Disconnected` when the link goes down.
//!
//! A container is bound to its driver for the driver's lifetime. When
//! the conduit itself dies, reconnecting means building a new driver and
//! a new container; [`sync`](Container::sync) reconciliation with
//! preserved adapter identity covers device restarts on a link that
//! stayed open (and repeated syncs generally), not stream-level
//! reconnects.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{EventSource, SubscriberId};
use crate::object::ObjectAdapter;
use crate::protocol::{
    LinkState, ObjectDefinition, ObjectEvent, ProfileId, ProtocolDriver,
};
use crate::registry::CodecRegistry;
use crate::wire::IdChain;

/// Container synchronization lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No synchronized view; reads of the local model are stale
    Disconnected,
    /// Reconciliation in progress
    Syncing,
    /// Local model matches the device's enumeration
    Synced,
}

/// Change notification for container membership and object state
#[derive(Debug, Clone)]
pub enum ContainerEvent {
    ObjectCreated {
        chain: IdChain,
        type_id: u16,
        config: Value,
    },
    ObjectRemoved {
        chain: IdChain,
    },
    ObjectUpdated {
        chain: IdChain,
        state: Value,
    },
}

struct ContainerEntry {
    definition: ObjectDefinition,
    adapter: Arc<ObjectAdapter>,
}

struct ContainerInner {
    driver: ProtocolDriver,
    registry: Arc<CodecRegistry>,
    root: IdChain,
    entries: DashMap<IdChain, ContainerEntry>,
    listeners: EventSource<ContainerEvent>,
    state_tx: watch::Sender<SyncState>,
}

/// Host-side mirror of the device's object tree
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("root", &self.inner.root.to_string())
            .field("entries", &self.inner.entries.len())
            .field("state", &*self.inner.state_tx.borrow())
            .finish()
    }
}

impl Container {
    /// Build a container over `driver` rooted at `root` and start its
    /// event pump
    pub fn new(driver: ProtocolDriver, registry: Arc<CodecRegistry>, root: IdChain) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Disconnected);
        let inner = Arc::new(ContainerInner {
            driver,
            registry,
            root,
            entries: DashMap::new(),
            listeners: EventSource::new(),
            state_tx,
        });
        tokio::spawn(pump(Arc::clone(&inner)));
        Container { inner }
    }

    pub fn state(&self) -> SyncState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state_tx.subscribe()
    }

    /// Register a listener for membership and state change notifications
    pub fn subscribe<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&ContainerEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.listeners.unsubscribe(id)
    }

    /// Adapter for an object in the synchronized view
    pub fn get(&self, chain: &IdChain) -> Option<Arc<ObjectAdapter>> {
        self.inner
            .entries
            .get(chain)
            .map(|entry| Arc::clone(&entry.adapter))
    }

    /// Chains of every object in the synchronized view
    pub fn chains(&self) -> Vec<IdChain> {
        self.inner
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Reconcile the local model against the device's enumeration
    pub async fn sync(&self) -> Result<()> {
        let inner = &self.inner;
        let _ = inner.state_tx.send(SyncState::Syncing);
        info!(root = %inner.root, "container sync started");

        let listing = match inner.driver.list_objects(&inner.root).await {
            Ok(listing) => listing,
            Err(err) => {
                let _ = inner.state_tx.send(SyncState::Disconnected);
                return Err(err);
            }
        };

        // Entries the device no longer reports leave the model first
        let reported: std::collections::HashSet<&IdChain> =
            listing.iter().map(|(chain, _)| chain).collect();
        let stale: Vec<IdChain> = inner
            .entries
            .iter()
            .filter(|entry| !reported.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for chain in stale {
            if let Some((_, entry)) = inner.entries.remove(&chain) {
                entry.adapter.clear_subscriptions();
            }
            debug!(%chain, "object left the container");
            inner
                .listeners
                .fire(&ContainerEvent::ObjectRemoved { chain });
        }

        for (chain, definition) in listing {
            match inner.entries.get(&chain) {
                Some(existing) => {
                    // Same object, possibly drifted construction data.
                    // Drift is diagnostic only; the adapter stays as is.
                    if existing.definition != definition {
                        warn!(
                            %chain,
                            local_type = existing.definition.type_id,
                            device_type = definition.type_id,
                            "object definition drift between host and device"
                        );
                    }
                }
                None => {
                    if let Err(err) = self.adopt(chain.clone(), definition) {
                        warn!(%chain, %err, "skipping object during sync");
                    }
                }
            }
        }

        let _ = inner.state_tx.send(SyncState::Synced);
        info!(root = %inner.root, objects = inner.entries.len(), "container synced");
        Ok(())
    }

    /// Create an object on the device and adopt it into the model
    pub async fn add(&self, type_id: u16, config: &Value) -> Result<Arc<ObjectAdapter>> {
        let inner = &self.inner;
        let codec = inner.registry.lookup(type_id)?;
        let config_bytes = codec.encode_config(config)?;

        let chain = inner
            .driver
            .create_object(&inner.root, type_id, &config_bytes)
            .await?;
        info!(%chain, type_id, "object created");

        let adapter = Arc::new(ObjectAdapter::new(
            inner.driver.clone(),
            codec,
            chain.clone(),
            false,
        ));
        inner.entries.insert(
            chain.clone(),
            ContainerEntry {
                definition: ObjectDefinition {
                    type_id,
                    config: config_bytes,
                },
                adapter: Arc::clone(&adapter),
            },
        );
        inner.listeners.fire(&ContainerEvent::ObjectCreated {
            chain,
            type_id,
            config: config.clone(),
        });
        Ok(adapter)
    }

    /// Delete an object on the device and drop it from the model; the
    /// adapter's subscriptions are cancelled with it
    pub async fn remove(&self, chain: &IdChain) -> Result<()> {
        let inner = &self.inner;
        inner.driver.delete_object(chain).await?;
        if let Some((_, entry)) = inner.entries.remove(chain) {
            entry.adapter.clear_subscriptions();
            info!(%chain, "object removed");
            inner.listeners.fire(&ContainerEvent::ObjectRemoved {
                chain: chain.clone(),
            });
        }
        Ok(())
    }

    /// Adapter for a read-only system object outside the profile tree
    pub fn system_object(&self, chain: IdChain, type_id: u16) -> Result<Arc<ObjectAdapter>> {
        let codec = self.inner.registry.lookup(type_id)?;
        Ok(Arc::new(ObjectAdapter::new(
            self.inner.driver.clone(),
            codec,
            chain,
            true,
        )))
    }

    // -- profile passthrough -----------------------------------------------

    pub async fn create_profile(&self) -> Result<ProfileId> {
        self.inner.driver.create_profile().await
    }

    pub async fn delete_profile(&self, id: ProfileId) -> Result<()> {
        self.inner.driver.delete_profile(id).await
    }

    /// Activate a profile; the synchronized view is stale until the next
    /// [`sync`](Self::sync)
    pub async fn activate_profile(&self, id: ProfileId) -> Result<ProfileId> {
        let activated = self.inner.driver.activate_profile(id).await?;
        let _ = self.inner.state_tx.send(SyncState::Disconnected);
        Ok(activated)
    }

    pub async fn list_profiles(&self) -> Result<(Option<ProfileId>, Vec<ProfileId>)> {
        self.inner.driver.list_profiles().await
    }

    pub async fn reset(&self, flags: u8) -> Result<()> {
        self.inner.driver.reset(flags).await
    }

    fn adopt(&self, chain: IdChain, definition: ObjectDefinition) -> Result<()> {
        let inner = &self.inner;
        let codec = inner.registry.lookup(definition.type_id)?;
        let config = codec.decode_config(&definition.config)?;

        let adapter = Arc::new(ObjectAdapter::new(
            inner.driver.clone(),
            Arc::clone(&codec),
            chain.clone(),
            false,
        ));
        debug!(%chain, type_id = definition.type_id, "object adopted");
        let type_id = definition.type_id;
        inner.entries.insert(
            chain.clone(),
            ContainerEntry {
                definition,
                adapter,
            },
        );
        inner.listeners.fire(&ContainerEvent::ObjectCreated {
            chain,
            type_id,
            config,
        });
        Ok(())
    }
}

async fn pump(inner: Arc<ContainerInner>) {
    let mut events = inner.driver.events();
    let mut link = inner.driver.watch_state();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => route_event(&inner, event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "container event pump lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = link.changed() => {
                if changed.is_err() || *link.borrow() == LinkState::Disconnected {
                    break;
                }
            }
        }
    }
    info!(root = %inner.root, "container pump stopped");
    let _ = inner.state_tx.send(SyncState::Disconnected);
}

fn route_event(inner: &Arc<ContainerInner>, event: ObjectEvent) {
    let Some(entry) = inner.entries.get(&event.chain) else {
        debug!(chain = %event.chain, "event for object outside the model");
        return;
    };
    let adapter = Arc::clone(&entry.adapter);
    drop(entry);

    match adapter.apply_update(&event.payload) {
        Ok(state) => inner.listeners.fire(&ContainerEvent::ObjectUpdated {
            chain: event.chain,
            state,
        }),
        Err(err) => warn!(chain = %event.chain, %err, "undecodable event payload"),
    }
}
