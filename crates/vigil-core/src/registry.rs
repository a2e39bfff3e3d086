//! Connection registry for Vigil.
//!
//! The registry owns every admitted connection, partitioned by channel.
//! Metadata lives inside the channel's member entry, so a connection has
//! metadata exactly when it is a member of a channel. Every mutation is one
//! short critical section under a `DashMap` shard guard and never spans an
//! `.await`.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::auth::Identity;
use crate::channel::ChannelKind;
use crate::handle::ConnectionHandle;
use crate::metadata::{ConnectionId, ConnectionMetadata};

/// Default member limit per channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Channel name is not one of the fixed channels.
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// Channel is at capacity.
    #[error("Channel {channel} is at capacity ({capacity})")]
    CapacityExceeded {
        channel: ChannelKind,
        capacity: usize,
    },
}

/// A registered connection: its metadata and its writer handle.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub metadata: ConnectionMetadata,
    pub handle: ConnectionHandle,
}

/// The connection registry.
pub struct Registry {
    /// Members of each channel, keyed by connection ID.
    channels: DashMap<ChannelKind, HashMap<ConnectionId, ConnectionEntry>>,
    /// Which channel holds each connection.
    locations: DashMap<ConnectionId, ChannelKind>,
    /// Per-channel member limit.
    capacity: usize,
}

impl Registry {
    /// Create a registry with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a registry with a custom per-channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        info!(capacity, "Creating connection registry");
        let channels = DashMap::new();
        for kind in ChannelKind::ALL {
            channels.insert(kind, HashMap::new());
        }
        Self {
            channels,
            locations: DashMap::new(),
            capacity,
        }
    }

    /// Per-channel member limit.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a connection on `channel`.
    ///
    /// Sets `connected_at` and `last_heartbeat` to now.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CapacityExceeded`] if the channel is full. The
    /// registry is unchanged on error.
    pub fn register(
        &self,
        handle: ConnectionHandle,
        channel: ChannelKind,
        identity: Option<Identity>,
    ) -> Result<ConnectionId, RegistryError> {
        let mut members = self
            .channels
            .get_mut(&channel)
            .ok_or_else(|| RegistryError::UnknownChannel(channel.to_string()))?;

        if members.len() >= self.capacity {
            return Err(RegistryError::CapacityExceeded {
                channel,
                capacity: self.capacity,
            });
        }

        let id = ConnectionId::generate();
        let metadata = ConnectionMetadata::new(id, channel, identity);
        members.insert(id, ConnectionEntry { metadata, handle });
        self.locations.insert(id, channel);

        debug!(
            channel = %channel,
            connection = %id,
            members = members.len(),
            "Registered"
        );

        Ok(id)
    }

    /// Remove a connection.
    ///
    /// Idempotent: only the first call for an ID returns the entry.
    pub fn unregister(&self, id: ConnectionId) -> Option<ConnectionEntry> {
        let (_, channel) = self.locations.remove(&id)?;
        let mut members = self.channels.get_mut(&channel)?;
        let entry = members.remove(&id);

        if entry.is_some() {
            debug!(
                channel = %channel,
                connection = %id,
                members = members.len(),
                "Unregistered"
            );
        }
        entry
    }

    /// Point-in-time copy of a channel's members.
    ///
    /// The returned vector is independent of the live set; connections may
    /// join or leave while the caller iterates it.
    #[must_use]
    pub fn snapshot_members(&self, channel: ChannelKind) -> Vec<(ConnectionId, ConnectionHandle)> {
        self.channels
            .get(&channel)
            .map(|members| {
                members
                    .iter()
                    .map(|(id, entry)| (*id, entry.handle.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Copy of every registered connection, across all channels.
    #[must_use]
    pub fn all_connections(&self) -> Vec<(ConnectionId, ConnectionHandle)> {
        ChannelKind::ALL
            .into_iter()
            .flat_map(|kind| self.snapshot_members(kind))
            .collect()
    }

    /// Copy of a connection's metadata.
    #[must_use]
    pub fn metadata_of(&self, id: ConnectionId) -> Option<ConnectionMetadata> {
        self.with_entry(id, |entry| entry.metadata.clone())
    }

    /// The channel holding a connection.
    #[must_use]
    pub fn channel_of(&self, id: ConnectionId) -> Option<ChannelKind> {
        self.locations.get(&id).map(|kind| *kind)
    }

    /// A connection's writer handle.
    #[must_use]
    pub fn handle_of(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.with_entry(id, |entry| entry.handle.clone())
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.locations.contains_key(&id)
    }

    /// All connections authenticated as `identity`, across every channel.
    #[must_use]
    pub fn members_by_identity(&self, identity: &Identity) -> Vec<(ConnectionId, ConnectionHandle)> {
        self.channels
            .iter()
            .flat_map(|members| {
                members
                    .values()
                    .filter(|entry| entry.metadata.identity.as_ref() == Some(identity))
                    .map(|entry| (entry.metadata.connection_id, entry.handle.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Record a client heartbeat.
    ///
    /// Returns `false` if the connection is not registered.
    pub fn touch_heartbeat(&self, id: ConnectionId, now: Instant) -> bool {
        self.with_entry_mut(id, |entry| entry.metadata.touch(now))
            .is_some()
    }

    /// Replace a connection's subscriptions.
    ///
    /// Returns `false` if the connection is not registered.
    pub fn set_subscriptions(&self, id: ConnectionId, topics: BTreeSet<String>) -> bool {
        self.with_entry_mut(id, |entry| entry.metadata.set_subscriptions(topics))
            .is_some()
    }

    /// Connections whose last heartbeat is older than `timeout` at `now`.
    #[must_use]
    pub fn stale_connections(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        self.channels
            .iter()
            .flat_map(|members| {
                members
                    .values()
                    .filter(|entry| entry.metadata.is_stale(now, timeout))
                    .map(|entry| entry.metadata.connection_id)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Number of members in a channel.
    #[must_use]
    pub fn member_count(&self, channel: ChannelKind) -> usize {
        self.channels
            .get(&channel)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    /// Total number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Check if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut per_channel = BTreeMap::new();
        let mut identities = BTreeSet::new();

        for members in self.channels.iter() {
            per_channel.insert(*members.key(), members.len());
            identities.extend(
                members
                    .values()
                    .filter_map(|entry| entry.metadata.identity.clone()),
            );
        }

        RegistryStats {
            total_connections: per_channel.values().sum(),
            per_channel,
            active_identities: identities.len(),
        }
    }

    fn with_entry<R>(&self, id: ConnectionId, f: impl FnOnce(&ConnectionEntry) -> R) -> Option<R> {
        let channel = self.channel_of(id)?;
        let members = self.channels.get(&channel)?;
        members.get(&id).map(f)
    }

    fn with_entry_mut<R>(
        &self,
        id: ConnectionId,
        f: impl FnOnce(&mut ConnectionEntry) -> R,
    ) -> Option<R> {
        let channel = self.channel_of(id)?;
        let mut members = self.channels.get_mut(&channel)?;
        members.get_mut(&id).map(f)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Number of registered connections.
    pub total_connections: usize,
    /// Registered connections per channel.
    pub per_channel: BTreeMap<ChannelKind, usize>,
    /// Number of distinct authenticated identities.
    pub active_identities: usize,
}
