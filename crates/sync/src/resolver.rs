//! Conflict resolution between a queued local version and the remote copy.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;
use crate::types::{updated_at_of, ConflictRecord, ConflictResolution, SyncQueueItem};
use crate::wire::RemoteConflict;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    ServerWins,
    ClientWins,
    #[default]
    LastWriteWins,
    /// Every conflict becomes a pending record.
    Manual,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::ServerWins => "server-wins",
            ConflictStrategy::ClientWins => "client-wins",
            ConflictStrategy::LastWriteWins => "last-write-wins",
            ConflictStrategy::Manual => "manual",
        }
    }
}

impl core::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "server-wins" | "server" => Ok(ConflictStrategy::ServerWins),
            "client-wins" | "client" => Ok(ConflictStrategy::ClientWins),
            "last-write-wins" | "lww" => Ok(ConflictStrategy::LastWriteWins),
            "manual" => Ok(ConflictStrategy::Manual),
            other => Err(SyncError::Config(format!("unknown conflict strategy: {other}"))),
        }
    }
}

/// Anything carrying a last-modified time.
pub trait Timestamped {
    fn updated_at(&self) -> Option<DateTime<Utc>>;
}

impl Timestamped for Value {
    fn updated_at(&self) -> Option<DateTime<Utc>> {
        updated_at_of(self)
    }
}

/// A payload with an explicit timestamp, which may differ from the one inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub payload: Value,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Versioned {
    pub fn new(payload: Value, updated_at: Option<DateTime<Utc>>) -> Self {
        Self { payload, updated_at }
    }

    pub fn from_payload(payload: Value) -> Self {
        let updated_at = updated_at_of(&payload);
        Self { payload, updated_at }
    }
}

impl Timestamped for Versioned {
    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome<T> {
    Local(T),
    Remote(T),
    Unresolved { local: T, remote: T },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictResolver {
    strategy: ConflictStrategy,
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Pick a winner. Last-write-wins keeps the local version on ties and
    /// escalates when either timestamp is missing.
    pub fn merge<T: Timestamped>(&self, local: T, remote: T) -> MergeOutcome<T> {
        match self.strategy {
            ConflictStrategy::ServerWins => MergeOutcome::Remote(remote),
            ConflictStrategy::ClientWins => MergeOutcome::Local(local),
            ConflictStrategy::Manual => MergeOutcome::Unresolved { local, remote },
            ConflictStrategy::LastWriteWins => match (local.updated_at(), remote.updated_at()) {
                (Some(l), Some(r)) if l >= r => MergeOutcome::Local(local),
                (Some(_), Some(_)) => MergeOutcome::Remote(remote),
                _ => MergeOutcome::Unresolved { local, remote },
            },
        }
    }

    /// Resolve a remote conflict against the queued item that caused it.
    ///
    /// The payload's `updatedAt` takes precedence over the version the remote
    /// echoed back for the local side; for the remote side the explicit
    /// `serverVersion` wins over the one inside `serverData`.
    pub fn resolve(&self, item: &SyncQueueItem, conflict: &RemoteConflict) -> MergeOutcome<Versioned> {
        let local = Versioned::new(
            item.payload.clone(),
            item.local_updated_at().or(conflict.local_version),
        );
        let remote = Versioned::new(
            conflict.server_data.clone(),
            conflict
                .server_version
                .or_else(|| updated_at_of(&conflict.server_data)),
        );
        self.merge(local, remote)
    }
}

impl ConflictRecord {
    pub fn pending(item: &SyncQueueItem, local: &Versioned, remote: &Versioned) -> Self {
        Self {
            resource_kind: item.resource_kind,
            resource_id: item.resource_id,
            queue_item_id: item.id,
            local_timestamp: local.updated_at,
            remote_timestamp: remote.updated_at,
            remote_payload: remote.payload.clone(),
            resolution: ConflictResolution::Pending,
        }
    }
}
