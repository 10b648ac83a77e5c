//! Strongly-typed identifiers and the injected identifier source.

use core::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a group member (registered user or placeholder).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(Uuid);

/// Identifier of a split group.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(Uuid);

/// Identifier of the underlying expense record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpenseId(Uuid);

/// Identifier of a split expense (the allocation record for one expense).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SplitExpenseId(Uuid);

/// Identifier of a pending sync queue item.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueItemId(Uuid);

/// Identifier of a synchronized resource (expense, category or split group).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Draw a fresh identifier from an injected generator.
            pub fn generate(ids: &dyn IdGenerator) -> Self {
                Self(ids.next_uuid())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(MemberId, "MemberId");
impl_uuid_newtype!(GroupId, "GroupId");
impl_uuid_newtype!(ExpenseId, "ExpenseId");
impl_uuid_newtype!(SplitExpenseId, "SplitExpenseId");
impl_uuid_newtype!(QueueItemId, "QueueItemId");
impl_uuid_newtype!(ResourceId, "ResourceId");

/// Source of fresh identifiers.
///
/// Passed explicitly to whatever mints ids so tests can be deterministic.
pub trait IdGenerator: Send + Sync {
    fn next_uuid(&self) -> Uuid;
}

/// Random v4 UUIDs backed by the OS random source.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_uuid(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Deterministic generator yielding `1, 2, 3, ...` as UUIDs.
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIds {
    fn next_uuid(&self) -> Uuid {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Uuid::from_u128(u128::from(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_ids_are_deterministic() {
        let ids = SequentialIds::new();
        let a = MemberId::generate(&ids);
        let b = MemberId::generate(&ids);

        assert_eq!(a, MemberId::from_uuid(Uuid::from_u128(1)));
        assert_eq!(b, MemberId::from_uuid(Uuid::from_u128(2)));
    }

    #[test]
    fn random_ids_do_not_repeat() {
        let ids = RandomIds;
        assert_ne!(ResourceId::generate(&ids), ResourceId::generate(&ids));
    }

    #[test]
    fn parse_round_trips_display() {
        let id = GroupId::from_uuid(Uuid::from_u128(42));
        let parsed: GroupId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<MemberId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(msg) if msg.starts_with("MemberId")));
    }
}
