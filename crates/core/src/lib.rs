//! `sharex-core` — shared building blocks for the settlement and sync crates.
//!
//! This crate contains **pure domain** primitives (no IO, no async).

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;
pub mod version;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    ExpenseId, GroupId, IdGenerator, MemberId, QueueItemId, RandomIds, ResourceId, SequentialIds,
    SplitExpenseId,
};
pub use value_object::ValueObject;
pub use version::ExpectedVersion;
