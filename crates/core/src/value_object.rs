//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have **no identity**: two allocations for the same member
/// with the same amount are interchangeable. They are immutable; to "change"
/// one, build a new one.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct SimplifiedTransfer { from: MemberId, to: MemberId, amount: i64 }
///
/// impl ValueObject for SimplifiedTransfer {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
