//! Entity trait: records with identity (members, split expenses, queue items).

/// Entity marker + minimal interface.
///
/// Two entities with the same id are the same record even when their other
/// fields differ (e.g. a member before and after balance aggregation).
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + Ord + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}
