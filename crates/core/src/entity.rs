//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Import jobs keep their identifier for their whole lifecycle; every state
/// transition is applied to the same entity.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
