//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// Two values are the same entity when their identifiers match,
    /// regardless of field-level differences (an edited invoice is still
    /// that invoice).
    fn same_identity(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}
