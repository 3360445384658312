//! Entity trait: identity + continuity across state changes.
//!
//! An `Account` stays the same account as its balance moves; a `Purchase`
//! stays the same purchase as its fulfillment status flips. Identity, not
//! attribute values, is what makes two entities the same.

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
