//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attributes. To "modify"
/// one, build a new value (e.g. `Money::add` returns a fresh `Money`).
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
