//! Value object trait: equality by value, not identity.

/// Marker trait for immutable, value-compared domain objects.
///
/// Two value objects with the same attribute values are the same value
/// (`Money`, coverage terms, ...). Entities, by contrast, are identified by
/// their id regardless of attribute changes.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
