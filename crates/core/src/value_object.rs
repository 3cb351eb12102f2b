//! Value object marker: equality by value, not identity.

/// Marker trait for value objects.
///
/// Quantities, driver documents and vehicle plates carry no identity; two
/// instances holding the same normalized value are interchangeable. They are
/// immutable once constructed and only ever built through a validating
/// constructor, so holding one is proof the value passed validation.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
