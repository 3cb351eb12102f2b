//! Identity validators for pickup bookings.
//!
//! Pure, total functions: malformed input yields `false` or a best-effort
//! normalized string, never a panic. [`DriverDocument`] and [`VehiclePlate`]
//! are the validated value objects the schedule module stores.

pub mod document;
pub mod plate;

pub use document::{DriverDocument, is_valid_document, normalize_document};
pub use plate::{PlateFormat, VehiclePlate, is_valid_plate, normalize_plate, plate_format};
