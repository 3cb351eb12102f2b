//! `bulkyard-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, quantities, the aggregate contract and the error taxonomy shared
//! by the release, schedule, loading and stock modules.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod quantity;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult, ErrorKind};
pub use id::{LoadingId, PhotoId, ProductId, ReleaseId, ScheduleId, StockBalanceId, WarehouseId};
pub use quantity::Quantity;
pub use value_object::ValueObject;
