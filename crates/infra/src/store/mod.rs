//! Record store boundary: single-row reads and writes plus filtered scans.

pub mod filter;
pub mod in_memory;
pub mod r#trait;

pub use filter::{Condition, Filter};
pub use in_memory::InMemoryRecordStore;
pub use r#trait::{Record, RecordStore, Versioned};
