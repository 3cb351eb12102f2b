use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use bulkyard_core::ExpectedVersion;

use super::Filter;
use crate::error::StoreError;

/// A row type persisted in one table.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: &'static str;

    fn record_id(&self) -> Uuid;
}

/// A row together with its revision.
///
/// The revision counts the domain events folded into the row, so it equals
/// the version of the aggregate the row was written from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<R> {
    pub row: R,
    pub version: u64,
}

/// Generic record store with no transactional guarantees across rows.
///
/// Implementations must:
/// - reject `insert` of an id that already exists
/// - reject `update` when the stored revision does not match `expected`
/// - reject `update` whose new `revision` does not move forward
/// - evaluate `find` filters against the row's serialized field names
pub trait RecordStore<R: Record>: Send + Sync {
    fn get(&self, id: Uuid) -> Result<Option<Versioned<R>>, StoreError>;

    fn insert(&self, row: R, revision: u64) -> Result<(), StoreError>;

    fn update(&self, row: R, expected: ExpectedVersion, revision: u64) -> Result<(), StoreError>;

    fn find(&self, filter: &Filter) -> Result<Vec<Versioned<R>>, StoreError>;
}

impl<R, S> RecordStore<R> for Arc<S>
where
    R: Record,
    S: RecordStore<R> + ?Sized,
{
    fn get(&self, id: Uuid) -> Result<Option<Versioned<R>>, StoreError> {
        (**self).get(id)
    }

    fn insert(&self, row: R, revision: u64) -> Result<(), StoreError> {
        (**self).insert(row, revision)
    }

    fn update(&self, row: R, expected: ExpectedVersion, revision: u64) -> Result<(), StoreError> {
        (**self).update(row, expected, revision)
    }

    fn find(&self, filter: &Filter) -> Result<Vec<Versioned<R>>, StoreError> {
        (**self).find(filter)
    }
}
