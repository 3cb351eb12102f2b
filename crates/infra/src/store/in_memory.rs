use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use uuid::Uuid;

use bulkyard_core::ExpectedVersion;

use super::{Filter, Record, RecordStore, Versioned};
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct StoredRow {
    document: JsonValue,
    version: u64,
}

/// In-memory record store.
///
/// Rows are kept as JSON documents so filters see exactly the persisted field
/// names, and every read goes through the same decode path a real backend
/// would. Intended for tests/dev.
#[derive(Debug)]
pub struct InMemoryRecordStore<R> {
    rows: RwLock<HashMap<Uuid, StoredRow>>,
    _row: PhantomData<fn() -> R>,
}

impl<R> Default for InMemoryRecordStore<R> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            _row: PhantomData,
        }
    }
}

impl<R: Record> InMemoryRecordStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable(format!("{} lock poisoned", R::TABLE))
    }

    fn encode(row: &R) -> Result<JsonValue, StoreError> {
        serde_json::to_value(row).map_err(|e| StoreError::Encode {
            table: R::TABLE,
            message: e.to_string(),
        })
    }

    fn decode(stored: &StoredRow) -> Result<Versioned<R>, StoreError> {
        let row = serde_json::from_value(stored.document.clone()).map_err(|e| StoreError::Decode {
            table: R::TABLE,
            message: e.to_string(),
        })?;
        Ok(Versioned {
            row,
            version: stored.version,
        })
    }
}

impl<R: Record> RecordStore<R> for InMemoryRecordStore<R> {
    fn get(&self, id: Uuid) -> Result<Option<Versioned<R>>, StoreError> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        rows.get(&id).map(Self::decode).transpose()
    }

    fn insert(&self, row: R, revision: u64) -> Result<(), StoreError> {
        let id = row.record_id();
        let document = Self::encode(&row)?;
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        if rows.contains_key(&id) {
            return Err(StoreError::Duplicate {
                table: R::TABLE,
                id,
            });
        }
        rows.insert(
            id,
            StoredRow {
                document,
                version: revision,
            },
        );
        Ok(())
    }

    fn update(&self, row: R, expected: ExpectedVersion, revision: u64) -> Result<(), StoreError> {
        let id = row.record_id();
        let document = Self::encode(&row)?;
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        let stored = rows.get_mut(&id).ok_or(StoreError::Missing {
            table: R::TABLE,
            id,
        })?;

        if !expected.matches(stored.version) {
            return Err(StoreError::VersionConflict {
                table: R::TABLE,
                id,
                expected: match expected {
                    ExpectedVersion::Exact(v) => v,
                    ExpectedVersion::Any => stored.version,
                },
                actual: stored.version,
            });
        }

        if revision <= stored.version {
            return Err(StoreError::VersionConflict {
                table: R::TABLE,
                id,
                expected: revision,
                actual: stored.version,
            });
        }

        stored.document = document;
        stored.version = revision;
        Ok(())
    }

    fn find(&self, filter: &Filter) -> Result<Vec<Versioned<R>>, StoreError> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        rows.values()
            .filter(|stored| filter.matches(&stored.document))
            .map(Self::decode)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Dock {
        id: Uuid,
        warehouse: String,
        open: bool,
    }

    impl Record for Dock {
        const TABLE: &'static str = "docks";

        fn record_id(&self) -> Uuid {
            self.id
        }
    }

    fn dock(warehouse: &str) -> Dock {
        Dock {
            id: Uuid::now_v7(),
            warehouse: warehouse.to_string(),
            open: true,
        }
    }

    #[test]
    fn insert_get_update_cycle() {
        let store = InMemoryRecordStore::<Dock>::new();
        let mut row = dock("north");
        store.insert(row.clone(), 1).unwrap();
        assert!(matches!(
            store.insert(row.clone(), 1),
            Err(StoreError::Duplicate { .. })
        ));

        row.open = false;
        store.update(row.clone(), ExpectedVersion::Exact(1), 3).unwrap();
        let loaded = store.get(row.id).unwrap().unwrap();
        assert_eq!(loaded.version, 3);
        assert!(!loaded.row.open);
    }

    #[test]
    fn stale_update_is_rejected() {
        let store = InMemoryRecordStore::<Dock>::new();
        let row = dock("north");
        store.insert(row.clone(), 1).unwrap();
        store.update(row.clone(), ExpectedVersion::Exact(1), 2).unwrap();

        let err = store.update(row.clone(), ExpectedVersion::Exact(1), 2).unwrap_err();
        assert_eq!(
            err,
            StoreError::VersionConflict {
                table: "docks",
                id: err_id(&err),
                expected: 1,
                actual: 2,
            }
        );
    }

    #[test]
    fn revision_must_move_forward() {
        let store = InMemoryRecordStore::<Dock>::new();
        let row = dock("east");
        store.insert(row.clone(), 2).unwrap();
        assert!(store.update(row.clone(), ExpectedVersion::Exact(2), 2).is_err());
        store.update(row, ExpectedVersion::Any, 5).unwrap();
    }

    fn err_id(err: &StoreError) -> Uuid {
        match err {
            StoreError::VersionConflict { id, .. } => *id,
            _ => Uuid::nil(),
        }
    }

    #[test]
    fn update_of_unknown_row_fails() {
        let store = InMemoryRecordStore::<Dock>::new();
        assert!(matches!(
            store.update(dock("south"), ExpectedVersion::Any, 1),
            Err(StoreError::Missing { .. })
        ));
    }

    #[test]
    fn find_filters_on_field_names() {
        let store = InMemoryRecordStore::<Dock>::new();
        store.insert(dock("north"), 1).unwrap();
        store.insert(dock("north"), 1).unwrap();
        store.insert(dock("south"), 1).unwrap();

        let north = store.find(&Filter::all().eq("warehouse", "north")).unwrap();
        assert_eq!(north.len(), 2);
        assert_eq!(store.find(&Filter::all()).unwrap().len(), 3);
        assert!(store.find(&Filter::all().eq("open", false)).unwrap().is_empty());
    }
}
