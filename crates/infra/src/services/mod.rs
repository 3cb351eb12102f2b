//! Application services: load rows, decide, enforce cross-aggregate rules,
//! commit.
//!
//! Every service is a cheap borrowed view over one shared [`Context`].
//! Capacity-affecting mutations of a release run under that release's lock;
//! loading mutations run under the loading's lock and take the release lock
//! second when they need it (never the other way around).

mod dashboard;
mod loading_machine;
mod reconciliation;
mod release_ledger;
mod schedule_allocator;
mod stock_ledger;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value as JsonValue;

use bulkyard_core::{
    DomainError, LoadingId, ProductId, Quantity, ReleaseId, ScheduleId, WarehouseId,
};
use bulkyard_events::{EventBus, EventEnvelope, Subscription};
use bulkyard_loadings::{Loading, LoadingStatus};
use bulkyard_releases::Release;
use bulkyard_schedules::Schedule;

use crate::clock::{Clock, SystemClock};
use crate::config::LogisticsConfig;
use crate::dispatcher::CommandDispatcher;
use crate::error::ServiceResult;
use crate::locks::KeyedLocks;
use crate::projections::ActivityFeed;
use crate::records::{LoadingPhotoRow, LoadingRow, ReleaseRow, ScheduleRow, StockBalanceRow};
use crate::storage::{InMemoryObjectStorage, ObjectStorage};
use crate::store::{Filter, InMemoryRecordStore, RecordStore};

pub use dashboard::{Dashboard, DashboardSummary};
pub use loading_machine::{InvoiceInput, LoadingMachine, NewLoading, TransitionOutcome};
pub use reconciliation::{Reconciler, ReconciliationReport, ReconciliationWarning};
pub use release_ledger::{NewRelease, ReleaseLedger, WithdrawalOutcome};
pub use schedule_allocator::{NewSchedule, ScheduleAllocator};
pub use stock_ledger::{BalanceView, DecrementOutcome, StockLedger};

pub(crate) const RELEASE: &str = "release";
pub(crate) const SCHEDULE: &str = "schedule";
pub(crate) const LOADING: &str = "loading";
pub(crate) const STOCK_BALANCE: &str = "stock_balance";

/// One store per table.
#[derive(Clone)]
pub struct LogisticsStores {
    pub releases: Arc<dyn RecordStore<ReleaseRow>>,
    pub schedules: Arc<dyn RecordStore<ScheduleRow>>,
    pub loadings: Arc<dyn RecordStore<LoadingRow>>,
    pub photos: Arc<dyn RecordStore<LoadingPhotoRow>>,
    pub balances: Arc<dyn RecordStore<StockBalanceRow>>,
}

impl LogisticsStores {
    pub fn in_memory() -> Self {
        Self {
            releases: Arc::new(InMemoryRecordStore::<ReleaseRow>::new()),
            schedules: Arc::new(InMemoryRecordStore::<ScheduleRow>::new()),
            loadings: Arc::new(InMemoryRecordStore::<LoadingRow>::new()),
            photos: Arc::new(InMemoryRecordStore::<LoadingPhotoRow>::new()),
            balances: Arc::new(InMemoryRecordStore::<StockBalanceRow>::new()),
        }
    }
}

impl core::fmt::Debug for LogisticsStores {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LogisticsStores").finish_non_exhaustive()
    }
}

pub(crate) struct Context<B> {
    pub(crate) stores: LogisticsStores,
    pub(crate) storage: Arc<dyn ObjectStorage>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) dispatcher: CommandDispatcher<B>,
    pub(crate) release_locks: KeyedLocks<ReleaseId>,
    pub(crate) loading_locks: KeyedLocks<LoadingId>,
    pub(crate) balance_locks: KeyedLocks<(ProductId, WarehouseId)>,
    pub(crate) config: LogisticsConfig,
}

impl<B> Context<B> {
    pub(crate) fn load_release(&self, id: ReleaseId) -> ServiceResult<Release> {
        let row = self.stores.releases.get(id.into())?.ok_or(DomainError::NotFound)?;
        Release::try_from(row)
    }

    pub(crate) fn load_schedule(&self, id: ScheduleId) -> ServiceResult<Schedule> {
        let row = self.stores.schedules.get(id.into())?.ok_or(DomainError::NotFound)?;
        Schedule::try_from(row)
    }

    pub(crate) fn photos_of(&self, id: LoadingId) -> ServiceResult<Vec<LoadingPhotoRow>> {
        let mut photos: Vec<LoadingPhotoRow> = self
            .stores
            .photos
            .find(&Filter::all().eq("loading_id", id))?
            .into_iter()
            .map(|v| v.row)
            .collect();
        photos.sort_by_key(|p| p.created_at);
        Ok(photos)
    }

    pub(crate) fn load_loading(&self, id: LoadingId) -> ServiceResult<Loading> {
        let row = self.stores.loadings.get(id.into())?.ok_or(DomainError::NotFound)?;
        let photos = self.photos_of(id)?;
        LoadingRow::into_loading(row, &photos)
    }

    /// Quantity currently held against a release and not yet withdrawn.
    ///
    /// Active schedules reserve their quantity. A loading reserves its
    /// planned quantity when no active schedule covers it, until its
    /// withdrawal is recorded on the release. `excluding` leaves one
    /// schedule out (the one being edited).
    pub(crate) fn reserved_against(
        &self,
        release_id: ReleaseId,
        excluding: Option<ScheduleId>,
    ) -> ServiceResult<Quantity> {
        let by_release = Filter::all().eq("release_id", release_id);
        let mut reserved = Quantity::ZERO;
        let mut active = HashSet::new();
        for v in self.stores.schedules.find(&by_release)? {
            let schedule = Schedule::try_from(v)?;
            if schedule.status().is_active() {
                active.insert(schedule.id_typed());
            }
            if Some(schedule.id_typed()) != excluding {
                reserved = reserved.plus(schedule.reserved());
            }
        }
        for v in self.stores.loadings.find(&by_release)? {
            // Photo counts do not affect the reservation.
            let loading = LoadingRow::into_loading(v, &[])?;
            let covered = loading.schedule_id().is_some_and(|id| active.contains(&id));
            reserved = reserved.plus(loading.reserved_against_release(covered));
        }
        Ok(reserved)
    }

    /// Whether a loading other than a cancelled one was opened from
    /// `schedule_id`.
    pub(crate) fn has_open_loading(&self, schedule_id: ScheduleId) -> ServiceResult<bool> {
        let rows = self
            .stores
            .loadings
            .find(&Filter::all().eq("schedule_id", schedule_id))?;
        Ok(rows
            .iter()
            .any(|v| v.row.status != LoadingStatus::Cancelled.as_str()))
    }

    /// Run `op` until it succeeds or fails with something other than a
    /// revision conflict, at most `update_attempts` times.
    pub(crate) fn with_retries<T>(
        &self,
        operation: &'static str,
        mut op: impl FnMut() -> ServiceResult<T>,
    ) -> ServiceResult<T> {
        let attempts = self.config.update_attempts();
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_conflict() && attempt < attempts => {
                    tracing::debug!(operation, attempt, "write conflict, retrying: {e}");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Entry point wiring stores, storage, clock, bus and configuration.
///
/// ```text
/// Logistics
///   ├─ releases()        create / cancel / remaining capacity
///   ├─ schedules()       book / edit / cancel pickups
///   ├─ loadings()        open / evidence / invoice / transition
///   ├─ reconciliation()  post-completion side effects, repair sweep
///   ├─ stock()           balances per product and warehouse
///   └─ dashboard()       daily counts and recent activity
/// ```
pub struct Logistics<B> {
    ctx: Context<B>,
    activity: ActivityFeed,
    activity_subscription: Mutex<Subscription<EventEnvelope<JsonValue>>>,
}

impl<B> Logistics<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        stores: LogisticsStores,
        storage: Arc<dyn ObjectStorage>,
        clock: Arc<dyn Clock>,
        bus: B,
        config: LogisticsConfig,
    ) -> Self {
        let activity_subscription = Mutex::new(bus.subscribe());
        Self {
            ctx: Context {
                stores,
                storage,
                clock,
                dispatcher: CommandDispatcher::new(bus),
                release_locks: KeyedLocks::new(),
                loading_locks: KeyedLocks::new(),
                balance_locks: KeyedLocks::new(),
                config,
            },
            activity: ActivityFeed::default(),
            activity_subscription,
        }
    }

    /// In-memory stores and storage with the system clock.
    pub fn in_memory(bus: B, config: LogisticsConfig) -> Self {
        Self::new(
            LogisticsStores::in_memory(),
            Arc::new(InMemoryObjectStorage::new()),
            Arc::new(SystemClock),
            bus,
            config,
        )
    }

    pub fn releases(&self) -> ReleaseLedger<'_, B> {
        ReleaseLedger::new(&self.ctx)
    }

    pub fn schedules(&self) -> ScheduleAllocator<'_, B> {
        ScheduleAllocator::new(&self.ctx)
    }

    pub fn loadings(&self) -> LoadingMachine<'_, B> {
        LoadingMachine::new(&self.ctx)
    }

    pub fn reconciliation(&self) -> Reconciler<'_, B> {
        Reconciler::new(&self.ctx)
    }

    pub fn stock(&self) -> StockLedger<'_, B> {
        StockLedger::new(&self.ctx)
    }

    /// Drains pending bus messages into the activity feed first.
    pub fn dashboard(&self) -> Dashboard<'_, B> {
        let subscription = self
            .activity_subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.activity.catch_up(&subscription);
        Dashboard::new(&self.ctx, &self.activity)
    }

    pub fn config(&self) -> &LogisticsConfig {
        &self.ctx.config
    }

    pub fn stores(&self) -> &LogisticsStores {
        &self.ctx.stores
    }
}

impl<B> core::fmt::Debug for Logistics<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Logistics")
            .field("config", &self.ctx.config)
            .finish_non_exhaustive()
    }
}
