//! Infrastructure layer: record store boundary, typed rows, object storage,
//! command dispatch, the application services and their read models.
//!
//! ```text
//! services ── dispatcher ── store (rows, optimistic revisions)
//!    │             └──────── bus ── projections (activity feed)
//!    └── storage (evidence binaries), clock, config
//! ```

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod locks;
pub mod projections;
pub mod records;
pub mod services;
pub mod storage;
pub mod store;


pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, LogisticsConfig};
pub use error::{ServiceError, ServiceResult, StorageError, StoreError};
pub use services::{
    BalanceView, Dashboard, DashboardSummary, DecrementOutcome, InvoiceInput, LoadingMachine,
    Logistics, LogisticsStores, NewLoading, NewRelease, NewSchedule, Reconciler,
    ReconciliationReport, ReconciliationWarning, ReleaseLedger, ScheduleAllocator, StockLedger,
    TransitionOutcome, WithdrawalOutcome,
};
