//! Post-completion side effects of a loading.
//!
//! Completing a loading leaves up to three independent steps: add the
//! quantity to the release's withdrawn total, take it out of stock, and mark
//! the originating schedule completed. Each step is applied on its own and
//! then acknowledged on the loading row. A step that fails is reported as a
//! [`ReconciliationWarning`] and stays pending; [`Reconciler::reconcile_pending`]
//! retries it later. The targets remember which loadings they absorbed, so
//! a step that succeeded but was never acknowledged is a no-op on rerun.

use serde_json::Value as JsonValue;

use bulkyard_core::{DomainError, LoadingId, Quantity};
use bulkyard_events::{EventBus, EventEnvelope};
use bulkyard_loadings::{
    AcknowledgeReconciliation, Loading, LoadingCommand, LoadingStatus, ReconciliationStep,
};

use super::release_ledger::ReleaseLedger;
use super::schedule_allocator::ScheduleAllocator;
use super::stock_ledger::StockLedger;
use super::{Context, LOADING};
use crate::error::{ServiceError, ServiceResult};
use crate::records::LoadingRow;
use crate::store::Filter;

/// A reconciliation step that did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationWarning {
    pub loading_id: LoadingId,
    pub step: ReconciliationStep,
    pub message: String,
}

impl core::fmt::Display for ReconciliationWarning {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "loading {} {}: {}", self.loading_id, self.step, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub loading_id: LoadingId,
    pub applied: Vec<ReconciliationStep>,
    pub warnings: Vec<ReconciliationWarning>,
    /// Withdrawal clamped at the release's authorization.
    pub over_withdrawal: Option<Quantity>,
    /// Stock that was missing when the balance was decremented.
    pub stock_shortfall: Option<Quantity>,
}

impl ReconciliationReport {
    fn new(loading_id: LoadingId) -> Self {
        Self {
            loading_id,
            applied: Vec::new(),
            warnings: Vec::new(),
            over_withdrawal: None,
            stock_shortfall: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

pub struct Reconciler<'a, B> {
    ctx: &'a Context<B>,
}

impl<'a, B> Reconciler<'a, B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub(crate) fn new(ctx: &'a Context<B>) -> Self {
        Self { ctx }
    }

    /// Apply every outstanding step of a completed loading. The caller holds
    /// the loading lock.
    pub(crate) fn reconcile_loaded(&self, mut loading: Loading) -> (Loading, ReconciliationReport) {
        let loading_id = loading.id_typed();
        let mut report = ReconciliationReport::new(loading_id);

        for step in loading.pending_steps() {
            let outcome = self
                .apply_step(&loading, step, &mut report)
                .and_then(|()| self.acknowledge(loading_id, step));
            match outcome {
                Ok(acknowledged) => {
                    loading = acknowledged;
                    report.applied.push(step);
                }
                Err(e) => {
                    tracing::warn!(%loading_id, step = step.as_str(), "reconciliation step failed: {e}");
                    report.warnings.push(ReconciliationWarning {
                        loading_id,
                        step,
                        message: e.to_string(),
                    });
                }
            }
        }

        if report.is_complete() {
            tracing::info!(%loading_id, applied = report.applied.len(), "loading reconciled");
        }
        (loading, report)
    }

    fn apply_step(
        &self,
        loading: &Loading,
        step: ReconciliationStep,
        report: &mut ReconciliationReport,
    ) -> ServiceResult<()> {
        let loading_id = loading.id_typed();
        let quantity = loading.planned_quantity();
        match step {
            ReconciliationStep::ReleaseWithdrawal => {
                let release_id = loading.release_id().ok_or_else(|| missing("release_id"))?;
                let outcome = ReleaseLedger::new(self.ctx).record_withdrawal(release_id, loading_id, quantity)?;
                report.over_withdrawal = outcome.over_withdrawal;
            }
            ReconciliationStep::StockDecrement => {
                let product_id = loading.product_id().ok_or_else(|| missing("product_id"))?;
                let warehouse_id = loading.warehouse_id().ok_or_else(|| missing("warehouse_id"))?;
                let outcome = StockLedger::new(self.ctx).decrement(product_id, warehouse_id, loading_id, quantity)?;
                report.stock_shortfall = outcome.shortfall;
            }
            ReconciliationStep::ScheduleCompletion => {
                let schedule_id = loading.schedule_id().ok_or_else(|| missing("schedule_id"))?;
                ScheduleAllocator::new(self.ctx).complete_schedule(schedule_id, loading_id)?;
            }
        }
        Ok(())
    }

    fn acknowledge(&self, loading_id: LoadingId, step: ReconciliationStep) -> ServiceResult<Loading> {
        self.ctx.with_retries("loading.acknowledge", || {
            let loading = self.ctx.load_loading(loading_id)?;
            let command = LoadingCommand::AcknowledgeReconciliation(AcknowledgeReconciliation {
                loading_id,
                step,
                occurred_at: self.ctx.clock.now(),
            });
            let committed = self
                .ctx
                .dispatcher
                .dispatch(&*self.ctx.stores.loadings, LOADING, &loading, &command)?;
            Ok(committed.aggregate)
        })
    }

    /// Re-run outstanding steps for every completed loading. Safe to call
    /// any number of times.
    pub fn reconcile_pending(&self) -> ServiceResult<Vec<ReconciliationReport>> {
        let mut reports = Vec::new();
        for loading_id in self.pending()? {
            let report = self.ctx.loading_locks.with_lock(&loading_id, || {
                let loading = self.ctx.load_loading(loading_id)?;
                Ok::<_, ServiceError>(self.reconcile_loaded(loading).1)
            })?;
            reports.push(report);
        }
        tracing::info!(
            repaired = reports.iter().filter(|r| r.is_complete()).count(),
            total = reports.len(),
            "reconciliation sweep finished"
        );
        Ok(reports)
    }

    /// Loadings that are completed but still have steps outstanding.
    pub fn pending(&self) -> ServiceResult<Vec<LoadingId>> {
        let completed = self
            .ctx
            .stores
            .loadings
            .find(&Filter::all().eq("status", LoadingStatus::Completed.as_str()))?;
        let mut pending = Vec::new();
        for row in completed {
            let loading = LoadingRow::into_loading(row, &[])?;
            if !loading.pending_steps().is_empty() {
                pending.push(loading.id_typed());
            }
        }
        Ok(pending)
    }
}

fn missing(field: &'static str) -> ServiceError {
    DomainError::MissingField(field).into()
}
