use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use bulkyard_auth::{Permission, Principal, authorize};
use bulkyard_core::{DomainError, LoadingId, ProductId, Quantity, ReleaseId, WarehouseId};
use bulkyard_events::{EventBus, EventEnvelope};
use bulkyard_releases::{
    CancelRelease, CreateRelease, RecordWithdrawal, Release, ReleaseCommand, ReleaseEvent,
    ReleaseStatus,
};

use super::stock_ledger::StockLedger;
use super::{Context, RELEASE};
use crate::error::ServiceResult;
use crate::store::Filter;

/// Input for [`ReleaseLedger::create_release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRelease {
    pub client: String,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub authorized_quantity: Decimal,
    pub order_reference: String,
    /// The caller already checked stock elsewhere; skip the advisory read.
    pub skip_stock_check: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WithdrawalOutcome {
    pub applied: Quantity,
    /// Part of the request that would have overrun the authorization.
    pub over_withdrawal: Option<Quantity>,
    pub already_recorded: bool,
}

/// Release creation, cancellation and capacity queries.
pub struct ReleaseLedger<'a, B> {
    ctx: &'a Context<B>,
}

impl<'a, B> ReleaseLedger<'a, B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub(crate) fn new(ctx: &'a Context<B>) -> Self {
        Self { ctx }
    }

    pub fn create_release(&self, actor: &Principal, request: NewRelease) -> ServiceResult<Release> {
        authorize(actor, &Permission::RELEASES_CREATE)?;

        let release_id = ReleaseId::new();
        let command = ReleaseCommand::CreateRelease(CreateRelease {
            release_id,
            client: request.client,
            product_id: request.product_id,
            warehouse_id: request.warehouse_id,
            authorized_quantity: request.authorized_quantity,
            order_reference: request.order_reference,
            created_by: actor.id(),
            occurred_at: self.ctx.clock.now(),
        });
        let decision = self.ctx.dispatcher.decide(&Release::empty(release_id), &command)?;
        if !request.skip_stock_check {
            self.check_stock(&decision.aggregate)?;
        }

        let committed = self
            .ctx
            .dispatcher
            .commit(&*self.ctx.stores.releases, RELEASE, decision)?;
        let release = committed.aggregate;
        tracing::info!(
            %release_id,
            client = release.client(),
            authorized = %release.authorized(),
            "release created"
        );
        Ok(release)
    }

    /// Reject when the pair's balance is known and below the authorization.
    /// A failed read only logs.
    fn check_stock(&self, release: &Release) -> ServiceResult<()> {
        let stock = StockLedger::new(self.ctx);
        match stock.available(release.product_id(), release.warehouse_id()) {
            Ok(Some(available)) if available < release.authorized() => {
                Err(DomainError::InsufficientStock {
                    available,
                    requested: release.authorized(),
                }
                .into())
            }
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(
                    product_id = %release.product_id(),
                    warehouse_id = %release.warehouse_id(),
                    "stock read failed, creating release without the stock check: {e}"
                );
                Ok(())
            }
        }
    }

    pub fn cancel_release(&self, actor: &Principal, release_id: ReleaseId) -> ServiceResult<Release> {
        self.ctx.release_locks.with_lock(&release_id, || {
            let release = self.ctx.load_release(release_id)?;
            let command = ReleaseCommand::CancelRelease(CancelRelease {
                release_id,
                cancelled_by: actor.id(),
                occurred_at: self.ctx.clock.now(),
            });
            let decision = self.ctx.dispatcher.decide(&release, &command)?;
            authorize(actor, &Permission::RELEASES_CANCEL)?;

            let committed = self
                .ctx
                .dispatcher
                .commit(&*self.ctx.stores.releases, RELEASE, decision)?;
            tracing::info!(%release_id, cancelled_by = %actor.id(), "release cancelled");
            Ok(committed.aggregate)
        })
    }

    /// Add a completed loading's quantity to the withdrawn total, clamped at
    /// the authorization. Repeats for the same loading apply nothing.
    pub(crate) fn record_withdrawal(
        &self,
        release_id: ReleaseId,
        loading_id: LoadingId,
        quantity: Quantity,
    ) -> ServiceResult<WithdrawalOutcome> {
        let outcome = self.ctx.release_locks.with_lock(&release_id, || {
            self.ctx.with_retries("release.record_withdrawal", || {
                let release = self.ctx.load_release(release_id)?;
                let command = ReleaseCommand::RecordWithdrawal(RecordWithdrawal {
                    release_id,
                    loading_id,
                    quantity,
                    occurred_at: self.ctx.clock.now(),
                });
                let committed = self.ctx.dispatcher.dispatch(
                    &*self.ctx.stores.releases,
                    RELEASE,
                    &release,
                    &command,
                )?;
                let recorded = committed.events.iter().find_map(|e| match e {
                    ReleaseEvent::WithdrawalRecorded(w) => Some(w),
                    _ => None,
                });
                Ok(match recorded {
                    Some(w) => WithdrawalOutcome {
                        applied: w.applied,
                        over_withdrawal: (!w.excess.is_zero()).then_some(w.excess),
                        already_recorded: false,
                    },
                    None => WithdrawalOutcome {
                        applied: Quantity::ZERO,
                        over_withdrawal: None,
                        already_recorded: true,
                    },
                })
            })
        })?;

        if let Some(excess) = outcome.over_withdrawal {
            tracing::warn!(
                %release_id,
                %loading_id,
                requested = %quantity,
                %excess,
                "over-withdrawal clamped at the authorized quantity"
            );
        }
        Ok(outcome)
    }

    pub fn get(&self, release_id: ReleaseId) -> ServiceResult<Release> {
        self.ctx.load_release(release_id)
    }

    /// `authorized - withdrawn`, clamped at zero.
    pub fn remaining(&self, release_id: ReleaseId) -> ServiceResult<Quantity> {
        Ok(self.ctx.load_release(release_id)?.remaining())
    }

    /// What a new schedule or unscheduled loading could still reserve.
    pub fn remaining_capacity(&self, release_id: ReleaseId) -> ServiceResult<Quantity> {
        let release = self.ctx.load_release(release_id)?;
        let reserved = self.ctx.reserved_against(release_id, None)?;
        Ok(release.allocatable(reserved))
    }

    /// Releases in `status`, oldest first.
    pub fn list_by_status(&self, status: ReleaseStatus) -> ServiceResult<Vec<Release>> {
        let rows = self
            .ctx
            .stores
            .releases
            .find(&Filter::all().eq("status", status.as_str()))?;
        let mut releases = rows
            .into_iter()
            .map(Release::try_from)
            .collect::<ServiceResult<Vec<_>>>()?;
        releases.sort_by_key(|r| r.snapshot().map(|s| s.created_at));
        Ok(releases)
    }
}
