use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use bulkyard_auth::{Permission, Principal, authorize};
use bulkyard_core::{LoadingId, ProductId, Quantity, StockBalanceId, WarehouseId};
use bulkyard_events::{EventBus, EventEnvelope};
use bulkyard_stock::{
    DecrementStock, ReceiveStock, SetBalance, StockBalance, StockCommand, StockEvent,
};

use super::{Context, STOCK_BALANCE};
use crate::dispatcher::Committed;
use crate::error::ServiceResult;
use crate::store::Filter;

/// One row of the stock listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceView {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub current: Quantity,
    pub low: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DecrementOutcome {
    pub applied: Quantity,
    /// Set when less was on hand than the loading took out.
    pub shortfall: Option<Quantity>,
}

/// On-hand quantity per (product, warehouse).
pub struct StockLedger<'a, B> {
    ctx: &'a Context<B>,
}

impl<'a, B> StockLedger<'a, B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub(crate) fn new(ctx: &'a Context<B>) -> Self {
        Self { ctx }
    }

    fn find_balance(&self, product_id: ProductId, warehouse_id: WarehouseId) -> ServiceResult<Option<StockBalance>> {
        let filter = Filter::all()
            .eq("product_id", product_id)
            .eq("warehouse_id", warehouse_id);
        let mut rows = self.ctx.stores.balances.find(&filter)?;
        if rows.len() > 1 {
            tracing::warn!(%product_id, %warehouse_id, rows = rows.len(), "duplicate stock balance rows");
        }
        match rows.pop() {
            Some(v) => Ok(Some(StockBalance::try_from(v)?)),
            None => Ok(None),
        }
    }

    /// Current balance, `None` if the pair has never been stocked.
    pub fn available(&self, product_id: ProductId, warehouse_id: WarehouseId) -> ServiceResult<Option<Quantity>> {
        Ok(self
            .find_balance(product_id, warehouse_id)?
            .map(|b| b.current()))
    }

    pub fn receive(
        &self,
        actor: &Principal,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: Decimal,
    ) -> ServiceResult<StockBalance> {
        authorize(actor, &Permission::STOCK_ADJUST)?;
        let now = self.ctx.clock.now();
        let committed = self.mutate(product_id, warehouse_id, |balance| {
            Ok(StockCommand::ReceiveStock(ReceiveStock {
                balance_id: balance.id_typed(),
                product_id,
                warehouse_id,
                quantity,
                actor: actor.id(),
                occurred_at: now,
            }))
        })?;
        tracing::info!(%product_id, %warehouse_id, %quantity, current = %committed.aggregate.current(), "stock received");
        Ok(committed.aggregate)
    }

    /// Overwrite the balance with a counted quantity.
    pub fn set_balance(
        &self,
        actor: &Principal,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: Decimal,
    ) -> ServiceResult<StockBalance> {
        authorize(actor, &Permission::STOCK_ADJUST)?;
        let now = self.ctx.clock.now();
        let committed = self.mutate(product_id, warehouse_id, |balance| {
            Ok(StockCommand::SetBalance(SetBalance {
                balance_id: balance.id_typed(),
                product_id,
                warehouse_id,
                quantity,
                actor: actor.id(),
                occurred_at: now,
            }))
        })?;
        tracing::info!(%product_id, %warehouse_id, current = %committed.aggregate.current(), "stock balance set");
        Ok(committed.aggregate)
    }

    /// Take a completed loading's quantity out of stock. Repeats for the same
    /// loading apply nothing. Earlier loadings that have since recorded their
    /// decrement are forgotten by the balance.
    pub(crate) fn decrement(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        loading_id: LoadingId,
        quantity: Quantity,
    ) -> ServiceResult<DecrementOutcome> {
        let now = self.ctx.clock.now();
        let committed = self.mutate(product_id, warehouse_id, |balance| {
            Ok(StockCommand::DecrementStock(DecrementStock {
                balance_id: balance.id_typed(),
                product_id,
                warehouse_id,
                loading_id,
                quantity,
                settled: self.settled_loadings(balance)?,
                occurred_at: now,
            }))
        })?;

        let decremented = committed.events.iter().find_map(|e| match e {
            StockEvent::StockDecremented(d) => Some(d),
            _ => None,
        });
        let outcome = match decremented {
            Some(d) => DecrementOutcome {
                applied: d.applied,
                shortfall: (!d.shortfall.is_zero()).then_some(d.shortfall),
            },
            None => DecrementOutcome {
                applied: Quantity::ZERO,
                shortfall: None,
            },
        };
        if let Some(shortfall) = outcome.shortfall {
            tracing::warn!(
                %product_id,
                %warehouse_id,
                %loading_id,
                %shortfall,
                "stock went short; balance clamped at zero"
            );
        }
        Ok(outcome)
    }

    /// Every balance, sorted by product then warehouse, flagged when below
    /// the configured threshold.
    pub fn list_balances(&self) -> ServiceResult<Vec<BalanceView>> {
        let threshold = self.ctx.config.low_stock_threshold();
        let mut views = Vec::new();
        for v in self.ctx.stores.balances.find(&Filter::all())? {
            let balance = StockBalance::try_from(v)?;
            if let (Some(product_id), Some(warehouse_id)) = (balance.product_id(), balance.warehouse_id()) {
                views.push(BalanceView {
                    product_id,
                    warehouse_id,
                    current: balance.current(),
                    low: balance.is_low(threshold),
                });
            }
        }
        views.sort_by_key(|v| (v.product_id, v.warehouse_id));
        Ok(views)
    }

    /// Absorbed loadings whose own record shows the stock step done.
    fn settled_loadings(&self, balance: &StockBalance) -> ServiceResult<Vec<LoadingId>> {
        let mut settled = Vec::new();
        for loading_id in balance.absorbed_loadings() {
            let row = self.ctx.stores.loadings.get(loading_id.into())?;
            if row.is_some_and(|v| v.row.reconciled_stock) {
                settled.push(loading_id);
            }
        }
        Ok(settled)
    }

    /// Apply a command to the pair's balance, creating the row under the
    /// pair lock when none exists yet.
    fn mutate(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        command_for: impl Fn(&StockBalance) -> ServiceResult<StockCommand>,
    ) -> ServiceResult<Committed<StockBalance>> {
        let store = &*self.ctx.stores.balances;
        self.ctx.with_retries("stock.mutate", || {
            if let Some(balance) = self.find_balance(product_id, warehouse_id)? {
                let command = command_for(&balance)?;
                return self.ctx.dispatcher.dispatch(store, STOCK_BALANCE, &balance, &command);
            }
            self.ctx.balance_locks.with_lock(&(product_id, warehouse_id), || {
                let balance = match self.find_balance(product_id, warehouse_id)? {
                    Some(existing) => existing,
                    None => StockBalance::empty(StockBalanceId::new()),
                };
                let command = command_for(&balance)?;
                self.ctx.dispatcher.dispatch(store, STOCK_BALANCE, &balance, &command)
            })
        })
    }
}
