use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bulkyard_auth::PrincipalId;
use bulkyard_core::{
    Aggregate, AggregateRoot, DomainError, LoadingId, ProductId, Quantity, StockBalanceId,
    WarehouseId,
};
use bulkyard_events::Event;

/// Aggregate root: StockBalance.
///
/// `current` never goes negative. Decrements clamp at zero and report the
/// shortfall on the event instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockBalance {
    id: StockBalanceId,
    product_id: Option<ProductId>,
    warehouse_id: Option<WarehouseId>,
    current: Quantity,
    updated_by: Option<PrincipalId>,
    updated_at: Option<DateTime<Utc>>,
    absorbed_loadings: BTreeSet<LoadingId>,
    version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalanceSnapshot {
    pub id: StockBalanceId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub current: Quantity,
    pub updated_by: Option<PrincipalId>,
    pub updated_at: Option<DateTime<Utc>>,
    pub absorbed_loadings: BTreeSet<LoadingId>,
}

impl StockBalance {
    pub fn empty(id: StockBalanceId) -> Self {
        Self {
            id,
            product_id: None,
            warehouse_id: None,
            current: Quantity::ZERO,
            updated_by: None,
            updated_at: None,
            absorbed_loadings: BTreeSet::new(),
            version: 0,
        }
    }

    pub fn from_snapshot(snapshot: StockBalanceSnapshot, version: u64) -> Self {
        Self {
            id: snapshot.id,
            product_id: Some(snapshot.product_id),
            warehouse_id: Some(snapshot.warehouse_id),
            current: snapshot.current,
            updated_by: snapshot.updated_by,
            updated_at: snapshot.updated_at,
            absorbed_loadings: snapshot.absorbed_loadings,
            version,
        }
    }

    pub fn snapshot(&self) -> Option<StockBalanceSnapshot> {
        Some(StockBalanceSnapshot {
            id: self.id,
            product_id: self.product_id?,
            warehouse_id: self.warehouse_id?,
            current: self.current,
            updated_by: self.updated_by,
            updated_at: self.updated_at,
            absorbed_loadings: self.absorbed_loadings.clone(),
        })
    }

    pub fn id_typed(&self) -> StockBalanceId {
        self.id
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn current(&self) -> Quantity {
        self.current
    }

    pub fn has_absorbed(&self, loading_id: LoadingId) -> bool {
        self.absorbed_loadings.contains(&loading_id)
    }

    /// Loadings already taken out of this balance and not yet settled.
    pub fn absorbed_loadings(&self) -> impl Iterator<Item = LoadingId> + '_ {
        self.absorbed_loadings.iter().copied()
    }

    /// Strictly below the threshold.
    pub fn is_low(&self, threshold: Quantity) -> bool {
        self.current < threshold
    }
}

impl AggregateRoot for StockBalance {
    type Id = StockBalanceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ReceiveStock. Creates the balance on first receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub balance_id: StockBalanceId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: Decimal,
    pub actor: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetBalance (inventory count overwrite).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetBalance {
    pub balance_id: StockBalanceId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: Decimal,
    pub actor: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DecrementStock, issued by loading completion. A missing balance
/// is treated as zero on hand.
///
/// `settled` names absorbed loadings that have recorded their decrement and
/// will never repeat it; they are dropped from the absorbed set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecrementStock {
    pub balance_id: StockBalanceId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub loading_id: LoadingId,
    pub quantity: Quantity,
    #[serde(default)]
    pub settled: Vec<LoadingId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    ReceiveStock(ReceiveStock),
    SetBalance(SetBalance),
    DecrementStock(DecrementStock),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceived {
    pub balance_id: StockBalanceId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: Quantity,
    pub actor: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSet {
    pub balance_id: StockBalanceId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub previous: Quantity,
    pub quantity: Quantity,
    pub actor: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDecremented {
    pub balance_id: StockBalanceId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub loading_id: LoadingId,
    pub requested: Quantity,
    pub applied: Quantity,
    pub shortfall: Quantity,
    #[serde(default)]
    pub settled: Vec<LoadingId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    StockReceived(StockReceived),
    BalanceSet(BalanceSet),
    StockDecremented(StockDecremented),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::StockReceived(_) => "stock.received",
            StockEvent::BalanceSet(_) => "stock.balance_set",
            StockEvent::StockDecremented(_) => "stock.decremented",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::StockReceived(e) => e.occurred_at,
            StockEvent::BalanceSet(e) => e.occurred_at,
            StockEvent::StockDecremented(e) => e.occurred_at,
        }
    }

    fn describe(&self) -> String {
        match self {
            StockEvent::StockReceived(e) => format!("{} received into stock", e.quantity),
            StockEvent::BalanceSet(e) => {
                format!("stock counted: {} (was {})", e.quantity, e.previous)
            }
            StockEvent::StockDecremented(e) => {
                format!("{} shipped out of stock", e.applied)
            }
        }
    }
}

impl Aggregate for StockBalance {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::StockReceived(e) => {
                self.product_id = Some(e.product_id);
                self.warehouse_id = Some(e.warehouse_id);
                self.current = self.current.plus(e.quantity);
                self.updated_by = Some(e.actor);
                self.updated_at = Some(e.occurred_at);
            }
            StockEvent::BalanceSet(e) => {
                self.product_id = Some(e.product_id);
                self.warehouse_id = Some(e.warehouse_id);
                self.current = e.quantity;
                self.updated_by = Some(e.actor);
                self.updated_at = Some(e.occurred_at);
            }
            StockEvent::StockDecremented(e) => {
                self.product_id = Some(e.product_id);
                self.warehouse_id = Some(e.warehouse_id);
                self.current = self.current.saturating_sub(e.applied);
                for settled in &e.settled {
                    self.absorbed_loadings.remove(settled);
                }
                self.absorbed_loadings.insert(e.loading_id);
                self.updated_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::ReceiveStock(cmd) => self.handle_receive(cmd),
            StockCommand::SetBalance(cmd) => self.handle_set(cmd),
            StockCommand::DecrementStock(cmd) => self.handle_decrement(cmd),
        }
    }
}

impl StockBalance {
    fn ensure_pair(&self, product_id: ProductId, warehouse_id: WarehouseId) -> Result<(), DomainError> {
        match (self.product_id, self.warehouse_id) {
            (Some(p), Some(w)) if p != product_id || w != warehouse_id => {
                Err(DomainError::conflict("product/warehouse mismatch"))
            }
            _ => Ok(()),
        }
    }

    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_pair(cmd.product_id, cmd.warehouse_id)?;
        let quantity = Quantity::positive(cmd.quantity)?;

        Ok(vec![StockEvent::StockReceived(StockReceived {
            balance_id: cmd.balance_id,
            product_id: cmd.product_id,
            warehouse_id: cmd.warehouse_id,
            quantity,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set(&self, cmd: &SetBalance) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_pair(cmd.product_id, cmd.warehouse_id)?;
        let quantity = Quantity::new(cmd.quantity)?;

        Ok(vec![StockEvent::BalanceSet(BalanceSet {
            balance_id: cmd.balance_id,
            product_id: cmd.product_id,
            warehouse_id: cmd.warehouse_id,
            previous: self.current,
            quantity,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_decrement(&self, cmd: &DecrementStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_pair(cmd.product_id, cmd.warehouse_id)?;
        if self.has_absorbed(cmd.loading_id) {
            return Ok(vec![]);
        }

        let applied = if cmd.quantity > self.current { self.current } else { cmd.quantity };
        let settled = cmd
            .settled
            .iter()
            .copied()
            .filter(|id| *id != cmd.loading_id && self.has_absorbed(*id))
            .collect();
        Ok(vec![StockEvent::StockDecremented(StockDecremented {
            balance_id: cmd.balance_id,
            product_id: cmd.product_id,
            warehouse_id: cmd.warehouse_id,
            loading_id: cmd.loading_id,
            requested: cmd.quantity,
            applied,
            shortfall: cmd.quantity.saturating_sub(applied),
            settled,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkyard_events::execute;
    use proptest::prelude::*;

    struct Pair {
        product_id: ProductId,
        warehouse_id: WarehouseId,
    }

    fn stocked(pair: &Pair, quantity: u32) -> StockBalance {
        let id = StockBalanceId::new();
        let mut balance = StockBalance::empty(id);
        let cmd = StockCommand::SetBalance(SetBalance {
            balance_id: id,
            product_id: pair.product_id,
            warehouse_id: pair.warehouse_id,
            quantity: Decimal::from(quantity),
            actor: PrincipalId::new(),
            occurred_at: Utc::now(),
        });
        execute(&mut balance, &cmd).unwrap();
        balance
    }

    fn decrement(balance: &mut StockBalance, pair: &Pair, loading_id: LoadingId, quantity: u32) -> Vec<StockEvent> {
        decrement_settling(balance, pair, loading_id, quantity, vec![])
    }

    fn decrement_settling(
        balance: &mut StockBalance,
        pair: &Pair,
        loading_id: LoadingId,
        quantity: u32,
        settled: Vec<LoadingId>,
    ) -> Vec<StockEvent> {
        let cmd = StockCommand::DecrementStock(DecrementStock {
            balance_id: balance.id_typed(),
            product_id: pair.product_id,
            warehouse_id: pair.warehouse_id,
            loading_id,
            quantity: Quantity::from(quantity),
            settled,
            occurred_at: Utc::now(),
        });
        execute(balance, &cmd).unwrap()
    }

    fn pair() -> Pair {
        Pair {
            product_id: ProductId::new(),
            warehouse_id: WarehouseId::new(),
        }
    }

    #[test]
    fn decrement_clamps_at_zero() {
        let pair = pair();
        let mut balance = stocked(&pair, 30);
        let events = decrement(&mut balance, &pair, LoadingId::new(), 50);
        assert_eq!(balance.current(), Quantity::ZERO);
        match &events[0] {
            StockEvent::StockDecremented(e) => {
                assert_eq!(e.applied, Quantity::from(30));
                assert_eq!(e.shortfall, Quantity::from(20));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn decrement_is_idempotent_per_loading() {
        let pair = pair();
        let mut balance = stocked(&pair, 30);
        let loading_id = LoadingId::new();
        decrement(&mut balance, &pair, loading_id, 4);
        assert!(decrement(&mut balance, &pair, loading_id, 4).is_empty());
        assert_eq!(balance.current(), Quantity::from(26));
    }

    #[test]
    fn settled_loadings_leave_the_absorbed_set() {
        let pair = pair();
        let mut balance = stocked(&pair, 30);
        let first = LoadingId::new();
        let second = LoadingId::new();
        decrement(&mut balance, &pair, first, 4);

        let unknown = LoadingId::new();
        let events = decrement_settling(&mut balance, &pair, second, 4, vec![first, second, unknown]);
        match &events[0] {
            StockEvent::StockDecremented(e) => assert_eq!(e.settled, vec![first]),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!balance.has_absorbed(first));
        assert!(balance.has_absorbed(second));
        assert_eq!(balance.absorbed_loadings().collect::<Vec<_>>(), vec![second]);
        assert_eq!(balance.current(), Quantity::from(22));
    }

    #[test]
    fn decrement_on_missing_balance_creates_an_empty_one() {
        let pair = pair();
        let mut balance = StockBalance::empty(StockBalanceId::new());
        decrement(&mut balance, &pair, LoadingId::new(), 4);
        assert_eq!(balance.current(), Quantity::ZERO);
        assert_eq!(balance.product_id(), Some(pair.product_id));
    }

    #[test]
    fn receive_adds_and_rejects_non_positive() {
        let pair = pair();
        let mut balance = stocked(&pair, 5);
        let cmd = StockCommand::ReceiveStock(ReceiveStock {
            balance_id: balance.id_typed(),
            product_id: pair.product_id,
            warehouse_id: pair.warehouse_id,
            quantity: Decimal::new(25, 1),
            actor: PrincipalId::new(),
            occurred_at: Utc::now(),
        });
        execute(&mut balance, &cmd).unwrap();
        assert_eq!(balance.current().value(), Decimal::new(75, 1));

        let bad = StockCommand::ReceiveStock(ReceiveStock {
            balance_id: balance.id_typed(),
            product_id: pair.product_id,
            warehouse_id: pair.warehouse_id,
            quantity: Decimal::ZERO,
            actor: PrincipalId::new(),
            occurred_at: Utc::now(),
        });
        assert!(matches!(balance.handle(&bad).unwrap_err(), DomainError::InvalidQuantity(_)));
    }

    #[test]
    fn low_flag_is_strict() {
        let pair = pair();
        let balance = stocked(&pair, 10);
        assert!(!balance.is_low(Quantity::from(10)));
        assert!(balance.is_low(Quantity::from(11)));
    }

    #[test]
    fn other_pair_is_rejected() {
        let balance = stocked(&pair(), 10);
        let other = pair();
        let cmd = StockCommand::SetBalance(SetBalance {
            balance_id: balance.id_typed(),
            product_id: other.product_id,
            warehouse_id: other.warehouse_id,
            quantity: Decimal::ONE,
            actor: PrincipalId::new(),
            occurred_at: Utc::now(),
        });
        assert!(matches!(balance.handle(&cmd).unwrap_err(), DomainError::Conflict(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any decrement sequence leaves `max(0, start - sum)`.
        #[test]
        fn balance_never_negative(
            start in 0u32..1_000,
            decrements in prop::collection::vec(0u32..400, 0..16)
        ) {
            let pair = pair();
            let mut balance = stocked(&pair, start);
            let total: u32 = decrements.iter().sum();
            for q in decrements {
                decrement(&mut balance, &pair, LoadingId::new(), q);
            }
            let expected = Quantity::from(start).saturating_sub(Quantity::from(total));
            prop_assert_eq!(balance.current(), expected);
        }
    }
}
