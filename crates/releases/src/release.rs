use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bulkyard_auth::PrincipalId;
use bulkyard_core::{
    Aggregate, AggregateRoot, DomainError, LoadingId, ProductId, Quantity, ReleaseId, WarehouseId,
};
use bulkyard_events::Event;

use crate::OrderReference;

/// Release lifecycle. Everything but `Cancelled` is derived from the withdrawn
/// quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Pending,
    Partial,
    Completed,
    Cancelled,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Pending => "pending",
            ReleaseStatus::Partial => "partial",
            ReleaseStatus::Completed => "completed",
            ReleaseStatus::Cancelled => "cancelled",
        }
    }

    fn derive(authorized: Quantity, withdrawn: Quantity) -> Self {
        if withdrawn.is_zero() {
            ReleaseStatus::Pending
        } else if withdrawn < authorized {
            ReleaseStatus::Partial
        } else {
            ReleaseStatus::Completed
        }
    }
}

impl core::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate root: Release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    id: ReleaseId,
    client: String,
    product_id: ProductId,
    warehouse_id: WarehouseId,
    authorized: Quantity,
    withdrawn: Quantity,
    order_reference: Option<OrderReference>,
    status: ReleaseStatus,
    created_by: Option<PrincipalId>,
    created_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancelled_by: Option<PrincipalId>,
    /// Loadings whose withdrawal has already been counted.
    absorbed_loadings: BTreeSet<LoadingId>,
    version: u64,
    created: bool,
}

/// Flat persisted form of a release, validated on the way back in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSnapshot {
    pub id: ReleaseId,
    pub client: String,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub authorized: Quantity,
    pub withdrawn: Quantity,
    pub order_reference: OrderReference,
    pub status: ReleaseStatus,
    pub created_by: PrincipalId,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<PrincipalId>,
    pub absorbed_loadings: BTreeSet<LoadingId>,
}

impl Release {
    /// Not-yet-created instance, the starting point for `CreateRelease`.
    pub fn empty(id: ReleaseId) -> Self {
        Self {
            id,
            client: String::new(),
            product_id: ProductId::from_uuid(Default::default()),
            warehouse_id: WarehouseId::from_uuid(Default::default()),
            authorized: Quantity::ZERO,
            withdrawn: Quantity::ZERO,
            order_reference: None,
            status: ReleaseStatus::Pending,
            created_by: None,
            created_at: None,
            cancelled_at: None,
            cancelled_by: None,
            absorbed_loadings: BTreeSet::new(),
            version: 0,
            created: false,
        }
    }

    /// Rebuild from storage, enforcing the ledger invariants.
    pub fn from_snapshot(snapshot: ReleaseSnapshot, version: u64) -> Result<Self, DomainError> {
        if snapshot.withdrawn > snapshot.authorized {
            return Err(DomainError::invalid_quantity(format!(
                "stored release {} has withdrawn {} above authorized {}",
                snapshot.id, snapshot.withdrawn, snapshot.authorized
            )));
        }
        let derived = ReleaseStatus::derive(snapshot.authorized, snapshot.withdrawn);
        let status = match snapshot.status {
            ReleaseStatus::Cancelled => ReleaseStatus::Cancelled,
            _ => derived,
        };
        Ok(Self {
            id: snapshot.id,
            client: snapshot.client,
            product_id: snapshot.product_id,
            warehouse_id: snapshot.warehouse_id,
            authorized: snapshot.authorized,
            withdrawn: snapshot.withdrawn,
            order_reference: Some(snapshot.order_reference),
            status,
            created_by: Some(snapshot.created_by),
            created_at: Some(snapshot.created_at),
            cancelled_at: snapshot.cancelled_at,
            cancelled_by: snapshot.cancelled_by,
            absorbed_loadings: snapshot.absorbed_loadings,
            version,
            created: true,
        })
    }

    /// `None` until the release has been created.
    pub fn snapshot(&self) -> Option<ReleaseSnapshot> {
        Some(ReleaseSnapshot {
            id: self.id,
            client: self.client.clone(),
            product_id: self.product_id,
            warehouse_id: self.warehouse_id,
            authorized: self.authorized,
            withdrawn: self.withdrawn,
            order_reference: self.order_reference.clone()?,
            status: self.status,
            created_by: self.created_by?,
            created_at: self.created_at?,
            cancelled_at: self.cancelled_at,
            cancelled_by: self.cancelled_by,
            absorbed_loadings: self.absorbed_loadings.clone(),
        })
    }

    pub fn id_typed(&self) -> ReleaseId {
        self.id
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn authorized(&self) -> Quantity {
        self.authorized
    }

    pub fn withdrawn(&self) -> Quantity {
        self.withdrawn
    }

    pub fn order_reference(&self) -> Option<&OrderReference> {
        self.order_reference.as_ref()
    }

    pub fn status(&self) -> ReleaseStatus {
        self.status
    }

    pub fn created_by(&self) -> Option<PrincipalId> {
        self.created_by
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == ReleaseStatus::Cancelled
    }

    pub fn has_absorbed(&self, loading_id: LoadingId) -> bool {
        self.absorbed_loadings.contains(&loading_id)
    }

    /// `authorized - withdrawn`, clamped at zero.
    pub fn remaining(&self) -> Quantity {
        self.authorized.saturating_sub(self.withdrawn)
    }

    /// Capacity left for new reservations given what active schedules and
    /// open loadings already hold. Zero once cancelled.
    pub fn allocatable(&self, reserved: Quantity) -> Quantity {
        if self.is_cancelled() {
            return Quantity::ZERO;
        }
        self.remaining().saturating_sub(reserved)
    }

    /// Reject a reservation that does not fit, or any reservation against a
    /// cancelled release.
    pub fn ensure_can_allocate(&self, requested: Quantity, reserved: Quantity) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.is_cancelled() {
            return Err(DomainError::transition("release", self.status, "allocated"));
        }
        let remaining = self.allocatable(reserved);
        if requested > remaining {
            return Err(DomainError::CapacityExceeded {
                requested,
                remaining,
            });
        }
        Ok(())
    }
}

impl AggregateRoot for Release {
    type Id = ReleaseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateRelease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRelease {
    pub release_id: ReleaseId,
    pub client: String,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub authorized_quantity: Decimal,
    pub order_reference: String,
    pub created_by: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelRelease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRelease {
    pub release_id: ReleaseId,
    pub cancelled_by: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordWithdrawal (issued only by loading completion).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordWithdrawal {
    pub release_id: ReleaseId,
    pub loading_id: LoadingId,
    pub quantity: Quantity,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseCommand {
    CreateRelease(CreateRelease),
    CancelRelease(CancelRelease),
    RecordWithdrawal(RecordWithdrawal),
}

/// Event: ReleaseCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseCreated {
    pub release_id: ReleaseId,
    pub client: String,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub authorized: Quantity,
    pub order_reference: OrderReference,
    pub created_by: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReleaseCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseCancelled {
    pub release_id: ReleaseId,
    pub cancelled_by: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: WithdrawalRecorded.
///
/// `applied` is what was actually added to the withdrawn total; a non-zero
/// `excess` means the request would have overrun the authorization and was
/// clamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRecorded {
    pub release_id: ReleaseId,
    pub loading_id: LoadingId,
    pub requested: Quantity,
    pub applied: Quantity,
    pub excess: Quantity,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseEvent {
    ReleaseCreated(ReleaseCreated),
    ReleaseCancelled(ReleaseCancelled),
    WithdrawalRecorded(WithdrawalRecorded),
}

impl Event for ReleaseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReleaseEvent::ReleaseCreated(_) => "release.created",
            ReleaseEvent::ReleaseCancelled(_) => "release.cancelled",
            ReleaseEvent::WithdrawalRecorded(_) => "release.withdrawal_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReleaseEvent::ReleaseCreated(e) => e.occurred_at,
            ReleaseEvent::ReleaseCancelled(e) => e.occurred_at,
            ReleaseEvent::WithdrawalRecorded(e) => e.occurred_at,
        }
    }

    fn describe(&self) -> String {
        match self {
            ReleaseEvent::ReleaseCreated(e) => format!(
                "{} released to {} ({})",
                e.authorized, e.client, e.order_reference
            ),
            ReleaseEvent::ReleaseCancelled(e) => format!("release {} cancelled", e.release_id),
            ReleaseEvent::WithdrawalRecorded(e) => {
                format!("{} withdrawn from release {}", e.applied, e.release_id)
            }
        }
    }
}

impl Aggregate for Release {
    type Command = ReleaseCommand;
    type Event = ReleaseEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReleaseEvent::ReleaseCreated(e) => {
                self.id = e.release_id;
                self.client = e.client.clone();
                self.product_id = e.product_id;
                self.warehouse_id = e.warehouse_id;
                self.authorized = e.authorized;
                self.withdrawn = Quantity::ZERO;
                self.order_reference = Some(e.order_reference.clone());
                self.status = ReleaseStatus::Pending;
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            ReleaseEvent::ReleaseCancelled(e) => {
                self.status = ReleaseStatus::Cancelled;
                self.cancelled_at = Some(e.occurred_at);
                self.cancelled_by = Some(e.cancelled_by);
            }
            ReleaseEvent::WithdrawalRecorded(e) => {
                self.withdrawn = self.withdrawn.plus(e.applied);
                self.absorbed_loadings.insert(e.loading_id);
                if self.status != ReleaseStatus::Cancelled {
                    self.status = ReleaseStatus::derive(self.authorized, self.withdrawn);
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReleaseCommand::CreateRelease(cmd) => self.handle_create(cmd),
            ReleaseCommand::CancelRelease(cmd) => self.handle_cancel(cmd),
            ReleaseCommand::RecordWithdrawal(cmd) => self.handle_withdrawal(cmd),
        }
    }
}

impl Release {
    fn ensure_release_id(&self, release_id: ReleaseId) -> Result<(), DomainError> {
        if self.id != release_id {
            return Err(DomainError::conflict("release_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateRelease) -> Result<Vec<ReleaseEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("release already exists"));
        }
        let authorized = Quantity::positive(cmd.authorized_quantity)?;
        let order_reference = OrderReference::parse(&cmd.order_reference)?;
        let client = cmd.client.trim();
        if client.is_empty() {
            return Err(DomainError::MissingField("client"));
        }

        Ok(vec![ReleaseEvent::ReleaseCreated(ReleaseCreated {
            release_id: cmd.release_id,
            client: client.to_string(),
            product_id: cmd.product_id,
            warehouse_id: cmd.warehouse_id,
            authorized,
            order_reference,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelRelease) -> Result<Vec<ReleaseEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_release_id(cmd.release_id)?;

        if !matches!(self.status, ReleaseStatus::Pending | ReleaseStatus::Partial) {
            return Err(DomainError::transition("release", self.status, ReleaseStatus::Cancelled));
        }

        Ok(vec![ReleaseEvent::ReleaseCancelled(ReleaseCancelled {
            release_id: cmd.release_id,
            cancelled_by: cmd.cancelled_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Never fails on overrun: the physical loading already happened, so the
    /// excess is clamped and reported on the event instead.
    fn handle_withdrawal(&self, cmd: &RecordWithdrawal) -> Result<Vec<ReleaseEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_release_id(cmd.release_id)?;

        if cmd.quantity.is_zero() {
            return Err(DomainError::invalid_quantity("withdrawal must be greater than zero"));
        }
        if self.has_absorbed(cmd.loading_id) {
            return Ok(vec![]);
        }

        let headroom = self.remaining();
        let applied = if cmd.quantity > headroom { headroom } else { cmd.quantity };
        let excess = cmd.quantity.saturating_sub(applied);

        Ok(vec![ReleaseEvent::WithdrawalRecorded(WithdrawalRecorded {
            release_id: cmd.release_id,
            loading_id: cmd.loading_id,
            requested: cmd.quantity,
            applied,
            excess,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkyard_events::execute;
    use proptest::prelude::*;

    fn created(authorized: u32) -> Release {
        let id = ReleaseId::new();
        let mut release = Release::empty(id);
        execute(
            &mut release,
            &ReleaseCommand::CreateRelease(CreateRelease {
                release_id: id,
                client: "Fazenda Boa Vista".to_string(),
                product_id: ProductId::new(),
                warehouse_id: WarehouseId::new(),
                authorized_quantity: Decimal::from(authorized),
                order_reference: "PED-2024-0001".to_string(),
                created_by: PrincipalId::new(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        release
    }

    fn withdraw(release: &mut Release, quantity: u32) -> Vec<ReleaseEvent> {
        let cmd = ReleaseCommand::RecordWithdrawal(RecordWithdrawal {
            release_id: release.id_typed(),
            loading_id: LoadingId::new(),
            quantity: Quantity::from(quantity),
            occurred_at: Utc::now(),
        });
        execute(release, &cmd).unwrap()
    }

    #[test]
    fn create_starts_pending_with_full_remaining() {
        let release = created(10);
        assert_eq!(release.status(), ReleaseStatus::Pending);
        assert_eq!(release.remaining(), Quantity::from(10));
        assert_eq!(release.version(), 1);
    }

    #[test]
    fn create_rejects_non_positive_quantity_and_bad_reference() {
        let id = ReleaseId::new();
        let release = Release::empty(id);
        let mut cmd = CreateRelease {
            release_id: id,
            client: "Cliente ABC".to_string(),
            product_id: ProductId::new(),
            warehouse_id: WarehouseId::new(),
            authorized_quantity: Decimal::ZERO,
            order_reference: "PED-2024-0001".to_string(),
            created_by: PrincipalId::new(),
            occurred_at: Utc::now(),
        };
        let err = release.handle(&ReleaseCommand::CreateRelease(cmd.clone())).unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));

        cmd.authorized_quantity = Decimal::from(5);
        cmd.order_reference = "2024-0001".to_string();
        let err = release.handle(&ReleaseCommand::CreateRelease(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidReference(_)));
    }

    #[test]
    fn status_follows_withdrawn_quantity() {
        let mut release = created(10);
        withdraw(&mut release, 4);
        assert_eq!(release.status(), ReleaseStatus::Partial);
        withdraw(&mut release, 6);
        assert_eq!(release.status(), ReleaseStatus::Completed);
        assert_eq!(release.remaining(), Quantity::ZERO);
    }

    #[test]
    fn over_withdrawal_is_clamped_and_reported() {
        let mut release = created(10);
        withdraw(&mut release, 8);
        let events = withdraw(&mut release, 5);
        match &events[0] {
            ReleaseEvent::WithdrawalRecorded(e) => {
                assert_eq!(e.applied, Quantity::from(2));
                assert_eq!(e.excess, Quantity::from(3));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(release.withdrawn(), Quantity::from(10));
    }

    #[test]
    fn same_loading_is_absorbed_once() {
        let mut release = created(10);
        let cmd = ReleaseCommand::RecordWithdrawal(RecordWithdrawal {
            release_id: release.id_typed(),
            loading_id: LoadingId::new(),
            quantity: Quantity::from(3),
            occurred_at: Utc::now(),
        });
        assert_eq!(execute(&mut release, &cmd).unwrap().len(), 1);
        assert!(execute(&mut release, &cmd).unwrap().is_empty());
        assert_eq!(release.withdrawn(), Quantity::from(3));
    }

    #[test]
    fn cancel_only_from_pending_or_partial() {
        let mut release = created(10);
        withdraw(&mut release, 10);
        let cmd = ReleaseCommand::CancelRelease(CancelRelease {
            release_id: release.id_typed(),
            cancelled_by: PrincipalId::new(),
            occurred_at: Utc::now(),
        });
        let err = release.handle(&cmd).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));

        let mut open = created(10);
        let cmd = ReleaseCommand::CancelRelease(CancelRelease {
            release_id: open.id_typed(),
            cancelled_by: PrincipalId::new(),
            occurred_at: Utc::now(),
        });
        execute(&mut open, &cmd).unwrap();
        assert!(open.is_cancelled());
        assert_eq!(open.allocatable(Quantity::ZERO), Quantity::ZERO);
        let err = open.handle(&cmd).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn allocation_respects_reservations() {
        let release = created(10);
        assert!(release.ensure_can_allocate(Quantity::from(6), Quantity::from(4)).is_ok());
        let err = release
            .ensure_can_allocate(Quantity::from(7), Quantity::from(4))
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::CapacityExceeded {
                requested: Quantity::from(7),
                remaining: Quantity::from(6),
            }
        );
    }

    #[test]
    fn snapshot_roundtrip_rejects_overdrawn_rows() {
        let release = created(10);
        let mut snap = release.snapshot().unwrap();
        let restored = Release::from_snapshot(snap.clone(), release.version()).unwrap();
        assert_eq!(restored, release);

        snap.withdrawn = Quantity::from(11);
        assert!(Release::from_snapshot(snap, 1).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: withdrawn stays within [0, authorized] for any sequence.
        #[test]
        fn withdrawn_never_exceeds_authorized(
            authorized in 1u32..1_000,
            withdrawals in prop::collection::vec(1u32..500, 0..20)
        ) {
            let mut release = created(authorized);
            for q in withdrawals {
                withdraw(&mut release, q);
                prop_assert!(release.withdrawn() <= release.authorized());
            }
        }
    }
}
