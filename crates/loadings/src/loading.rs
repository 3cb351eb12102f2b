use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use bulkyard_auth::PrincipalId;
use bulkyard_core::{
    Aggregate, AggregateRoot, DomainError, LoadingId, PhotoId, ProductId, Quantity, ReleaseId,
    ScheduleId, WarehouseId,
};
use bulkyard_events::Event;

use crate::evidence::{EvidenceType, PhotoCounts, ensure_format};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingStatus {
    Waiting,
    InProgress,
    Completed,
    Cancelled,
}

impl LoadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadingStatus::Waiting => "waiting",
            LoadingStatus::InProgress => "in_progress",
            LoadingStatus::Completed => "completed",
            LoadingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadingStatus::Completed | LoadingStatus::Cancelled)
    }

    pub fn can_transition_to(&self, target: LoadingStatus) -> bool {
        matches!(
            (self, target),
            (LoadingStatus::Waiting, LoadingStatus::InProgress)
                | (LoadingStatus::Waiting, LoadingStatus::Cancelled)
                | (LoadingStatus::Waiting, LoadingStatus::Completed)
                | (LoadingStatus::InProgress, LoadingStatus::Completed)
                | (LoadingStatus::InProgress, LoadingStatus::Cancelled)
        )
    }
}

impl core::fmt::Display for LoadingStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDetails {
    pub number: String,
    pub date: NaiveDate,
    pub file_ref: String,
}

/// Post-completion write applied outside this aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStep {
    ReleaseWithdrawal,
    StockDecrement,
    ScheduleCompletion,
}

impl ReconciliationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStep::ReleaseWithdrawal => "release_withdrawal",
            ReconciliationStep::StockDecrement => "stock_decrement",
            ReconciliationStep::ScheduleCompletion => "schedule_completion",
        }
    }
}

impl core::fmt::Display for ReconciliationStep {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which reconciliation steps have been acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationState {
    pub release_withdrawn: bool,
    pub stock_decremented: bool,
    pub schedule_completed: bool,
}

impl ReconciliationState {
    pub fn is_done(&self, step: ReconciliationStep) -> bool {
        match step {
            ReconciliationStep::ReleaseWithdrawal => self.release_withdrawn,
            ReconciliationStep::StockDecrement => self.stock_decremented,
            ReconciliationStep::ScheduleCompletion => self.schedule_completed,
        }
    }

    fn mark(&mut self, step: ReconciliationStep) {
        match step {
            ReconciliationStep::ReleaseWithdrawal => self.release_withdrawn = true,
            ReconciliationStep::StockDecrement => self.stock_decremented = true,
            ReconciliationStep::ScheduleCompletion => self.schedule_completed = true,
        }
    }
}

/// Aggregate root: Loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loading {
    id: LoadingId,
    release_id: Option<ReleaseId>,
    schedule_id: Option<ScheduleId>,
    product_id: Option<ProductId>,
    warehouse_id: Option<WarehouseId>,
    planned_quantity: Quantity,
    status: LoadingStatus,
    photo_counts: PhotoCounts,
    invoice: Option<InvoiceDetails>,
    status_note: Option<String>,
    updated_by: Option<PrincipalId>,
    opened_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    reconciliation: ReconciliationState,
    version: u64,
}

/// Persisted form. Photo counts are rebuilt from the photo rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingSnapshot {
    pub id: LoadingId,
    pub release_id: ReleaseId,
    pub schedule_id: Option<ScheduleId>,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub planned_quantity: Quantity,
    pub status: LoadingStatus,
    pub photo_counts: PhotoCounts,
    pub invoice: Option<InvoiceDetails>,
    pub status_note: Option<String>,
    pub updated_by: Option<PrincipalId>,
    pub opened_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub reconciliation: ReconciliationState,
}

impl Loading {
    pub fn empty(id: LoadingId) -> Self {
        Self {
            id,
            release_id: None,
            schedule_id: None,
            product_id: None,
            warehouse_id: None,
            planned_quantity: Quantity::ZERO,
            status: LoadingStatus::Waiting,
            photo_counts: PhotoCounts::new(),
            invoice: None,
            status_note: None,
            updated_by: None,
            opened_at: None,
            completed_at: None,
            reconciliation: ReconciliationState::default(),
            version: 0,
        }
    }

    pub fn from_snapshot(snapshot: LoadingSnapshot, version: u64) -> Result<Self, DomainError> {
        if snapshot.planned_quantity.is_zero() {
            return Err(DomainError::invalid_quantity(format!(
                "stored loading {} has zero planned quantity",
                snapshot.id
            )));
        }
        Ok(Self {
            id: snapshot.id,
            release_id: Some(snapshot.release_id),
            schedule_id: snapshot.schedule_id,
            product_id: Some(snapshot.product_id),
            warehouse_id: Some(snapshot.warehouse_id),
            planned_quantity: snapshot.planned_quantity,
            status: snapshot.status,
            photo_counts: snapshot.photo_counts,
            invoice: snapshot.invoice,
            status_note: snapshot.status_note,
            updated_by: snapshot.updated_by,
            opened_at: Some(snapshot.opened_at),
            completed_at: snapshot.completed_at,
            reconciliation: snapshot.reconciliation,
            version,
        })
    }

    pub fn snapshot(&self) -> Option<LoadingSnapshot> {
        Some(LoadingSnapshot {
            id: self.id,
            release_id: self.release_id?,
            schedule_id: self.schedule_id,
            product_id: self.product_id?,
            warehouse_id: self.warehouse_id?,
            planned_quantity: self.planned_quantity,
            status: self.status,
            photo_counts: self.photo_counts.clone(),
            invoice: self.invoice.clone(),
            status_note: self.status_note.clone(),
            updated_by: self.updated_by,
            opened_at: self.opened_at?,
            completed_at: self.completed_at,
            reconciliation: self.reconciliation,
        })
    }

    pub fn id_typed(&self) -> LoadingId {
        self.id
    }

    pub fn release_id(&self) -> Option<ReleaseId> {
        self.release_id
    }

    pub fn schedule_id(&self) -> Option<ScheduleId> {
        self.schedule_id
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn planned_quantity(&self) -> Quantity {
        self.planned_quantity
    }

    pub fn status(&self) -> LoadingStatus {
        self.status
    }

    pub fn photo_counts(&self) -> &PhotoCounts {
        &self.photo_counts
    }

    pub fn invoice(&self) -> Option<&InvoiceDetails> {
        self.invoice.as_ref()
    }

    pub fn status_note(&self) -> Option<&str> {
        self.status_note.as_deref()
    }

    pub fn reconciliation(&self) -> ReconciliationState {
        self.reconciliation
    }

    /// Quantity this loading holds against its release on top of what the
    /// release's schedules and recorded withdrawals already account for.
    ///
    /// `schedule_active` tells whether the originating schedule still holds
    /// its own reservation. A completed loading keeps its planned quantity
    /// reserved until the withdrawal is acknowledged.
    pub fn reserved_against_release(&self, schedule_active: bool) -> Quantity {
        let covered_by_schedule = self.schedule_id.is_some() && schedule_active;
        match self.status {
            LoadingStatus::Cancelled => Quantity::ZERO,
            _ if covered_by_schedule => Quantity::ZERO,
            LoadingStatus::Completed if self.reconciliation.release_withdrawn => Quantity::ZERO,
            _ => self.planned_quantity,
        }
    }

    /// Reconciliation steps still outstanding. Empty unless completed.
    pub fn pending_steps(&self) -> Vec<ReconciliationStep> {
        if self.status != LoadingStatus::Completed {
            return vec![];
        }
        let mut steps = vec![
            ReconciliationStep::ReleaseWithdrawal,
            ReconciliationStep::StockDecrement,
        ];
        if self.schedule_id.is_some() {
            steps.push(ReconciliationStep::ScheduleCompletion);
        }
        steps.retain(|s| !self.reconciliation.is_done(*s));
        steps
    }

    /// Evidence may only be attached while the loading is open.
    pub fn ensure_accepts_evidence(&self) -> Result<(), DomainError> {
        if self.release_id.is_none() {
            return Err(DomainError::not_found());
        }
        if self.status.is_terminal() {
            return Err(DomainError::transition("loading", self.status, "evidence attached"));
        }
        Ok(())
    }
}

impl AggregateRoot for Loading {
    type Id = LoadingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenLoading. Capacity and schedule checks happen in the caller
/// under the release lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenLoading {
    pub loading_id: LoadingId,
    pub release_id: ReleaseId,
    pub schedule_id: Option<ScheduleId>,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub planned_quantity: Quantity,
    pub opened_by: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPhoto, issued once the binary is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPhoto {
    pub loading_id: LoadingId,
    pub photo_id: PhotoId,
    pub evidence_type: EvidenceType,
    pub storage_ref: String,
    pub uploaded_by: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterInvoice {
    pub loading_id: LoadingId,
    pub photo_id: PhotoId,
    pub number: String,
    pub date: NaiveDate,
    pub file_ref: String,
    pub today: NaiveDate,
    pub registered_by: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionLoading {
    pub loading_id: LoadingId,
    pub target: LoadingStatus,
    pub observation: Option<String>,
    pub actor: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AcknowledgeReconciliation. Repeats are no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgeReconciliation {
    pub loading_id: LoadingId,
    pub step: ReconciliationStep,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadingCommand {
    OpenLoading(OpenLoading),
    RecordPhoto(RecordPhoto),
    RegisterInvoice(RegisterInvoice),
    TransitionLoading(TransitionLoading),
    AcknowledgeReconciliation(AcknowledgeReconciliation),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingOpened {
    pub loading_id: LoadingId,
    pub release_id: ReleaseId,
    pub schedule_id: Option<ScheduleId>,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub planned_quantity: Quantity,
    pub opened_by: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRecorded {
    pub loading_id: LoadingId,
    pub photo_id: PhotoId,
    pub evidence_type: EvidenceType,
    pub storage_ref: String,
    pub uploaded_by: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

/// Also counts as one `invoice` evidence item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRegistered {
    pub loading_id: LoadingId,
    pub photo_id: PhotoId,
    pub invoice: InvoiceDetails,
    pub registered_by: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingStarted {
    pub loading_id: LoadingId,
    pub observation: Option<String>,
    pub actor: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

/// Carries everything reconciliation needs so it can run without reloading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingCompleted {
    pub loading_id: LoadingId,
    pub release_id: ReleaseId,
    pub schedule_id: Option<ScheduleId>,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: Quantity,
    pub observation: Option<String>,
    pub actor: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingCancelled {
    pub loading_id: LoadingId,
    pub reason: String,
    pub actor: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationAcknowledged {
    pub loading_id: LoadingId,
    pub step: ReconciliationStep,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadingEvent {
    LoadingOpened(LoadingOpened),
    PhotoRecorded(PhotoRecorded),
    InvoiceRegistered(InvoiceRegistered),
    LoadingStarted(LoadingStarted),
    LoadingCompleted(LoadingCompleted),
    LoadingCancelled(LoadingCancelled),
    ReconciliationAcknowledged(ReconciliationAcknowledged),
}

impl Event for LoadingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LoadingEvent::LoadingOpened(_) => "loading.opened",
            LoadingEvent::PhotoRecorded(_) => "loading.photo_recorded",
            LoadingEvent::InvoiceRegistered(_) => "loading.invoice_registered",
            LoadingEvent::LoadingStarted(_) => "loading.started",
            LoadingEvent::LoadingCompleted(_) => "loading.completed",
            LoadingEvent::LoadingCancelled(_) => "loading.cancelled",
            LoadingEvent::ReconciliationAcknowledged(_) => "loading.reconciled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LoadingEvent::LoadingOpened(e) => e.occurred_at,
            LoadingEvent::PhotoRecorded(e) => e.occurred_at,
            LoadingEvent::InvoiceRegistered(e) => e.occurred_at,
            LoadingEvent::LoadingStarted(e) => e.occurred_at,
            LoadingEvent::LoadingCompleted(e) => e.occurred_at,
            LoadingEvent::LoadingCancelled(e) => e.occurred_at,
            LoadingEvent::ReconciliationAcknowledged(e) => e.occurred_at,
        }
    }

    fn describe(&self) -> String {
        match self {
            LoadingEvent::LoadingOpened(e) => {
                format!("loading of {} opened at the dock", e.planned_quantity)
            }
            LoadingEvent::PhotoRecorded(e) => {
                format!("{} photo added to loading {}", e.evidence_type, e.loading_id)
            }
            LoadingEvent::InvoiceRegistered(e) => {
                format!("invoice {} registered on loading {}", e.invoice.number, e.loading_id)
            }
            LoadingEvent::LoadingStarted(e) => format!("loading {} started", e.loading_id),
            LoadingEvent::LoadingCompleted(e) => {
                format!("loading {} completed ({})", e.loading_id, e.quantity)
            }
            LoadingEvent::LoadingCancelled(e) => {
                format!("loading {} cancelled: {}", e.loading_id, e.reason)
            }
            LoadingEvent::ReconciliationAcknowledged(e) => {
                format!("loading {} reconciled: {}", e.loading_id, e.step)
            }
        }
    }
}

impl Aggregate for Loading {
    type Command = LoadingCommand;
    type Event = LoadingEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LoadingEvent::LoadingOpened(e) => {
                self.id = e.loading_id;
                self.release_id = Some(e.release_id);
                self.schedule_id = e.schedule_id;
                self.product_id = Some(e.product_id);
                self.warehouse_id = Some(e.warehouse_id);
                self.planned_quantity = e.planned_quantity;
                self.status = LoadingStatus::Waiting;
                self.updated_by = Some(e.opened_by);
                self.opened_at = Some(e.occurred_at);
            }
            LoadingEvent::PhotoRecorded(e) => {
                self.photo_counts.increment(e.evidence_type);
                self.updated_by = Some(e.uploaded_by);
            }
            LoadingEvent::InvoiceRegistered(e) => {
                self.invoice = Some(e.invoice.clone());
                self.photo_counts.increment(EvidenceType::Invoice);
                self.updated_by = Some(e.registered_by);
            }
            LoadingEvent::LoadingStarted(e) => {
                self.status = LoadingStatus::InProgress;
                if e.observation.is_some() {
                    self.status_note = e.observation.clone();
                }
                self.updated_by = Some(e.actor);
            }
            LoadingEvent::LoadingCompleted(e) => {
                self.status = LoadingStatus::Completed;
                if e.observation.is_some() {
                    self.status_note = e.observation.clone();
                }
                self.completed_at = Some(e.occurred_at);
                self.updated_by = Some(e.actor);
            }
            LoadingEvent::LoadingCancelled(e) => {
                self.status = LoadingStatus::Cancelled;
                self.status_note = Some(e.reason.clone());
                self.updated_by = Some(e.actor);
            }
            LoadingEvent::ReconciliationAcknowledged(e) => {
                self.reconciliation.mark(e.step);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LoadingCommand::OpenLoading(cmd) => self.handle_open(cmd),
            LoadingCommand::RecordPhoto(cmd) => self.handle_photo(cmd),
            LoadingCommand::RegisterInvoice(cmd) => self.handle_invoice(cmd),
            LoadingCommand::TransitionLoading(cmd) => self.handle_transition(cmd),
            LoadingCommand::AcknowledgeReconciliation(cmd) => self.handle_acknowledge(cmd),
        }
    }
}

fn non_blank(raw: Option<&String>) -> Option<String> {
    raw.map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl Loading {
    fn ensure_loading_id(&self, loading_id: LoadingId) -> Result<(), DomainError> {
        if self.id != loading_id {
            return Err(DomainError::conflict("loading_id mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenLoading) -> Result<Vec<LoadingEvent>, DomainError> {
        if self.release_id.is_some() {
            return Err(DomainError::conflict("loading already exists"));
        }
        if cmd.planned_quantity.is_zero() {
            return Err(DomainError::invalid_quantity("planned quantity must be greater than zero"));
        }

        Ok(vec![LoadingEvent::LoadingOpened(LoadingOpened {
            loading_id: cmd.loading_id,
            release_id: cmd.release_id,
            schedule_id: cmd.schedule_id,
            product_id: cmd.product_id,
            warehouse_id: cmd.warehouse_id,
            planned_quantity: cmd.planned_quantity,
            opened_by: cmd.opened_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_photo(&self, cmd: &RecordPhoto) -> Result<Vec<LoadingEvent>, DomainError> {
        self.ensure_accepts_evidence()?;
        self.ensure_loading_id(cmd.loading_id)?;
        ensure_format(cmd.evidence_type, &cmd.storage_ref)?;

        Ok(vec![LoadingEvent::PhotoRecorded(PhotoRecorded {
            loading_id: cmd.loading_id,
            photo_id: cmd.photo_id,
            evidence_type: cmd.evidence_type,
            storage_ref: cmd.storage_ref.clone(),
            uploaded_by: cmd.uploaded_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_invoice(&self, cmd: &RegisterInvoice) -> Result<Vec<LoadingEvent>, DomainError> {
        self.ensure_accepts_evidence()?;
        self.ensure_loading_id(cmd.loading_id)?;

        let number = cmd.number.trim();
        if number.is_empty() {
            return Err(DomainError::MissingField("invoice number"));
        }
        if cmd.date > cmd.today {
            return Err(DomainError::invalid_date(format!(
                "invoice date {} is in the future",
                cmd.date
            )));
        }
        ensure_format(EvidenceType::Invoice, &cmd.file_ref)?;

        let mut events = vec![LoadingEvent::InvoiceRegistered(InvoiceRegistered {
            loading_id: cmd.loading_id,
            photo_id: cmd.photo_id,
            invoice: InvoiceDetails {
                number: number.to_string(),
                date: cmd.date,
                file_ref: cmd.file_ref.clone(),
            },
            registered_by: cmd.registered_by,
            occurred_at: cmd.occurred_at,
        })];
        if self.status == LoadingStatus::Waiting {
            events.push(LoadingEvent::LoadingStarted(LoadingStarted {
                loading_id: cmd.loading_id,
                observation: None,
                actor: cmd.registered_by,
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }

    fn handle_transition(&self, cmd: &TransitionLoading) -> Result<Vec<LoadingEvent>, DomainError> {
        let (Some(release_id), Some(product_id), Some(warehouse_id)) =
            (self.release_id, self.product_id, self.warehouse_id)
        else {
            return Err(DomainError::not_found());
        };
        self.ensure_loading_id(cmd.loading_id)?;

        if !self.status.can_transition_to(cmd.target) {
            return Err(DomainError::transition("loading", self.status, cmd.target));
        }
        let observation = non_blank(cmd.observation.as_ref());

        let event = match cmd.target {
            LoadingStatus::InProgress => LoadingEvent::LoadingStarted(LoadingStarted {
                loading_id: cmd.loading_id,
                observation,
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            }),
            LoadingStatus::Cancelled => {
                let reason = observation.ok_or(DomainError::MissingReason("cancel a loading"))?;
                LoadingEvent::LoadingCancelled(LoadingCancelled {
                    loading_id: cmd.loading_id,
                    reason,
                    actor: cmd.actor,
                    occurred_at: cmd.occurred_at,
                })
            }
            LoadingStatus::Completed => {
                let missing = self.photo_counts.missing_required();
                if !missing.is_empty() {
                    return Err(DomainError::MissingEvidence {
                        missing: missing.iter().map(|t| t.as_str().to_string()).collect(),
                    });
                }
                LoadingEvent::LoadingCompleted(LoadingCompleted {
                    loading_id: cmd.loading_id,
                    release_id,
                    schedule_id: self.schedule_id,
                    product_id,
                    warehouse_id,
                    quantity: self.planned_quantity,
                    observation,
                    actor: cmd.actor,
                    occurred_at: cmd.occurred_at,
                })
            }
            LoadingStatus::Waiting => {
                return Err(DomainError::transition("loading", self.status, cmd.target));
            }
        };
        Ok(vec![event])
    }

    fn handle_acknowledge(
        &self,
        cmd: &AcknowledgeReconciliation,
    ) -> Result<Vec<LoadingEvent>, DomainError> {
        self.ensure_loading_id(cmd.loading_id)?;
        if self.status != LoadingStatus::Completed {
            return Err(DomainError::transition("loading", self.status, "reconciled"));
        }
        if self.reconciliation.is_done(cmd.step) {
            return Ok(vec![]);
        }
        Ok(vec![LoadingEvent::ReconciliationAcknowledged(ReconciliationAcknowledged {
            loading_id: cmd.loading_id,
            step: cmd.step,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkyard_events::execute;
    use proptest::prelude::*;

    fn opened(schedule_id: Option<ScheduleId>) -> Loading {
        let id = LoadingId::new();
        let mut loading = Loading::empty(id);
        execute(
            &mut loading,
            &LoadingCommand::OpenLoading(OpenLoading {
                loading_id: id,
                release_id: ReleaseId::new(),
                schedule_id,
                product_id: ProductId::new(),
                warehouse_id: WarehouseId::new(),
                planned_quantity: Quantity::from(4),
                opened_by: PrincipalId::new(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        loading
    }

    fn photo(loading: &mut Loading, evidence_type: EvidenceType, file: &str) -> Result<Vec<LoadingEvent>, DomainError> {
        let cmd = LoadingCommand::RecordPhoto(RecordPhoto {
            loading_id: loading.id_typed(),
            photo_id: PhotoId::new(),
            evidence_type,
            storage_ref: file.to_string(),
            uploaded_by: PrincipalId::new(),
            occurred_at: Utc::now(),
        });
        execute(loading, &cmd)
    }

    fn transition(target: LoadingStatus, loading: &Loading, observation: Option<&str>) -> LoadingCommand {
        LoadingCommand::TransitionLoading(TransitionLoading {
            loading_id: loading.id_typed(),
            target,
            observation: observation.map(str::to_string),
            actor: PrincipalId::new(),
            occurred_at: Utc::now(),
        })
    }

    fn invoice(loading: &Loading, number: &str, date: NaiveDate, today: NaiveDate) -> LoadingCommand {
        LoadingCommand::RegisterInvoice(RegisterInvoice {
            loading_id: loading.id_typed(),
            photo_id: PhotoId::new(),
            number: number.to_string(),
            date,
            file_ref: "nf.pdf".to_string(),
            today,
            registered_by: PrincipalId::new(),
            occurred_at: Utc::now(),
        })
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[test]
    fn completion_without_invoice_is_a_precondition_failure() {
        let mut loading = opened(None);
        photo(&mut loading, EvidenceType::Before, "a.jpg").unwrap();
        photo(&mut loading, EvidenceType::After, "b.png").unwrap();

        let err = loading
            .handle(&transition(LoadingStatus::Completed, &loading, None))
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::MissingEvidence {
                missing: vec!["invoice".to_string()]
            }
        );
        assert_eq!(err.kind(), bulkyard_core::ErrorKind::Precondition);
    }

    #[test]
    fn completes_with_full_evidence_and_lists_pending_steps() {
        let schedule_id = ScheduleId::new();
        let mut loading = opened(Some(schedule_id));
        photo(&mut loading, EvidenceType::Before, "a.jpg").unwrap();
        photo(&mut loading, EvidenceType::After, "b.jpg").unwrap();
        let cmd = invoice(&loading, "NF-1", day(9), day(10));
        execute(&mut loading, &cmd).unwrap();
        assert_eq!(loading.status(), LoadingStatus::InProgress);

        let cmd = transition(LoadingStatus::Completed, &loading, None);
        let events = execute(&mut loading, &cmd).unwrap();
        match &events[0] {
            LoadingEvent::LoadingCompleted(e) => {
                assert_eq!(e.quantity, Quantity::from(4));
                assert_eq!(e.schedule_id, Some(schedule_id));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            loading.pending_steps(),
            vec![
                ReconciliationStep::ReleaseWithdrawal,
                ReconciliationStep::StockDecrement,
                ReconciliationStep::ScheduleCompletion,
            ]
        );

        let ack = LoadingCommand::AcknowledgeReconciliation(AcknowledgeReconciliation {
            loading_id: loading.id_typed(),
            step: ReconciliationStep::StockDecrement,
            occurred_at: Utc::now(),
        });
        assert_eq!(execute(&mut loading, &ack).unwrap().len(), 1);
        assert!(execute(&mut loading, &ack).unwrap().is_empty());
        assert_eq!(loading.pending_steps().len(), 2);
    }

    #[test]
    fn cancel_requires_reason() {
        let mut loading = opened(None);
        let err = loading
            .handle(&transition(LoadingStatus::Cancelled, &loading, Some("  ")))
            .unwrap_err();
        assert!(matches!(err, DomainError::MissingReason(_)));

        let cmd = transition(LoadingStatus::Cancelled, &loading, Some("truck left"));
        execute(&mut loading, &cmd).unwrap();
        assert_eq!(loading.status(), LoadingStatus::Cancelled);
        assert_eq!(loading.status_note(), Some("truck left"));
        assert_eq!(loading.reserved_against_release(false), Quantity::ZERO);
    }

    #[test]
    fn reservation_follows_schedule_and_withdrawal() {
        let unscheduled = opened(None);
        assert_eq!(unscheduled.reserved_against_release(false), Quantity::from(4));

        let mut scheduled = opened(Some(ScheduleId::new()));
        assert_eq!(scheduled.reserved_against_release(true), Quantity::ZERO);
        assert_eq!(scheduled.reserved_against_release(false), Quantity::from(4));

        photo(&mut scheduled, EvidenceType::Before, "a.jpg").unwrap();
        photo(&mut scheduled, EvidenceType::After, "b.jpg").unwrap();
        let cmd = invoice(&scheduled, "NF-1", day(9), day(10));
        execute(&mut scheduled, &cmd).unwrap();
        let complete = transition(LoadingStatus::Completed, &scheduled, None);
        execute(&mut scheduled, &complete).unwrap();
        // Schedule already completed, withdrawal not yet recorded.
        assert_eq!(scheduled.reserved_against_release(false), Quantity::from(4));

        let ack = LoadingCommand::AcknowledgeReconciliation(AcknowledgeReconciliation {
            loading_id: scheduled.id_typed(),
            step: ReconciliationStep::ReleaseWithdrawal,
            occurred_at: Utc::now(),
        });
        execute(&mut scheduled, &ack).unwrap();
        assert_eq!(scheduled.reserved_against_release(false), Quantity::ZERO);
    }

    #[test]
    fn terminal_states_reject_everything() {
        let mut loading = opened(None);
        let cmd = transition(LoadingStatus::Cancelled, &loading, Some("no-show"));
        execute(&mut loading, &cmd).unwrap();

        for target in [LoadingStatus::InProgress, LoadingStatus::Completed, LoadingStatus::Cancelled] {
            let err = loading.handle(&transition(target, &loading, Some("x"))).unwrap_err();
            assert!(matches!(err, DomainError::InvalidTransition { .. }));
        }
        assert!(photo(&mut loading, EvidenceType::Seal, "s.jpg").is_err());
    }

    #[test]
    fn invoice_validation() {
        let loading = opened(None);
        assert_eq!(
            loading.handle(&invoice(&loading, " ", day(9), day(10))).unwrap_err(),
            DomainError::MissingField("invoice number")
        );
        assert!(matches!(
            loading.handle(&invoice(&loading, "NF-2", day(11), day(10))).unwrap_err(),
            DomainError::InvalidDate(_)
        ));
    }

    #[test]
    fn unsupported_photo_format_leaves_counts_untouched() {
        let mut loading = opened(None);
        let err = photo(&mut loading, EvidenceType::Before, "a.gif").unwrap_err();
        assert!(matches!(err, DomainError::UnsupportedFormat(_)));
        assert_eq!(loading.photo_counts().total(), 0);
    }

    fn status_strategy() -> impl Strategy<Value = LoadingStatus> {
        prop_oneof![
            Just(LoadingStatus::Waiting),
            Just(LoadingStatus::InProgress),
            Just(LoadingStatus::Completed),
            Just(LoadingStatus::Cancelled),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: no sequence of transitions leaves a terminal state, and
        /// completion is never reached without the required evidence.
        #[test]
        fn transitions_respect_graph(
            targets in prop::collection::vec(status_strategy(), 1..8),
            with_evidence in any::<bool>()
        ) {
            let mut loading = opened(None);
            if with_evidence {
                photo(&mut loading, EvidenceType::Before, "a.jpg").unwrap();
                photo(&mut loading, EvidenceType::After, "b.jpg").unwrap();
                photo(&mut loading, EvidenceType::Invoice, "c.pdf").unwrap();
            }
            for target in targets {
                let before = loading.status();
                let cmd = transition(target, &loading, Some("note"));
                let result = execute(&mut loading, &cmd);
                if before.is_terminal() {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(loading.status(), before);
                }
                if loading.status() == LoadingStatus::Completed {
                    prop_assert!(with_evidence);
                }
            }
        }
    }
}
