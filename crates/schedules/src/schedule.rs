use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bulkyard_auth::PrincipalId;
use bulkyard_core::{Aggregate, AggregateRoot, DomainError, LoadingId, Quantity, ReleaseId, ScheduleId};
use bulkyard_events::Event;
use bulkyard_identity::{DriverDocument, VehiclePlate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Confirmed,
    Pending,
    Completed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Confirmed => "confirmed",
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Cancelled => "cancelled",
        }
    }

    /// Active schedules hold a reservation against their release.
    pub fn is_active(&self) -> bool {
        matches!(self, ScheduleStatus::Confirmed | ScheduleStatus::Pending)
    }
}

impl core::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unvalidated pickup data as submitted by the booking actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupRequest {
    pub pickup_date: NaiveDate,
    pub pickup_time: NaiveTime,
    pub driver_name: String,
    pub driver_document: String,
    pub vehicle_plate: String,
    pub vehicle_type: String,
    pub notes: Option<String>,
}

/// Validated pickup data: normalized document and plate, date not in the past.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupDetails {
    pub pickup_date: NaiveDate,
    pub pickup_time: NaiveTime,
    pub driver_name: String,
    pub driver_document: DriverDocument,
    pub vehicle_plate: VehiclePlate,
    pub vehicle_type: String,
    pub notes: Option<String>,
}

impl PickupRequest {
    fn validate_date(&self, today: NaiveDate) -> Result<(), DomainError> {
        if self.pickup_date < today {
            return Err(DomainError::invalid_date(format!(
                "pickup date {} is before {}",
                self.pickup_date, today
            )));
        }
        Ok(())
    }

    fn validate_identity(&self) -> Result<PickupDetails, DomainError> {
        let driver_name = self.driver_name.trim();
        if driver_name.is_empty() {
            return Err(DomainError::MissingField("driver_name"));
        }
        let driver_document = DriverDocument::parse(&self.driver_document)?;
        let vehicle_plate = VehiclePlate::parse(&self.vehicle_plate)?;

        Ok(PickupDetails {
            pickup_date: self.pickup_date,
            pickup_time: self.pickup_time,
            driver_name: driver_name.to_string(),
            driver_document,
            vehicle_plate,
            vehicle_type: self.vehicle_type.trim().to_string(),
            notes: self
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
        })
    }
}

impl PickupDetails {
    fn to_request(&self) -> PickupRequest {
        PickupRequest {
            pickup_date: self.pickup_date,
            pickup_time: self.pickup_time,
            driver_name: self.driver_name.clone(),
            driver_document: self.driver_document.as_str().to_string(),
            vehicle_plate: self.vehicle_plate.as_str().to_string(),
            vehicle_type: self.vehicle_type.clone(),
            notes: self.notes.clone(),
        }
    }
}

/// Partial update; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleChanges {
    pub quantity: Option<Decimal>,
    pub pickup_date: Option<NaiveDate>,
    pub pickup_time: Option<NaiveTime>,
    pub driver_name: Option<String>,
    pub driver_document: Option<String>,
    pub vehicle_plate: Option<String>,
    pub vehicle_type: Option<String>,
    pub notes: Option<String>,
}

impl ScheduleChanges {
    fn merge(&self, current: &PickupDetails) -> PickupRequest {
        let mut request = current.to_request();
        if let Some(date) = self.pickup_date {
            request.pickup_date = date;
        }
        if let Some(time) = self.pickup_time {
            request.pickup_time = time;
        }
        if let Some(name) = &self.driver_name {
            request.driver_name = name.clone();
        }
        if let Some(document) = &self.driver_document {
            request.driver_document = document.clone();
        }
        if let Some(plate) = &self.vehicle_plate {
            request.vehicle_plate = plate.clone();
        }
        if let Some(kind) = &self.vehicle_type {
            request.vehicle_type = kind.clone();
        }
        if let Some(notes) = &self.notes {
            request.notes = Some(notes.clone());
        }
        request
    }
}

/// Aggregate root: Schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    id: ScheduleId,
    release_id: Option<ReleaseId>,
    quantity: Quantity,
    details: Option<PickupDetails>,
    status: ScheduleStatus,
    created_by: Option<PrincipalId>,
    updated_by: Option<PrincipalId>,
    cancel_reason: Option<String>,
    completed_by_loading: Option<LoadingId>,
    version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub id: ScheduleId,
    pub release_id: ReleaseId,
    pub quantity: Quantity,
    pub details: PickupDetails,
    pub status: ScheduleStatus,
    pub created_by: PrincipalId,
    pub updated_by: Option<PrincipalId>,
    pub cancel_reason: Option<String>,
    pub completed_by_loading: Option<LoadingId>,
}

impl Schedule {
    pub fn empty(id: ScheduleId) -> Self {
        Self {
            id,
            release_id: None,
            quantity: Quantity::ZERO,
            details: None,
            status: ScheduleStatus::Confirmed,
            created_by: None,
            updated_by: None,
            cancel_reason: None,
            completed_by_loading: None,
            version: 0,
        }
    }

    pub fn from_snapshot(snapshot: ScheduleSnapshot, version: u64) -> Result<Self, DomainError> {
        if snapshot.quantity.is_zero() {
            return Err(DomainError::invalid_quantity(format!(
                "stored schedule {} has zero quantity",
                snapshot.id
            )));
        }
        Ok(Self {
            id: snapshot.id,
            release_id: Some(snapshot.release_id),
            quantity: snapshot.quantity,
            details: Some(snapshot.details),
            status: snapshot.status,
            created_by: Some(snapshot.created_by),
            updated_by: snapshot.updated_by,
            cancel_reason: snapshot.cancel_reason,
            completed_by_loading: snapshot.completed_by_loading,
            version,
        })
    }

    pub fn snapshot(&self) -> Option<ScheduleSnapshot> {
        Some(ScheduleSnapshot {
            id: self.id,
            release_id: self.release_id?,
            quantity: self.quantity,
            details: self.details.clone()?,
            status: self.status,
            created_by: self.created_by?,
            updated_by: self.updated_by,
            cancel_reason: self.cancel_reason.clone(),
            completed_by_loading: self.completed_by_loading,
        })
    }

    pub fn id_typed(&self) -> ScheduleId {
        self.id
    }

    pub fn release_id(&self) -> Option<ReleaseId> {
        self.release_id
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn details(&self) -> Option<&PickupDetails> {
        self.details.as_ref()
    }

    pub fn status(&self) -> ScheduleStatus {
        self.status
    }

    pub fn created_by(&self) -> Option<PrincipalId> {
        self.created_by
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    /// Quantity this schedule currently holds against its release.
    pub fn reserved(&self) -> Quantity {
        if self.status.is_active() {
            self.quantity
        } else {
            Quantity::ZERO
        }
    }

    /// Edits are only accepted while the schedule is active.
    pub fn ensure_editable(&self) -> Result<(), DomainError> {
        if self.release_id.is_none() {
            return Err(DomainError::not_found());
        }
        if !self.status.is_active() {
            return Err(DomainError::transition("schedule", self.status, "edited"));
        }
        Ok(())
    }
}

impl AggregateRoot for Schedule {
    type Id = ScheduleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateSchedule.
///
/// `allowance` is the release capacity left for this reservation, computed by
/// the caller while holding the release lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSchedule {
    pub schedule_id: ScheduleId,
    pub release_id: ReleaseId,
    pub quantity: Decimal,
    pub pickup: PickupRequest,
    pub allowance: Quantity,
    pub today: NaiveDate,
    pub created_by: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: EditSchedule. `allowance` already includes this schedule's own
/// prior reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditSchedule {
    pub schedule_id: ScheduleId,
    pub changes: ScheduleChanges,
    pub allowance: Quantity,
    pub today: NaiveDate,
    pub updated_by: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSchedule {
    pub schedule_id: ScheduleId,
    pub reason: String,
    pub cancelled_by: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteSchedule, issued when the loading opened from this
/// schedule completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteSchedule {
    pub schedule_id: ScheduleId,
    pub loading_id: LoadingId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleCommand {
    CreateSchedule(CreateSchedule),
    EditSchedule(EditSchedule),
    CancelSchedule(CancelSchedule),
    CompleteSchedule(CompleteSchedule),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleCreated {
    pub schedule_id: ScheduleId,
    pub release_id: ReleaseId,
    pub quantity: Quantity,
    pub details: PickupDetails,
    pub created_by: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEdited {
    pub schedule_id: ScheduleId,
    pub quantity: Quantity,
    pub details: PickupDetails,
    pub updated_by: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleCancelled {
    pub schedule_id: ScheduleId,
    pub released: Quantity,
    pub reason: String,
    pub cancelled_by: PrincipalId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleCompleted {
    pub schedule_id: ScheduleId,
    pub loading_id: LoadingId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleEvent {
    ScheduleCreated(ScheduleCreated),
    ScheduleEdited(ScheduleEdited),
    ScheduleCancelled(ScheduleCancelled),
    ScheduleCompleted(ScheduleCompleted),
}

impl Event for ScheduleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ScheduleEvent::ScheduleCreated(_) => "schedule.created",
            ScheduleEvent::ScheduleEdited(_) => "schedule.edited",
            ScheduleEvent::ScheduleCancelled(_) => "schedule.cancelled",
            ScheduleEvent::ScheduleCompleted(_) => "schedule.completed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ScheduleEvent::ScheduleCreated(e) => e.occurred_at,
            ScheduleEvent::ScheduleEdited(e) => e.occurred_at,
            ScheduleEvent::ScheduleCancelled(e) => e.occurred_at,
            ScheduleEvent::ScheduleCompleted(e) => e.occurred_at,
        }
    }

    fn describe(&self) -> String {
        match self {
            ScheduleEvent::ScheduleCreated(e) => format!(
                "pickup of {} booked for {} {} ({})",
                e.quantity, e.details.pickup_date, e.details.pickup_time, e.details.vehicle_plate
            ),
            ScheduleEvent::ScheduleEdited(e) => {
                format!("pickup {} rescheduled to {}", e.schedule_id, e.details.pickup_date)
            }
            ScheduleEvent::ScheduleCancelled(e) => {
                format!("pickup {} cancelled: {}", e.schedule_id, e.reason)
            }
            ScheduleEvent::ScheduleCompleted(e) => {
                format!("pickup {} completed by loading {}", e.schedule_id, e.loading_id)
            }
        }
    }
}

impl Aggregate for Schedule {
    type Command = ScheduleCommand;
    type Event = ScheduleEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ScheduleEvent::ScheduleCreated(e) => {
                self.id = e.schedule_id;
                self.release_id = Some(e.release_id);
                self.quantity = e.quantity;
                self.details = Some(e.details.clone());
                self.status = ScheduleStatus::Confirmed;
                self.created_by = Some(e.created_by);
            }
            ScheduleEvent::ScheduleEdited(e) => {
                self.quantity = e.quantity;
                self.details = Some(e.details.clone());
                self.updated_by = Some(e.updated_by);
            }
            ScheduleEvent::ScheduleCancelled(e) => {
                self.status = ScheduleStatus::Cancelled;
                self.cancel_reason = Some(e.reason.clone());
                self.updated_by = Some(e.cancelled_by);
            }
            ScheduleEvent::ScheduleCompleted(e) => {
                self.status = ScheduleStatus::Completed;
                self.completed_by_loading = Some(e.loading_id);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ScheduleCommand::CreateSchedule(cmd) => self.handle_create(cmd),
            ScheduleCommand::EditSchedule(cmd) => self.handle_edit(cmd),
            ScheduleCommand::CancelSchedule(cmd) => self.handle_cancel(cmd),
            ScheduleCommand::CompleteSchedule(cmd) => self.handle_complete(cmd),
        }
    }
}

fn check_allowance(quantity: Quantity, allowance: Quantity) -> Result<(), DomainError> {
    if quantity > allowance {
        return Err(DomainError::CapacityExceeded {
            requested: quantity,
            remaining: allowance,
        });
    }
    Ok(())
}

impl Schedule {
    fn ensure_schedule_id(&self, schedule_id: ScheduleId) -> Result<(), DomainError> {
        if self.id != schedule_id {
            return Err(DomainError::conflict("schedule_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateSchedule) -> Result<Vec<ScheduleEvent>, DomainError> {
        if self.release_id.is_some() {
            return Err(DomainError::conflict("schedule already exists"));
        }
        cmd.pickup.validate_date(cmd.today)?;
        let quantity = Quantity::positive(cmd.quantity)?;
        check_allowance(quantity, cmd.allowance)?;
        let details = cmd.pickup.validate_identity()?;

        Ok(vec![ScheduleEvent::ScheduleCreated(ScheduleCreated {
            schedule_id: cmd.schedule_id,
            release_id: cmd.release_id,
            quantity,
            details,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_edit(&self, cmd: &EditSchedule) -> Result<Vec<ScheduleEvent>, DomainError> {
        self.ensure_editable()?;
        self.ensure_schedule_id(cmd.schedule_id)?;
        let current = self.details.as_ref().ok_or_else(DomainError::not_found)?;

        let request = cmd.changes.merge(current);
        request.validate_date(cmd.today)?;
        let quantity = match cmd.changes.quantity {
            Some(raw) => {
                let quantity = Quantity::positive(raw)?;
                if quantity != self.quantity {
                    check_allowance(quantity, cmd.allowance)?;
                }
                quantity
            }
            None => self.quantity,
        };
        let details = request.validate_identity()?;

        Ok(vec![ScheduleEvent::ScheduleEdited(ScheduleEdited {
            schedule_id: cmd.schedule_id,
            quantity,
            details,
            updated_by: cmd.updated_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelSchedule) -> Result<Vec<ScheduleEvent>, DomainError> {
        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::MissingReason("cancel a schedule"));
        }
        if self.release_id.is_none() {
            return Err(DomainError::not_found());
        }
        self.ensure_schedule_id(cmd.schedule_id)?;
        if self.status != ScheduleStatus::Confirmed {
            return Err(DomainError::transition("schedule", self.status, ScheduleStatus::Cancelled));
        }

        Ok(vec![ScheduleEvent::ScheduleCancelled(ScheduleCancelled {
            schedule_id: cmd.schedule_id,
            released: self.quantity,
            reason: reason.to_string(),
            cancelled_by: cmd.cancelled_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteSchedule) -> Result<Vec<ScheduleEvent>, DomainError> {
        if self.release_id.is_none() {
            return Err(DomainError::not_found());
        }
        self.ensure_schedule_id(cmd.schedule_id)?;
        match self.status {
            ScheduleStatus::Completed => Ok(vec![]),
            ScheduleStatus::Cancelled => Err(DomainError::transition(
                "schedule",
                self.status,
                ScheduleStatus::Completed,
            )),
            ScheduleStatus::Confirmed | ScheduleStatus::Pending => {
                Ok(vec![ScheduleEvent::ScheduleCompleted(ScheduleCompleted {
                    schedule_id: cmd.schedule_id,
                    loading_id: cmd.loading_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}
