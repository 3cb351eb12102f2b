use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use bulkyard_auth::{Permission, Principal, authorize, authorize_owner_or};
use bulkyard_core::{DomainError, LoadingId, Quantity, ReleaseId, ScheduleId};
use bulkyard_events::{EventBus, EventEnvelope};
use bulkyard_schedules::{
    CancelSchedule, CompleteSchedule, CreateSchedule, EditSchedule, PickupRequest, Schedule,
    ScheduleChanges, ScheduleCommand,
};

use super::{Context, SCHEDULE};
use crate::error::ServiceResult;
use crate::store::Filter;

/// Input for [`ScheduleAllocator::create_schedule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSchedule {
    pub quantity: Decimal,
    pub pickup: PickupRequest,
}

/// Reserves release capacity for pickups.
pub struct ScheduleAllocator<'a, B> {
    ctx: &'a Context<B>,
}

impl<'a, B> ScheduleAllocator<'a, B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub(crate) fn new(ctx: &'a Context<B>) -> Self {
        Self { ctx }
    }

    pub fn create_schedule(
        &self,
        actor: &Principal,
        release_id: ReleaseId,
        request: NewSchedule,
    ) -> ServiceResult<Schedule> {
        authorize(actor, &Permission::SCHEDULES_CREATE)?;

        let committed = self.ctx.release_locks.with_lock(&release_id, || {
            let release = self.ctx.load_release(release_id)?;
            if release.is_cancelled() {
                return Err(DomainError::transition("release", release.status(), "scheduled").into());
            }
            let reserved = self.ctx.reserved_against(release_id, None)?;
            let schedule_id = ScheduleId::new();
            let command = ScheduleCommand::CreateSchedule(CreateSchedule {
                schedule_id,
                release_id,
                quantity: request.quantity,
                pickup: request.pickup,
                allowance: release.allocatable(reserved),
                today: self.ctx.clock.today(),
                created_by: actor.id(),
                occurred_at: self.ctx.clock.now(),
            });
            self.ctx.dispatcher.dispatch(
                &*self.ctx.stores.schedules,
                SCHEDULE,
                &Schedule::empty(schedule_id),
                &command,
            )
        })?;

        let schedule = committed.aggregate;
        tracing::info!(
            %release_id,
            schedule_id = %schedule.id_typed(),
            quantity = %schedule.quantity(),
            "schedule created"
        );
        Ok(schedule)
    }

    /// Apply `changes`; a new quantity is checked against the capacity left
    /// with this schedule's own reservation given back. The quantity is
    /// fixed once a loading has been opened from the schedule.
    pub fn edit_schedule(
        &self,
        actor: &Principal,
        schedule_id: ScheduleId,
        changes: ScheduleChanges,
    ) -> ServiceResult<Schedule> {
        let current = self.ctx.load_schedule(schedule_id)?;
        current.ensure_editable()?;
        let (release_id, owner) = match (current.release_id(), current.created_by()) {
            (Some(release_id), Some(owner)) => (release_id, owner),
            _ => return Err(DomainError::NotFound.into()),
        };
        authorize_owner_or(actor, owner, &Permission::SCHEDULES_MANAGE_ANY, "edit a schedule")?;

        let committed = self.ctx.release_locks.with_lock(&release_id, || {
            let schedule = self.ctx.load_schedule(schedule_id)?;
            let resized = changes
                .quantity
                .is_some_and(|q| Quantity::positive(q).ok() != Some(schedule.quantity()));
            if resized && self.ctx.has_open_loading(schedule_id)? {
                return Err(DomainError::transition("schedule", "in loading", "resized").into());
            }
            let release = self.ctx.load_release(release_id)?;
            let reserved = self.ctx.reserved_against(release_id, Some(schedule_id))?;
            let command = ScheduleCommand::EditSchedule(EditSchedule {
                schedule_id,
                changes,
                allowance: release.allocatable(reserved),
                today: self.ctx.clock.today(),
                updated_by: actor.id(),
                occurred_at: self.ctx.clock.now(),
            });
            self.ctx
                .dispatcher
                .dispatch(&*self.ctx.stores.schedules, SCHEDULE, &schedule, &command)
        })?;

        tracing::info!(%release_id, %schedule_id, quantity = %committed.aggregate.quantity(), "schedule edited");
        Ok(committed.aggregate)
    }

    pub fn cancel_schedule(
        &self,
        actor: &Principal,
        schedule_id: ScheduleId,
        reason: &str,
    ) -> ServiceResult<Schedule> {
        let release_id = self
            .ctx
            .load_schedule(schedule_id)?
            .release_id()
            .ok_or(DomainError::NotFound)?;

        let committed = self.ctx.release_locks.with_lock(&release_id, || {
            let schedule = self.ctx.load_schedule(schedule_id)?;
            let command = ScheduleCommand::CancelSchedule(CancelSchedule {
                schedule_id,
                reason: reason.to_string(),
                cancelled_by: actor.id(),
                occurred_at: self.ctx.clock.now(),
            });
            let decision = self.ctx.dispatcher.decide(&schedule, &command)?;
            let owner = schedule.created_by().ok_or(DomainError::NotFound)?;
            authorize_owner_or(actor, owner, &Permission::SCHEDULES_MANAGE_ANY, "cancel a schedule")?;
            // The loading withdraws the full schedule quantity when it completes.
            if self.ctx.has_open_loading(schedule_id)? {
                return Err(DomainError::transition("schedule", "in loading", "cancelled").into());
            }
            self.ctx
                .dispatcher
                .commit(&*self.ctx.stores.schedules, SCHEDULE, decision)
        })?;

        tracing::info!(
            %release_id,
            %schedule_id,
            released = %committed.aggregate.quantity(),
            "schedule cancelled"
        );
        Ok(committed.aggregate)
    }

    /// Mark the schedule fulfilled by `loading_id`. Repeats are no-ops.
    pub(crate) fn complete_schedule(&self, schedule_id: ScheduleId, loading_id: LoadingId) -> ServiceResult<Schedule> {
        self.ctx.with_retries("schedule.complete", || {
            let schedule = self.ctx.load_schedule(schedule_id)?;
            let command = ScheduleCommand::CompleteSchedule(CompleteSchedule {
                schedule_id,
                loading_id,
                occurred_at: self.ctx.clock.now(),
            });
            let committed = self
                .ctx
                .dispatcher
                .dispatch(&*self.ctx.stores.schedules, SCHEDULE, &schedule, &command)?;
            Ok(committed.aggregate)
        })
    }

    pub fn get(&self, schedule_id: ScheduleId) -> ServiceResult<Schedule> {
        self.ctx.load_schedule(schedule_id)
    }

    /// Every schedule of a release, by pickup date and time.
    pub fn schedules_for_release(&self, release_id: ReleaseId) -> ServiceResult<Vec<Schedule>> {
        let rows = self
            .ctx
            .stores
            .schedules
            .find(&Filter::all().eq("release_id", release_id))?;
        let mut schedules = rows
            .into_iter()
            .map(Schedule::try_from)
            .collect::<ServiceResult<Vec<_>>>()?;
        schedules.sort_by_key(|s| s.details().map(|d| (d.pickup_date, d.pickup_time)));
        Ok(schedules)
    }
}
