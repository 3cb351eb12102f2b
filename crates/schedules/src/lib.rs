//! Schedule allocator domain module.
//!
//! A schedule reserves part of a release's remaining capacity for one pickup,
//! bound to a driver and a vehicle. Capacity itself is owned by the release;
//! commands here carry the allowance computed by the caller under the
//! release lock.

pub mod schedule;

pub use schedule::{
    CancelSchedule, CompleteSchedule, CreateSchedule, EditSchedule, PickupDetails, PickupRequest,
    Schedule, ScheduleCancelled, ScheduleChanges, ScheduleCommand, ScheduleCompleted,
    ScheduleCreated, ScheduleEdited, ScheduleEvent, ScheduleSnapshot, ScheduleStatus,
};
