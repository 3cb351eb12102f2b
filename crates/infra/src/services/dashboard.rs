use chrono::{NaiveDate, NaiveTime};
use serde_json::Value as JsonValue;

use bulkyard_core::Quantity;
use bulkyard_events::{EventBus, EventEnvelope};
use bulkyard_loadings::LoadingStatus;
use bulkyard_releases::ReleaseStatus;
use bulkyard_schedules::{Schedule, ScheduleStatus};
use bulkyard_stock::StockBalance;

use super::Context;
use crate::error::ServiceResult;
use crate::projections::{ActivityEntry, ActivityFeed};
use crate::store::Filter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardSummary {
    pub day: NaiveDate,
    /// Pending or partially withdrawn.
    pub active_releases: usize,
    /// Non-cancelled schedules picking up on `day`.
    pub schedules_on_day: usize,
    pub completed_loadings: usize,
    pub total_stock: Quantity,
    pub low_stock_balances: usize,
    pub recent_activity: Vec<ActivityEntry>,
}

/// Read-only overview for one day.
pub struct Dashboard<'a, B> {
    ctx: &'a Context<B>,
    activity: &'a ActivityFeed,
}

impl<'a, B> Dashboard<'a, B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub(crate) fn new(ctx: &'a Context<B>, activity: &'a ActivityFeed) -> Self {
        Self { ctx, activity }
    }

    pub fn summary(&self, day: NaiveDate, recent: usize) -> ServiceResult<DashboardSummary> {
        let stores = &self.ctx.stores;

        let mut active_releases = 0;
        for status in [ReleaseStatus::Pending, ReleaseStatus::Partial] {
            active_releases += stores
                .releases
                .find(&Filter::all().eq("status", status.as_str()))?
                .len();
        }

        let end_of_day = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or(NaiveTime::MIN);
        let on_day = Filter::all()
            .gte("data_hora", day.and_time(NaiveTime::MIN))
            .lte("data_hora", day.and_time(end_of_day));
        let mut schedules_on_day = 0;
        for row in stores.schedules.find(&on_day)? {
            if Schedule::try_from(row)?.status() != ScheduleStatus::Cancelled {
                schedules_on_day += 1;
            }
        }

        let completed_loadings = stores
            .loadings
            .find(&Filter::all().eq("status", LoadingStatus::Completed.as_str()))?
            .len();

        let threshold = self.ctx.config.low_stock_threshold();
        let mut total_stock = Quantity::ZERO;
        let mut low_stock_balances = 0;
        for row in stores.balances.find(&Filter::all())? {
            let balance = StockBalance::try_from(row)?;
            total_stock = total_stock.plus(balance.current());
            if balance.is_low(threshold) {
                low_stock_balances += 1;
            }
        }

        Ok(DashboardSummary {
            day,
            active_releases,
            schedules_on_day,
            completed_loadings,
            total_stock,
            low_stock_balances,
            recent_activity: self.activity.recent(recent),
        })
    }
}
