use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use bulkyard_auth::{Permission, Principal, authorize};
use bulkyard_core::{
    DomainError, LoadingId, PhotoId, ProductId, Quantity, ReleaseId, ScheduleId, WarehouseId,
};
use bulkyard_events::{EventBus, EventEnvelope};
use bulkyard_loadings::{
    EvidenceType, Loading, LoadingCommand, LoadingStatus, OpenLoading, RecordPhoto,
    RegisterInvoice, TransitionLoading, ensure_format,
};

use super::reconciliation::{Reconciler, ReconciliationReport, ReconciliationWarning};
use super::{Context, LOADING};
use crate::error::ServiceResult;
use crate::records::{LoadingPhotoRow, LoadingRow};
use crate::store::Filter;

/// Input for [`LoadingMachine::open_loading`].
///
/// Product and warehouse default to the release's. With a schedule the
/// planned quantity defaults to the schedule's; without one it is required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLoading {
    pub release_id: ReleaseId,
    pub schedule_id: Option<ScheduleId>,
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
    pub planned_quantity: Option<Decimal>,
}

impl NewLoading {
    pub fn for_schedule(release_id: ReleaseId, schedule_id: ScheduleId) -> Self {
        Self {
            release_id,
            schedule_id: Some(schedule_id),
            product_id: None,
            warehouse_id: None,
            planned_quantity: None,
        }
    }

    pub fn unscheduled(release_id: ReleaseId, planned_quantity: Decimal) -> Self {
        Self {
            release_id,
            schedule_id: None,
            product_id: None,
            warehouse_id: None,
            planned_quantity: Some(planned_quantity),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceInput {
    pub number: String,
    pub date: NaiveDate,
    pub file_ref: String,
}

/// Result of a transition. `reconciliation` is present when the loading was
/// completed.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub loading: Loading,
    pub reconciliation: Option<ReconciliationReport>,
}

impl TransitionOutcome {
    pub fn warnings(&self) -> &[ReconciliationWarning] {
        self.reconciliation
            .as_ref()
            .map(|r| r.warnings.as_slice())
            .unwrap_or(&[])
    }
}

/// Loading lifecycle: open, collect evidence, transition.
pub struct LoadingMachine<'a, B> {
    ctx: &'a Context<B>,
}

impl<'a, B> LoadingMachine<'a, B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub(crate) fn new(ctx: &'a Context<B>) -> Self {
        Self { ctx }
    }

    pub fn open_loading(&self, actor: &Principal, request: NewLoading) -> ServiceResult<Loading> {
        authorize(actor, &Permission::LOADINGS_OPERATE)?;
        let release_id = request.release_id;

        let committed = self.ctx.release_locks.with_lock(&release_id, || {
            let release = self.ctx.load_release(release_id)?;
            if release.is_cancelled() {
                return Err(DomainError::transition("release", release.status(), "loaded").into());
            }
            let requested = request.planned_quantity.map(Quantity::positive).transpose()?;

            let planned_quantity = match request.schedule_id {
                Some(schedule_id) => {
                    let schedule = self.ctx.load_schedule(schedule_id)?;
                    if schedule.release_id() != Some(release_id) {
                        return Err(DomainError::conflict(format!(
                            "schedule {schedule_id} does not belong to release {release_id}"
                        ))
                        .into());
                    }
                    if !schedule.status().is_active() {
                        return Err(DomainError::transition("schedule", schedule.status(), "loaded").into());
                    }
                    if self.ctx.has_open_loading(schedule_id)? {
                        return Err(DomainError::conflict(format!(
                            "schedule {schedule_id} already has a loading"
                        ))
                        .into());
                    }
                    let planned = requested.unwrap_or(schedule.quantity());
                    if planned > schedule.quantity() {
                        return Err(DomainError::CapacityExceeded {
                            requested: planned,
                            remaining: schedule.quantity(),
                        }
                        .into());
                    }
                    planned
                }
                None => {
                    let planned = requested.ok_or(DomainError::MissingField("planned_quantity"))?;
                    let reserved = self.ctx.reserved_against(release_id, None)?;
                    release.ensure_can_allocate(planned, reserved)?;
                    planned
                }
            };

            let loading_id = LoadingId::new();
            let command = LoadingCommand::OpenLoading(OpenLoading {
                loading_id,
                release_id,
                schedule_id: request.schedule_id,
                product_id: request.product_id.unwrap_or(release.product_id()),
                warehouse_id: request.warehouse_id.unwrap_or(release.warehouse_id()),
                planned_quantity,
                opened_by: actor.id(),
                occurred_at: self.ctx.clock.now(),
            });
            self.ctx.dispatcher.dispatch(
                &*self.ctx.stores.loadings,
                LOADING,
                &Loading::empty(loading_id),
                &command,
            )
        })?;

        let loading = committed.aggregate;
        tracing::info!(
            %release_id,
            loading_id = %loading.id_typed(),
            planned = %loading.planned_quantity(),
            "loading opened"
        );
        Ok(loading)
    }

    /// Upload the binary, then record it. Nothing is counted when the upload
    /// fails.
    pub fn record_photo(
        &self,
        actor: &Principal,
        loading_id: LoadingId,
        evidence_type: EvidenceType,
        file_name: &str,
        bytes: &[u8],
    ) -> ServiceResult<LoadingPhotoRow> {
        authorize(actor, &Permission::LOADINGS_OPERATE)?;

        self.ctx.loading_locks.with_lock(&loading_id, || {
            let loading = self.ctx.load_loading(loading_id)?;
            loading.ensure_accepts_evidence()?;
            let ext = ensure_format(evidence_type, file_name)?;

            let photo_id = PhotoId::new();
            let path = format!(
                "{}/{loading_id}/{evidence_type}/{photo_id}.{ext}",
                self.ctx.config.storage.photo_prefix
            );
            let url = self.ctx.storage.upload(&path, bytes)?;

            let now = self.ctx.clock.now();
            let command = LoadingCommand::RecordPhoto(RecordPhoto {
                loading_id,
                photo_id,
                evidence_type,
                storage_ref: url.clone(),
                uploaded_by: actor.id(),
                occurred_at: now,
            });
            let decision = self.ctx.dispatcher.decide(&loading, &command)?;
            let photo = LoadingPhotoRow::new(photo_id, loading_id, evidence_type, url, actor.id(), now);
            self.ctx.stores.photos.insert(photo.clone(), 1)?;
            self.ctx
                .dispatcher
                .commit(&*self.ctx.stores.loadings, LOADING, decision)?;

            tracing::info!(%loading_id, %photo_id, evidence_type = evidence_type.as_str(), "photo recorded");
            Ok(photo)
        })
    }

    /// Record invoice metadata. Counts as one invoice photo and starts a
    /// waiting loading.
    pub fn register_invoice(
        &self,
        actor: &Principal,
        loading_id: LoadingId,
        invoice: InvoiceInput,
    ) -> ServiceResult<Loading> {
        authorize(actor, &Permission::LOADINGS_OPERATE)?;

        self.ctx.loading_locks.with_lock(&loading_id, || {
            let loading = self.ctx.load_loading(loading_id)?;
            let photo_id = PhotoId::new();
            let now = self.ctx.clock.now();
            let command = LoadingCommand::RegisterInvoice(RegisterInvoice {
                loading_id,
                photo_id,
                number: invoice.number,
                date: invoice.date,
                file_ref: invoice.file_ref.clone(),
                today: self.ctx.clock.today(),
                registered_by: actor.id(),
                occurred_at: now,
            });
            let decision = self.ctx.dispatcher.decide(&loading, &command)?;
            let photo = LoadingPhotoRow::new(
                photo_id,
                loading_id,
                EvidenceType::Invoice,
                invoice.file_ref,
                actor.id(),
                now,
            );
            self.ctx.stores.photos.insert(photo, 1)?;
            let committed = self
                .ctx
                .dispatcher
                .commit(&*self.ctx.stores.loadings, LOADING, decision)?;

            tracing::info!(%loading_id, status = %committed.aggregate.status(), "invoice registered");
            Ok(committed.aggregate)
        })
    }

    /// Move the loading along its state graph. Completion runs
    /// reconciliation; its failures come back as warnings and never undo the
    /// transition.
    pub fn transition(
        &self,
        actor: &Principal,
        loading_id: LoadingId,
        target: LoadingStatus,
        observation: Option<String>,
    ) -> ServiceResult<TransitionOutcome> {
        authorize(actor, &Permission::LOADINGS_OPERATE)?;

        self.ctx.loading_locks.with_lock(&loading_id, || {
            let loading = self.ctx.load_loading(loading_id)?;
            let from = loading.status();
            let command = LoadingCommand::TransitionLoading(TransitionLoading {
                loading_id,
                target,
                observation,
                actor: actor.id(),
                occurred_at: self.ctx.clock.now(),
            });
            let committed = self
                .ctx
                .dispatcher
                .dispatch(&*self.ctx.stores.loadings, LOADING, &loading, &command)?;
            tracing::info!(%loading_id, %from, to = %target, "loading transitioned");

            if target != LoadingStatus::Completed {
                return Ok(TransitionOutcome {
                    loading: committed.aggregate,
                    reconciliation: None,
                });
            }
            let (loading, report) = Reconciler::new(self.ctx).reconcile_loaded(committed.aggregate);
            Ok(TransitionOutcome {
                loading,
                reconciliation: Some(report),
            })
        })
    }

    pub fn get(&self, loading_id: LoadingId) -> ServiceResult<Loading> {
        self.ctx.load_loading(loading_id)
    }

    /// Evidence rows of a loading, oldest first.
    pub fn photos_for_loading(&self, loading_id: LoadingId) -> ServiceResult<Vec<LoadingPhotoRow>> {
        self.ctx.photos_of(loading_id)
    }

    pub fn list_by_status(&self, status: LoadingStatus) -> ServiceResult<Vec<Loading>> {
        let rows = self
            .ctx
            .stores
            .loadings
            .find(&Filter::all().eq("status", status.as_str()))?;
        let mut loadings = Vec::with_capacity(rows.len());
        for row in rows {
            let photos = self.ctx.photos_of(row.row.id)?;
            loadings.push(LoadingRow::into_loading(row, &photos)?);
        }
        loadings.sort_by_key(|l| l.snapshot().map(|s| s.opened_at));
        Ok(loadings)
    }
}
