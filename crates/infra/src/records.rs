//! Typed rows, one per table, and their conversions to and from aggregates.
//!
//! Column names follow the persisted schema. Loosely typed columns (status
//! strings, document, plate, order reference) are validated here so the
//! domain never sees an unchecked value.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bulkyard_auth::PrincipalId;
use bulkyard_core::{
    LoadingId, PhotoId, ProductId, Quantity, ReleaseId, ScheduleId, StockBalanceId,
    WarehouseId,
};
use bulkyard_identity::{DriverDocument, VehiclePlate};
use bulkyard_loadings::{
    EvidenceType, InvoiceDetails, Loading, LoadingSnapshot, LoadingStatus, PhotoCounts,
    ReconciliationState,
};
use bulkyard_releases::{OrderReference, Release, ReleaseSnapshot, ReleaseStatus};
use bulkyard_schedules::{PickupDetails, Schedule, ScheduleSnapshot, ScheduleStatus};
use bulkyard_stock::{StockBalance, StockBalanceSnapshot};

use crate::error::{ServiceError, ServiceResult, StoreError};
use crate::store::{Record, Versioned};

fn invalid(table: &'static str, message: impl Into<String>) -> ServiceError {
    ServiceError::Store(StoreError::Decode {
        table,
        message: message.into(),
    })
}

fn parse_enum<T: Copy>(
    table: &'static str,
    column: &str,
    raw: &str,
    variants: &[T],
    name: impl Fn(&T) -> &'static str,
) -> ServiceResult<T> {
    variants
        .iter()
        .find(|v| name(*v) == raw)
        .copied()
        .ok_or_else(|| invalid(table, format!("unknown {column} '{raw}'")))
}

fn quantity(table: &'static str, column: &str, raw: Decimal) -> ServiceResult<Quantity> {
    Quantity::new(raw).map_err(|e| invalid(table, format!("{column}: {e}")))
}

// ---------------------------------------------------------------------------
// releases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRow {
    pub id: ReleaseId,
    pub client: String,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantidade: Decimal,
    pub quantidade_retirada: Decimal,
    pub pedido: String,
    pub status: String,
    pub created_by: PrincipalId,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<PrincipalId>,
    /// Loadings whose withdrawal is already included in `quantidade_retirada`.
    #[serde(default)]
    pub absorbed_loadings: Vec<LoadingId>,
}

impl Record for ReleaseRow {
    const TABLE: &'static str = "releases";

    fn record_id(&self) -> Uuid {
        self.id.into()
    }
}

impl From<ReleaseSnapshot> for ReleaseRow {
    fn from(s: ReleaseSnapshot) -> Self {
        Self {
            id: s.id,
            client: s.client,
            product_id: s.product_id,
            warehouse_id: s.warehouse_id,
            quantidade: s.authorized.value(),
            quantidade_retirada: s.withdrawn.value(),
            pedido: s.order_reference.to_string(),
            status: s.status.as_str().to_string(),
            created_by: s.created_by,
            created_at: s.created_at,
            cancelled_at: s.cancelled_at,
            cancelled_by: s.cancelled_by,
            absorbed_loadings: s.absorbed_loadings.into_iter().collect(),
        }
    }
}

impl TryFrom<Versioned<ReleaseRow>> for Release {
    type Error = ServiceError;

    fn try_from(v: Versioned<ReleaseRow>) -> ServiceResult<Self> {
        const T: &str = ReleaseRow::TABLE;
        let row = v.row;
        let status = parse_enum(
            T,
            "status",
            &row.status,
            &[
                ReleaseStatus::Pending,
                ReleaseStatus::Partial,
                ReleaseStatus::Completed,
                ReleaseStatus::Cancelled,
            ],
            ReleaseStatus::as_str,
        )?;
        let snapshot = ReleaseSnapshot {
            id: row.id,
            client: row.client,
            product_id: row.product_id,
            warehouse_id: row.warehouse_id,
            authorized: quantity(T, "quantidade", row.quantidade)?,
            withdrawn: quantity(T, "quantidade_retirada", row.quantidade_retirada)?,
            order_reference: OrderReference::parse(&row.pedido)?,
            status,
            created_by: row.created_by,
            created_at: row.created_at,
            cancelled_at: row.cancelled_at,
            cancelled_by: row.cancelled_by,
            absorbed_loadings: row.absorbed_loadings.into_iter().collect(),
        };
        Ok(Release::from_snapshot(snapshot, v.version)?)
    }
}

// ---------------------------------------------------------------------------
// schedules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub id: ScheduleId,
    pub release_id: ReleaseId,
    pub data_hora: NaiveDateTime,
    pub quantidade: Decimal,
    pub motorista_nome: String,
    pub motorista_documento: String,
    pub placa: String,
    pub tipo_veiculo: String,
    pub observacoes: Option<String>,
    pub status: String,
    pub created_by: PrincipalId,
    pub updated_by: Option<PrincipalId>,
    #[serde(default)]
    pub motivo_cancelamento: Option<String>,
    #[serde(default)]
    pub loading_id: Option<LoadingId>,
}

impl Record for ScheduleRow {
    const TABLE: &'static str = "schedules";

    fn record_id(&self) -> Uuid {
        self.id.into()
    }
}

impl From<ScheduleSnapshot> for ScheduleRow {
    fn from(s: ScheduleSnapshot) -> Self {
        let d = s.details;
        Self {
            id: s.id,
            release_id: s.release_id,
            data_hora: d.pickup_date.and_time(d.pickup_time),
            quantidade: s.quantity.value(),
            motorista_nome: d.driver_name,
            motorista_documento: d.driver_document.as_str().to_string(),
            placa: d.vehicle_plate.as_str().to_string(),
            tipo_veiculo: d.vehicle_type,
            observacoes: d.notes,
            status: s.status.as_str().to_string(),
            created_by: s.created_by,
            updated_by: s.updated_by,
            motivo_cancelamento: s.cancel_reason,
            loading_id: s.completed_by_loading,
        }
    }
}

impl TryFrom<Versioned<ScheduleRow>> for Schedule {
    type Error = ServiceError;

    fn try_from(v: Versioned<ScheduleRow>) -> ServiceResult<Self> {
        const T: &str = ScheduleRow::TABLE;
        let row = v.row;
        let status = parse_enum(
            T,
            "status",
            &row.status,
            &[
                ScheduleStatus::Confirmed,
                ScheduleStatus::Pending,
                ScheduleStatus::Completed,
                ScheduleStatus::Cancelled,
            ],
            ScheduleStatus::as_str,
        )?;
        let details = PickupDetails {
            pickup_date: row.data_hora.date(),
            pickup_time: row.data_hora.time(),
            driver_name: row.motorista_nome,
            driver_document: DriverDocument::parse(&row.motorista_documento)?,
            vehicle_plate: VehiclePlate::parse(&row.placa)?,
            vehicle_type: row.tipo_veiculo,
            notes: row.observacoes,
        };
        let snapshot = ScheduleSnapshot {
            id: row.id,
            release_id: row.release_id,
            quantity: quantity(T, "quantidade", row.quantidade)?,
            details,
            status,
            created_by: row.created_by,
            updated_by: row.updated_by,
            cancel_reason: row.motivo_cancelamento,
            completed_by_loading: row.loading_id,
        };
        Ok(Schedule::from_snapshot(snapshot, v.version)?)
    }
}

// ---------------------------------------------------------------------------
// loadings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingRow {
    pub id: LoadingId,
    pub release_id: ReleaseId,
    pub schedule_id: Option<ScheduleId>,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantidade: Decimal,
    pub status: String,
    pub numero_nf: Option<String>,
    pub data_emissao_nf: Option<NaiveDate>,
    pub arquivo_nf: Option<String>,
    pub observacao_status: Option<String>,
    pub updated_by: Option<PrincipalId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reconciled_release: bool,
    #[serde(default)]
    pub reconciled_stock: bool,
    #[serde(default)]
    pub reconciled_schedule: bool,
}

impl Record for LoadingRow {
    const TABLE: &'static str = "loadings";

    fn record_id(&self) -> Uuid {
        self.id.into()
    }
}

impl From<LoadingSnapshot> for LoadingRow {
    fn from(s: LoadingSnapshot) -> Self {
        let (numero_nf, data_emissao_nf, arquivo_nf) = match s.invoice {
            Some(inv) => (Some(inv.number), Some(inv.date), Some(inv.file_ref)),
            None => (None, None, None),
        };
        Self {
            id: s.id,
            release_id: s.release_id,
            schedule_id: s.schedule_id,
            product_id: s.product_id,
            warehouse_id: s.warehouse_id,
            quantidade: s.planned_quantity.value(),
            status: s.status.as_str().to_string(),
            numero_nf,
            data_emissao_nf,
            arquivo_nf,
            observacao_status: s.status_note,
            updated_by: s.updated_by,
            created_at: s.opened_at,
            completed_at: s.completed_at,
            reconciled_release: s.reconciliation.release_withdrawn,
            reconciled_stock: s.reconciliation.stock_decremented,
            reconciled_schedule: s.reconciliation.schedule_completed,
        }
    }
}

impl LoadingRow {
    /// Rebuild the aggregate; photo counts come from the photo rows.
    pub fn into_loading(v: Versioned<LoadingRow>, photos: &[LoadingPhotoRow]) -> ServiceResult<Loading> {
        const T: &str = LoadingRow::TABLE;
        let row = v.row;
        let status = parse_enum(
            T,
            "status",
            &row.status,
            &[
                LoadingStatus::Waiting,
                LoadingStatus::InProgress,
                LoadingStatus::Completed,
                LoadingStatus::Cancelled,
            ],
            LoadingStatus::as_str,
        )?;
        let invoice = match (row.numero_nf, row.data_emissao_nf, row.arquivo_nf) {
            (Some(number), Some(date), Some(file_ref)) => Some(InvoiceDetails {
                number,
                date,
                file_ref,
            }),
            (None, None, None) => None,
            _ => return Err(invalid(T, format!("loading {} has partial invoice data", row.id))),
        };
        let photo_counts = photos
            .iter()
            .filter(|p| p.loading_id == row.id)
            .map(LoadingPhotoRow::evidence_type)
            .collect::<ServiceResult<PhotoCounts>>()?;

        let snapshot = LoadingSnapshot {
            id: row.id,
            release_id: row.release_id,
            schedule_id: row.schedule_id,
            product_id: row.product_id,
            warehouse_id: row.warehouse_id,
            planned_quantity: quantity(T, "quantidade", row.quantidade)?,
            status,
            photo_counts,
            invoice,
            status_note: row.observacao_status,
            updated_by: row.updated_by,
            opened_at: row.created_at,
            completed_at: row.completed_at,
            reconciliation: ReconciliationState {
                release_withdrawn: row.reconciled_release,
                stock_decremented: row.reconciled_stock,
                schedule_completed: row.reconciled_schedule,
            },
        };
        Ok(Loading::from_snapshot(snapshot, v.version)?)
    }
}

// ---------------------------------------------------------------------------
// loading_photos
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingPhotoRow {
    pub id: PhotoId,
    pub loading_id: LoadingId,
    pub tipo: String,
    pub url: String,
    pub uploaded_by: PrincipalId,
    pub created_at: DateTime<Utc>,
}

impl Record for LoadingPhotoRow {
    const TABLE: &'static str = "loading_photos";

    fn record_id(&self) -> Uuid {
        self.id.into()
    }
}

impl LoadingPhotoRow {
    pub fn new(
        id: PhotoId,
        loading_id: LoadingId,
        evidence_type: EvidenceType,
        url: impl Into<String>,
        uploaded_by: PrincipalId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            loading_id,
            tipo: evidence_type.as_str().to_string(),
            url: url.into(),
            uploaded_by,
            created_at,
        }
    }

    pub fn evidence_type(&self) -> ServiceResult<EvidenceType> {
        parse_enum(
            Self::TABLE,
            "tipo",
            &self.tipo,
            &EvidenceType::ALL,
            EvidenceType::as_str,
        )
    }
}

// ---------------------------------------------------------------------------
// stock_balances
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalanceRow {
    pub id: StockBalanceId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantidade_atual: Decimal,
    pub updated_by: Option<PrincipalId>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub absorbed_loadings: Vec<LoadingId>,
}

impl Record for StockBalanceRow {
    const TABLE: &'static str = "stock_balances";

    fn record_id(&self) -> Uuid {
        self.id.into()
    }
}

impl From<StockBalanceSnapshot> for StockBalanceRow {
    fn from(s: StockBalanceSnapshot) -> Self {
        Self {
            id: s.id,
            product_id: s.product_id,
            warehouse_id: s.warehouse_id,
            quantidade_atual: s.current.value(),
            updated_by: s.updated_by,
            updated_at: s.updated_at,
            absorbed_loadings: s.absorbed_loadings.into_iter().collect(),
        }
    }
}

impl TryFrom<Versioned<StockBalanceRow>> for StockBalance {
    type Error = ServiceError;

    /// A negative stored balance is read as zero.
    fn try_from(v: Versioned<StockBalanceRow>) -> ServiceResult<Self> {
        let row = v.row;
        let current = Quantity::new(row.quantidade_atual).unwrap_or(Quantity::ZERO);
        let snapshot = StockBalanceSnapshot {
            id: row.id,
            product_id: row.product_id,
            warehouse_id: row.warehouse_id,
            current,
            updated_by: row.updated_by,
            updated_at: row.updated_at,
            absorbed_loadings: row.absorbed_loadings.into_iter().collect(),
        };
        Ok(StockBalance::from_snapshot(snapshot, v.version))
    }
}

/// Current aggregate state as a row, `None` if it was never created.
pub trait IntoRow {
    type Row: Record;

    fn to_row(&self) -> Option<Self::Row>;
}

impl IntoRow for Release {
    type Row = ReleaseRow;

    fn to_row(&self) -> Option<ReleaseRow> {
        self.snapshot().map(ReleaseRow::from)
    }
}

impl IntoRow for Schedule {
    type Row = ScheduleRow;

    fn to_row(&self) -> Option<ScheduleRow> {
        self.snapshot().map(ScheduleRow::from)
    }
}

impl IntoRow for Loading {
    type Row = LoadingRow;

    fn to_row(&self) -> Option<LoadingRow> {
        self.snapshot().map(LoadingRow::from)
    }
}

impl IntoRow for StockBalance {
    type Row = StockBalanceRow;

    fn to_row(&self) -> Option<StockBalanceRow> {
        self.snapshot().map(StockBalanceRow::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkyard_core::AggregateRoot;
    use chrono::NaiveTime;

    fn release_row() -> ReleaseRow {
        ReleaseRow {
            id: ReleaseId::new(),
            client: "Cooperativa Sul".to_string(),
            product_id: ProductId::new(),
            warehouse_id: WarehouseId::new(),
            quantidade: Decimal::from(10),
            quantidade_retirada: Decimal::from(4),
            pedido: "ped-2025-0042".to_string(),
            status: "pending".to_string(),
            created_by: PrincipalId::new(),
            created_at: Utc::now(),
            cancelled_at: None,
            cancelled_by: None,
            absorbed_loadings: vec![],
        }
    }

    #[test]
    fn release_status_is_rederived_on_read() {
        let release = Release::try_from(Versioned {
            row: release_row(),
            version: 3,
        })
        .unwrap();
        assert_eq!(release.status(), ReleaseStatus::Partial);
        assert_eq!(release.version(), 3);
        assert_eq!(release.order_reference().unwrap().as_str(), "PED-2025-0042");

        let back = release.to_row().unwrap();
        assert_eq!(back.status, "partial");
        assert_eq!(back.pedido, "PED-2025-0042");
    }

    #[test]
    fn unknown_status_is_a_decode_error() {
        let mut row = release_row();
        row.status = "archived".to_string();
        let err = Release::try_from(Versioned { row, version: 1 }).unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::Decode { .. })));
    }

    #[test]
    fn overdrawn_release_row_is_rejected() {
        let mut row = release_row();
        row.quantidade_retirada = Decimal::from(11);
        assert!(Release::try_from(Versioned { row, version: 1 }).is_err());
    }

    #[test]
    fn schedule_row_validates_identity_columns() {
        let row = ScheduleRow {
            id: ScheduleId::new(),
            release_id: ReleaseId::new(),
            data_hora: NaiveDate::from_ymd_opt(2025, 3, 10)
                .unwrap()
                .and_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
            quantidade: Decimal::from(3),
            motorista_nome: "Ana".to_string(),
            motorista_documento: "52998224725".to_string(),
            placa: "ABC1D23".to_string(),
            tipo_veiculo: "bitrem".to_string(),
            observacoes: None,
            status: "pending".to_string(),
            created_by: PrincipalId::new(),
            updated_by: None,
            motivo_cancelamento: None,
            loading_id: None,
        };
        let schedule = Schedule::try_from(Versioned { row: row.clone(), version: 1 }).unwrap();
        assert_eq!(schedule.status(), ScheduleStatus::Pending);
        assert_eq!(schedule.to_row().unwrap(), row);

        let mut bad = row;
        bad.placa = "ZZ".to_string();
        assert!(Schedule::try_from(Versioned { row: bad, version: 1 }).is_err());
    }

    #[test]
    fn loading_counts_come_from_photo_rows() {
        let loading_id = LoadingId::new();
        let row = LoadingRow {
            id: loading_id,
            release_id: ReleaseId::new(),
            schedule_id: None,
            product_id: ProductId::new(),
            warehouse_id: WarehouseId::new(),
            quantidade: Decimal::from(4),
            status: "in_progress".to_string(),
            numero_nf: None,
            data_emissao_nf: None,
            arquivo_nf: None,
            observacao_status: None,
            updated_by: None,
            created_at: Utc::now(),
            completed_at: None,
            reconciled_release: false,
            reconciled_stock: false,
            reconciled_schedule: false,
        };
        let by = PrincipalId::new();
        let photos = vec![
            LoadingPhotoRow::new(PhotoId::new(), loading_id, EvidenceType::Before, "a", by, Utc::now()),
            LoadingPhotoRow::new(PhotoId::new(), loading_id, EvidenceType::Before, "b", by, Utc::now()),
            LoadingPhotoRow::new(PhotoId::new(), LoadingId::new(), EvidenceType::After, "c", by, Utc::now()),
        ];
        let loading = LoadingRow::into_loading(Versioned { row, version: 2 }, &photos).unwrap();
        assert_eq!(loading.photo_counts().get(EvidenceType::Before), 2);
        assert_eq!(loading.photo_counts().get(EvidenceType::After), 0);
        assert_eq!(loading.status(), LoadingStatus::InProgress);
    }
}
