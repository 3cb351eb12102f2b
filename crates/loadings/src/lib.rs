//! Loading state machine domain module.
//!
//! `waiting -> {in_progress, cancelled}`, `in_progress -> {completed, cancelled}`.
//! Completion is gated on photographic evidence and leaves a set of
//! reconciliation steps (release withdrawal, stock decrement, schedule
//! completion) to be applied by the caller and acknowledged back here.

pub mod evidence;
pub mod loading;

pub use evidence::{
    DOCUMENT_FORMATS, EvidenceType, IMAGE_FORMATS, PhotoCounts, REQUIRED_EVIDENCE, ensure_format,
};
pub use loading::{
    AcknowledgeReconciliation, InvoiceDetails, InvoiceRegistered, Loading, LoadingCancelled,
    LoadingCommand, LoadingCompleted, LoadingEvent, LoadingOpened, LoadingSnapshot, LoadingStarted,
    LoadingStatus, OpenLoading, PhotoRecorded, ReconciliationAcknowledged, ReconciliationState,
    ReconciliationStep, RecordPhoto, RegisterInvoice, TransitionLoading,
};
