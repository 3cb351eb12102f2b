use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{Days, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use bulkyard_auth::{Principal, Role};
use bulkyard_core::{ProductId, ReleaseId, WarehouseId};
use bulkyard_events::{EventEnvelope, InMemoryEventBus};
use bulkyard_infra::{InvoiceInput, Logistics, LogisticsConfig, NewLoading, NewRelease, NewSchedule};
use bulkyard_loadings::{EvidenceType, LoadingStatus};
use bulkyard_schedules::PickupRequest;

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

struct Bench {
    logistics: Logistics<Bus>,
    product_id: ProductId,
    warehouse_id: WarehouseId,
    coordinator: Principal,
    warehouse: Principal,
    client: Principal,
}

impl Bench {
    fn new() -> Self {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        Self {
            logistics: Logistics::in_memory(bus, LogisticsConfig::default()),
            product_id: ProductId::new(),
            warehouse_id: WarehouseId::new(),
            coordinator: Principal::with_role(Role::Logistics),
            warehouse: Principal::with_role(Role::Warehouse),
            client: Principal::with_role(Role::Client),
        }
    }

    fn release(&self, authorized: u64) -> ReleaseId {
        self.logistics
            .releases()
            .create_release(
                &self.coordinator,
                NewRelease {
                    client: "Bench Client".to_string(),
                    product_id: self.product_id,
                    warehouse_id: self.warehouse_id,
                    authorized_quantity: Decimal::from(authorized),
                    order_reference: "PED-2025-0001".to_string(),
                    skip_stock_check: true,
                },
            )
            .unwrap()
            .id_typed()
    }

    fn book(&self, release_id: ReleaseId, quantity: u32) -> bool {
        self.logistics
            .schedules()
            .create_schedule(
                &self.client,
                release_id,
                NewSchedule {
                    quantity: Decimal::from(quantity),
                    pickup: pickup(),
                },
            )
            .is_ok()
    }
}

fn pickup() -> PickupRequest {
    let tomorrow = Utc::now().date_naive() + Days::new(1);
    PickupRequest {
        pickup_date: tomorrow,
        pickup_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        driver_name: "Bench Driver".to_string(),
        driver_document: "529.982.247-25".to_string(),
        vehicle_plate: "ABC1D23".to_string(),
        vehicle_type: "Truck".to_string(),
        notes: None,
    }
}

/// Single booking against a release that already carries `existing`
/// schedules; reservation sums scan those schedules.
fn bench_schedule_booking(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule_booking");

    for existing in [0u32, 10, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("book_one", existing), existing, |b, &existing| {
            let bench = Bench::new();
            let release_id = bench.release(u64::MAX >> 16);
            for _ in 0..existing {
                bench.book(release_id, 1);
            }
            b.iter(|| black_box(bench.book(release_id, 1)));
        });
    }

    group.finish();
}

/// Several threads racing for the same release until it is exhausted.
fn bench_contended_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_allocation");
    group.sample_size(20);

    for threads in [1usize, 2, 4, 8].iter() {
        let bookings = 64u32;
        group.throughput(Throughput::Elements(bookings as u64));
        group.bench_with_input(BenchmarkId::new("threads", threads), threads, |b, &threads| {
            b.iter(|| {
                let bench = Bench::new();
                let release_id = bench.release(bookings as u64);
                let per_thread = (bookings as usize).div_ceil(threads) + 1;
                let booked: usize = std::thread::scope(|s| {
                    let handles: Vec<_> = (0..threads)
                        .map(|_| {
                            s.spawn(|| (0..per_thread).filter(|_| bench.book(release_id, 1)).count())
                        })
                        .collect();
                    handles.into_iter().map(|h| h.join().unwrap()).sum()
                });
                assert_eq!(booked, bookings as usize);
                black_box(booked)
            });
        });
    }

    group.finish();
}

/// Open, evidence, complete and reconcile one scheduled loading.
fn bench_loading_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("loading_pipeline");
    group.sample_size(200);

    group.bench_function("complete_and_reconcile", |b| {
        let bench = Bench::new();
        bench
            .logistics
            .stock()
            .receive(&bench.warehouse, bench.product_id, bench.warehouse_id, Decimal::from(1_000_000_000u64))
            .unwrap();
        let release_id = bench.release(1_000_000_000);
        let loadings = bench.logistics.loadings();

        b.iter(|| {
            let schedule = bench
                .logistics
                .schedules()
                .create_schedule(
                    &bench.client,
                    release_id,
                    NewSchedule {
                        quantity: Decimal::from(25),
                        pickup: pickup(),
                    },
                )
                .unwrap();
            let loading = loadings
                .open_loading(&bench.warehouse, NewLoading::for_schedule(release_id, schedule.id_typed()))
                .unwrap();
            let id = loading.id_typed();
            loadings
                .record_photo(&bench.warehouse, id, EvidenceType::Before, "before.jpg", b"img")
                .unwrap();
            loadings
                .record_photo(&bench.warehouse, id, EvidenceType::After, "after.jpg", b"img")
                .unwrap();
            loadings
                .register_invoice(
                    &bench.warehouse,
                    id,
                    InvoiceInput {
                        number: "NF-1".to_string(),
                        date: Utc::now().date_naive(),
                        file_ref: "nf-1.pdf".to_string(),
                    },
                )
                .unwrap();
            black_box(
                loadings
                    .transition(&bench.warehouse, id, LoadingStatus::Completed, None)
                    .unwrap(),
            );
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_schedule_booking,
    bench_contended_allocation,
    bench_loading_pipeline
);
criterion_main!(benches);
