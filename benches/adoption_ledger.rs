//! Benchmark for the adoption ledger
//!
//! Snapshot refresh and adopt/take/restore cycles over a large host.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use storage_pool_manager::{derive_key, AdoptionLedger, DriveInfo, DriveKey};
use uuid::Uuid;

fn drives(count: usize) -> Vec<DriveInfo> {
    (0..count)
        .map(|i| {
            let mut drive = DriveInfo {
                name: format!("sd{}", i),
                path: format!("/dev/sd{}", i),
                size_bytes: 4 << 40,
                serial: format!("ZL2{:05}", i),
                model: "ST4000NM0035".into(),
                ..Default::default()
            };
            drive.drive_key = derive_key(&drive);
            drive
        })
        .collect()
}

fn bench_refresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("adoption_ledger");
    let snapshot = drives(1000);
    group.throughput(Throughput::Elements(snapshot.len() as u64));

    let ledger = AdoptionLedger::new();
    ledger.refresh(snapshot.clone());
    for drive in snapshot.iter().step_by(2) {
        let _ = ledger.adopt(&drive.drive_key, |_| Ok(()));
    }

    group.bench_function("refresh_1000_drives", |b| {
        b.iter(|| ledger.refresh(black_box(snapshot.clone())));
    });

    group.finish();
}

fn bench_adopt(c: &mut Criterion) {
    let mut group = c.benchmark_group("adoption_ledger");
    group.throughput(Throughput::Elements(1));

    let snapshot = drives(1000);
    let keys: Vec<DriveKey> = snapshot.iter().map(|d| d.drive_key.clone()).collect();

    group.bench_function("adopt_unadopt", |b| {
        let ledger = AdoptionLedger::new();
        ledger.refresh(snapshot.clone());
        let mut counter = 0usize;

        b.iter(|| {
            counter += 1;
            let key = &keys[counter % keys.len()];
            if let Ok(adopted) = ledger.adopt(black_box(key), |_| Ok(())) {
                let _ = ledger.unadopt(adopted.uuid, |_| Ok(()));
            }
        });
    });

    group.finish();
}

fn bench_take_restore(c: &mut Criterion) {
    let mut group = c.benchmark_group("adoption_ledger");
    group.throughput(Throughput::Elements(8));

    let snapshot = drives(64);
    let ledger = AdoptionLedger::new();
    ledger.refresh(snapshot.clone());
    let uuids: Vec<Uuid> = snapshot
        .iter()
        .filter_map(|d| ledger.adopt(&d.drive_key, |_| Ok(())).ok())
        .map(|a| a.uuid)
        .collect();

    group.bench_function("take_restore_8", |b| {
        b.iter(|| {
            if let Ok(taken) = ledger.take_free(black_box(&uuids[..8])) {
                ledger.restore(taken);
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_refresh, bench_adopt, bench_take_restore);
criterion_main!(benches);
