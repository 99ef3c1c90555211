use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use hhrec_core::{CatalogRecord, HouseholdKey, HouseholdProfile, ItemDirectory, ItemInfo, ItemMap, ResultRecord};
use hhrec_infra::store::{InMemoryCatalogStore, InMemoryResultStore};
use hhrec_infra::workers::JobProcessor;

fn item_map(size: i64) -> ItemMap {
    (0..size)
        .map(|id| (id, ItemInfo::new(format!("Category {}", id % 40), "🛒")))
        .collect()
}

fn catalog_record(key: i64, recommendations: usize) -> CatalogRecord {
    let profile = HouseholdProfile {
        age_desc: Some("45-54".to_string()),
        income_desc: Some("75-99K".to_string()),
        homeowner_desc: Some("Homeowner".to_string()),
        ..HouseholdProfile::default()
    };
    let ids = (0..recommendations as i64).map(|i| i * 7).collect();
    CatalogRecord::new(HouseholdKey::new(key).unwrap(), profile, ids)
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_result");
    let items = item_map(5_000);

    for recommendations in [5usize, 20, 100] {
        let record = catalog_record(1, recommendations);
        group.throughput(Throughput::Elements(recommendations as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(recommendations),
            &record,
            |b, record| b.iter(|| ResultRecord::render(black_box(record), black_box(&items))),
        );
    }

    group.finish();
}

fn bench_process(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    let catalog = InMemoryCatalogStore::with_records((1..=1_000).map(|k| catalog_record(k, 20)));
    let processor = JobProcessor::new(
        catalog,
        InMemoryResultStore::new(),
        ItemDirectory::new(item_map(5_000)),
        5,
    );
    let bodies: Vec<Vec<u8>> = (1..=1_000)
        .map(|k| format!(r#"{{"user_id":{k}}}"#).into_bytes())
        .collect();

    c.bench_function("process_job_in_memory", |b| {
        let mut i = 0;
        b.iter(|| {
            let body = &bodies[i % bodies.len()];
            i += 1;
            runtime.block_on(processor.process(black_box(body))).unwrap()
        })
    });
}

criterion_group!(benches, bench_render, bench_process);
criterion_main!(benches);
