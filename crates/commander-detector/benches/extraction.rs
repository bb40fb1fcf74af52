use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use commander_detector::{extract_json_array, extract_json_object, MarkerClassifier, PromptClassifier};

/// Build `records` JSON records surrounded by typical CLI noise.
fn listing_output(records: usize) -> String {
    let items: Vec<_> = (0..records)
        .map(|i| {
            json!({
                "record_uid": format!("uid-{i:06}"),
                "title": format!("Record {i} with \"quotes\" and {{braces}}"),
                "type": "login",
                "fields": [{"type": "login", "value": ["user"]}],
            })
        })
        .collect();

    format!(
        "Keeper Commander v16.11\nSyncing...\n{}\nMy Vault> ",
        serde_json::to_string_pretty(&items).unwrap()
    )
}

fn bench_extract_array(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_json_array");

    for records in [10, 100, 1000].iter() {
        let output = listing_output(*records);
        group.bench_with_input(BenchmarkId::from_parameter(records), &output, |b, output| {
            b.iter(|| extract_json_array(black_box(output)).unwrap());
        });
    }

    group.finish();
}

fn bench_extract_object(c: &mut Criterion) {
    let output = format!(
        "banner line\n{}\nMy Vault> ",
        json!({"password": "x".repeat(64), "strength": 100})
    );

    c.bench_function("extract_json_object", |b| {
        b.iter(|| extract_json_object(black_box(&output)).unwrap());
    });
}

fn bench_completion_check(c: &mut Criterion) {
    let classifier = MarkerClassifier::default();
    let mut group = c.benchmark_group("is_complete");

    for records in [10, 1000].iter() {
        let output = listing_output(*records);
        group.bench_with_input(BenchmarkId::from_parameter(records), &output, |b, output| {
            b.iter(|| classifier.is_complete(black_box(output)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_extract_array,
    bench_extract_object,
    bench_completion_check
);
criterion_main!(benches);
