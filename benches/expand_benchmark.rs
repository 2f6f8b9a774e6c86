// Throughput of turning a client proxy vector into a model feature row, the
// per-request work of every prediction.

use citymind::expand::expand;
use citymind::proxy::ProxyVector;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

/// Target and scenario pairs covering each schema layout.
const LAYOUTS: [(&str, bool); 4] = [
    ("mhlth_crudeprev", true),
    ("mhlth_crudeprev", false),
    ("depression_crudeprev", true),
    ("depression_crudeprev", false),
];

fn bench_expand(c: &mut Criterion) {
    let mut group = c.benchmark_group("expand");
    for (target, use_social) in LAYOUTS {
        let proxy = ProxyVector {
            target: target.to_string(),
            use_social,
            ..ProxyVector::default()
        };
        let label = format!("{target}/{}", if use_social { "full_social" } else { "no_social" });
        group.bench_with_input(BenchmarkId::from_parameter(label), &proxy, |b, proxy| {
            b.iter(|| expand(black_box(proxy)))
        });
    }
    group.finish();
}

fn bench_parse_and_expand(c: &mut Criterion) {
    let request = json!({
        "health_index": 0.42,
        "economy_index": "0.55",
        "environment_index": 0.3,
        "education_index": 0.6,
        "social_index": 0.25,
        "population": 250000,
        "urbanization": 0.8,
        "target": "depression_crudeprev",
        "use_social": "yes"
    });
    c.bench_function("from_json_then_expand", |b| {
        b.iter(|| {
            let proxy = ProxyVector::from_json(black_box(&request)).map(|p| expand(&p));
            black_box(proxy)
        })
    });
}

criterion_group!(benches, bench_expand, bench_parse_and_expand);
criterion_main!(benches);
