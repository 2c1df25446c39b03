//! Benchmarks for one 128-frame render at several population sizes.
//!
//! Run with: cargo bench --bench render_block

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use metaharmony::catalog::RawPathway;
use metaharmony::{Catalog, Command, Engine, EngineConfig, Population};

const CATEGORIES: [&str; 6] = [
    "energy",
    "biosynthesis",
    "degradation",
    "salvage",
    "other",
    "superpathways",
];

fn loaded_engine(entities: usize) -> Engine {
    let config = EngineConfig {
        seed: Some(1),
        ..EngineConfig::default()
    };
    let records = (0..entities)
        .map(|i| RawPathway {
            id: format!("PWY-{i}"),
            n: Some(i as u32 % 15 + 1),
            d: Some(i as u32 % 8 + 1),
            category: Some(CATEGORIES[i % CATEGORIES.len()].to_string()),
            abundance: Some(1.0 + (i % 37) as f64),
            ..Default::default()
        })
        .collect();
    let catalog = Arc::new(Catalog::from_records(records).expect("non-empty catalog"));
    let mut engine = Engine::new(&config);
    engine.apply(Command::LoadDataset(Box::new(Population::build(catalog, &config, 1))));
    engine.apply(Command::SetFocus(Some(0)));
    engine
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_block");

    for entities in [50, 300, 600] {
        let mut engine = loaded_engine(entities);
        let (mut left, mut right) = (vec![0.0f32; 128], vec![0.0f32; 128]);
        // let layers and grains reach a steady population first
        for _ in 0..2_000 {
            engine.render(&mut left, &mut right, |_| {});
        }

        group.bench_with_input(BenchmarkId::from_parameter(entities), &entities, |b, _| {
            b.iter(|| {
                engine.render(&mut left, &mut right, |_| {});
                black_box(left[0] + right[0])
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_render);
criterion_main!(benches);
