//! # Progression Benchmarks
//!
//! Performance benchmarks for the visibility resolver and the cursor.
//!
//! Run with: `cargo bench -p aqsurvey-core`

use aqsurvey_core::{
    Condition, DefinitionRegistry, FieldDefinition, FieldValue, Operand, RevealRule,
    SessionCursor, SkipContext, StageOptions, StepDefinition, visible_fields,
};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::collections::BTreeMap;
use std::hint::black_box;

struct NoState;

impl SkipContext for NoState {
    fn resolve(&self, _operand: &Operand) -> Option<&FieldValue> {
        None
    }
}

/// A step where every field reveals the next one (a reveal chain of `len`).
fn chain_step(len: usize) -> StepDefinition {
    let mut step = StepDefinition::new("chain");
    for i in 0..len {
        let mut field = FieldDefinition::choice(format!("f{}", i), ["Yes", "No"]);
        if i > 0 {
            field = field.hidden();
        }
        if i + 1 < len {
            field = field.reveal(RevealRule::show(
                Condition::Equals("Yes".into()),
                [format!("f{}", i + 1)],
            ));
        }
        step = step.field(field);
    }
    step
}

fn linear_plan(stages: usize, repeat: u32) -> DefinitionRegistry {
    let mut builder = DefinitionRegistry::builder("bench");
    for i in 0..stages {
        let steps = (0..4)
            .map(|j| StepDefinition::new(format!("s{}_{}", i, j)))
            .collect();
        let _ = builder.register_stage(
            format!("stage{}", i),
            steps,
            StageOptions::default().repeat(repeat),
        );
    }
    builder.build().expect("build")
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_visibility_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("visibility_chain");

    for len in [8usize, 64, 256].iter() {
        let step = chain_step(*len);
        let responses: BTreeMap<String, FieldValue> = (0..*len)
            .map(|i| (format!("f{}", i), FieldValue::single("Yes")))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(len), len, |b, _| {
            b.iter(|| black_box(visible_fields(&step, &responses)));
        });
    }

    group.finish();
}

fn bench_cursor_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("cursor_walk");

    for stages in [10usize, 100].iter() {
        let registry = linear_plan(*stages, 3);
        group.bench_with_input(BenchmarkId::from_parameter(stages), stages, |b, _| {
            b.iter(|| {
                let mut cursor = SessionCursor::new();
                let _ = cursor.start(&registry, &NoState);
                while !cursor.is_complete() {
                    let _ = cursor.advance(&registry, &NoState);
                }
                black_box(cursor)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_visibility_chain, bench_cursor_walk);
criterion_main!(benches);
