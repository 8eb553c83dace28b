//! Dispatch benchmarks: fused tail dispatch vs. full continuation
//! capture.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ichor_runtime::{
    perform, ClauseShape, Comp, EffectDecl, EffectId, EffectRegistry, Handler, Machine, OpIndex,
    Value, ValueShape,
};

const ASK: OpIndex = OpIndex(0);
const ROUNDS: usize = 256;

fn registry() -> (Arc<EffectRegistry>, EffectId) {
    let mut registry = EffectRegistry::new();
    let give = registry
        .declare_effect(EffectDecl::new("GiveInt").operation("ask", vec![], ValueShape::Int))
        .unwrap();
    (Arc::new(registry), give)
}

fn chain_performs(effect: EffectId, n: usize, acc: i64) -> Comp {
    if n == 0 {
        Comp::value(acc)
    } else {
        perform(effect, ASK, vec![])
            .and_then(move |v| chain_performs(effect, n - 1, acc + v.as_int().unwrap()))
    }
}

fn bench_dispatch(c: &mut Criterion) {
    let (registry, give) = registry();

    c.bench_function("dispatch/fused_tail", |b| {
        b.iter(|| {
            let handler = Handler::builder(&registry)
                .on_shaped(give, "ask", ClauseShape::Resume, |_args, k| k.resume(1i64))
                .build()
                .unwrap();
            let mut machine = Machine::new(Arc::clone(&registry));
            let result = machine
                .install_handler(handler, Box::new(move || chain_performs(give, ROUNDS, 0)))
                .unwrap();
            assert_eq!(black_box(result), Value::Int(ROUNDS as i64));
        })
    });

    c.bench_function("dispatch/captured", |b| {
        b.iter(|| {
            let handler = Handler::builder(&registry)
                .on(give, "ask", |_args, k| k.resume(1i64))
                .build()
                .unwrap();
            let mut machine = Machine::new(Arc::clone(&registry));
            let result = machine
                .install_handler(handler, Box::new(move || chain_performs(give, ROUNDS, 0)))
                .unwrap();
            assert_eq!(black_box(result), Value::Int(ROUNDS as i64));
        })
    });
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
