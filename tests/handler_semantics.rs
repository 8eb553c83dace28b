//! Integration tests for handler dispatch semantics: nearest-handler
//! search, return clauses, one-shot continuations, abandonment, and
//! tail-resumptive fusion.

use std::sync::Arc;

use parking_lot::Mutex;

use ichor_runtime::{
    install_handler, perform, ClauseShape, Comp, EffectDecl, EffectId, EffectRegistry, Handler,
    Machine, OpIndex, RuntimeFault, Value, ValueShape,
};

const ASK: OpIndex = OpIndex(0);

fn give_int() -> (Arc<EffectRegistry>, EffectId) {
    let mut registry = EffectRegistry::new();
    let give = registry
        .declare_effect(EffectDecl::new("GiveInt").operation("ask", vec![], ValueShape::Int))
        .unwrap();
    (Arc::new(registry), give)
}

fn ask(effect: EffectId) -> Comp {
    perform(effect, ASK, vec![])
}

/// Scenario A: a handler that always resumes with 0; a scrutinee that
/// performs twice and sums the results with 5.
#[test]
fn test_always_zero_handler_sums_to_five() {
    let (registry, give) = give_int();
    let handler = Handler::builder(&registry)
        .on(give, "ask", |_args, k| k.resume(0i64))
        .build()
        .unwrap();

    let result = install_handler(
        &registry,
        handler,
        Box::new(move || {
            ask(give).and_then(move |a| {
                ask(give).map(move |b| {
                    Value::Int(5 + a.as_int().unwrap() + b.as_int().unwrap())
                })
            })
        }),
    )
    .unwrap();
    assert_eq!(result, Value::Int(5));
}

/// Scenario B: a counting handler mapping each operation to
/// `1 + resume(0)` and any completed result to 0; performing twice
/// yields 2.
#[test]
fn test_counting_handler_counts_two_performs() {
    let (registry, give) = give_int();
    let handler = Handler::builder(&registry)
        .on(give, "ask", |_args, k| {
            k.resume(0i64)
                .map(|r| Value::Int(1 + r.as_int().unwrap()))
        })
        .on_return(|_value| Comp::value(0i64))
        .build()
        .unwrap();

    let result = install_handler(
        &registry,
        handler,
        Box::new(move || {
            ask(give)
                .and_then(move |_| ask(give))
                .and_then(|_| Comp::value("done"))
        }),
    )
    .unwrap();
    assert_eq!(result, Value::Int(2));
}

/// Scenario C: a clause that never resumes returns 42, and nothing after
/// the perform site runs (observed through a side-effect log).
#[test]
fn test_abandoning_clause_skips_rest_of_scrutinee() {
    let (registry, give) = give_int();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let handler = Handler::builder(&registry)
        .on(give, "ask", |_args, _k| Comp::value(42i64))
        .build()
        .unwrap();

    let thunk_log = Arc::clone(&log);
    let result = install_handler(
        &registry,
        handler,
        Box::new(move || {
            thunk_log.lock().push("before");
            let after_log = Arc::clone(&thunk_log);
            ask(give).and_then(move |_| {
                after_log.lock().push("after");
                Comp::value(0i64)
            })
        }),
    )
    .unwrap();

    assert_eq!(result, Value::Int(42));
    assert_eq!(*log.lock(), vec!["before"]);
}

/// Scenario D: with two nested installations for the same effect,
/// performing inside the inner one dispatches to the inner clause even
/// though both match.
#[test]
fn test_inner_installation_wins() {
    let (registry, give) = give_int();
    let outer = Handler::builder(&registry)
        .on(give, "ask", |_args, k| k.resume(2i64))
        .build()
        .unwrap();
    let inner = Handler::builder(&registry)
        .on(give, "ask", |_args, k| k.resume(1i64))
        .build()
        .unwrap();

    let result = install_handler(
        &registry,
        outer,
        Box::new(move || Comp::handle(inner, move || ask(give))),
    )
    .unwrap();
    assert_eq!(result, Value::Int(1));
}

/// Deep handlers persist across resumes: both performs of the scrutinee
/// reach the inner installation.
#[test]
fn test_deep_handler_persists_across_resumes() {
    let (registry, give) = give_int();
    let outer = Handler::builder(&registry)
        .on(give, "ask", |_args, k| k.resume(20i64))
        .build()
        .unwrap();
    let inner = Handler::builder(&registry)
        .on(give, "ask", |_args, k| k.resume(10i64))
        .build()
        .unwrap();

    let result = install_handler(
        &registry,
        outer,
        Box::new(move || {
            Comp::handle(inner, move || {
                ask(give).and_then(move |a| {
                    ask(give).map(move |b| Value::Int(a.as_int().unwrap() + b.as_int().unwrap()))
                })
            })
        }),
    )
    .unwrap();
    assert_eq!(result, Value::Int(20));
}

/// Shallow handlers are consumed by their first dispatch: after the
/// resume, performing again (without a fresh installation) reaches the
/// next-outer handler.
#[test]
fn test_shallow_handler_falls_through_to_outer() {
    let (registry, give) = give_int();
    let outer = Handler::builder(&registry)
        .on(give, "ask", |_args, k| k.resume(20i64))
        .build()
        .unwrap();
    let inner = Handler::builder(&registry)
        .shallow()
        .on(give, "ask", |_args, k| k.resume(10i64))
        .build()
        .unwrap();

    let result = install_handler(
        &registry,
        outer,
        Box::new(move || {
            Comp::handle(inner, move || {
                ask(give).and_then(move |a| {
                    ask(give).map(move |b| Value::Int(a.as_int().unwrap() + b.as_int().unwrap()))
                })
            })
        }),
    )
    .unwrap();
    assert_eq!(result, Value::Int(30));
}

/// A shallow handler can recurse through itself only by explicit
/// re-installation around the resume.
#[test]
fn test_shallow_handler_explicit_reinstallation() {
    let (registry, give) = give_int();

    fn counting(registry: &Arc<EffectRegistry>, give: EffectId, n: i64) -> Handler {
        let reg = Arc::clone(registry);
        Handler::builder(registry)
            .shallow()
            .on(give, "ask", move |_args, k| {
                let next = counting(&reg, give, n + 1);
                Comp::handle(next, move || k.resume(n))
            })
            .build()
            .unwrap()
    }

    let result = install_handler(
        &registry,
        counting(&registry, give, 1),
        Box::new(move || {
            ask(give).and_then(move |a| {
                ask(give).map(move |b| Value::Int(a.as_int().unwrap() + b.as_int().unwrap()))
            })
        }),
    )
    .unwrap();
    // First perform answers 1, the re-installed handler answers 2.
    assert_eq!(result, Value::Int(3));
}

/// The return clause fires exactly once for a normally-completing
/// scrutinee, and its result is the frame's overall result.
#[test]
fn test_return_clause_fires_exactly_once() {
    let (registry, give) = give_int();
    let fired = Arc::new(Mutex::new(0u32));
    let fired_in_clause = Arc::clone(&fired);

    let handler = Handler::builder(&registry)
        .on(give, "ask", |_args, k| k.resume(7i64))
        .on_return(move |value| {
            *fired_in_clause.lock() += 1;
            Comp::value(Value::Int(value.as_int().unwrap() * 10))
        })
        .build()
        .unwrap();

    let result = install_handler(&registry, handler, Box::new(move || ask(give))).unwrap();
    assert_eq!(result, Value::Int(70));
    assert_eq!(*fired.lock(), 1);
}

/// The return clause must not fire when a clause produces the frame's
/// result without resuming.
#[test]
fn test_return_clause_skipped_on_abandonment() {
    let (registry, give) = give_int();
    let fired = Arc::new(Mutex::new(0u32));
    let fired_in_clause = Arc::clone(&fired);

    let handler = Handler::builder(&registry)
        .on(give, "ask", |_args, _k| Comp::value(42i64))
        .on_return(move |value| {
            *fired_in_clause.lock() += 1;
            Comp::value(value)
        })
        .build()
        .unwrap();

    let result = install_handler(
        &registry,
        handler,
        Box::new(move || ask(give).and_then(|_| Comp::value(0i64))),
    )
    .unwrap();
    assert_eq!(result, Value::Int(42));
    assert_eq!(*fired.lock(), 0);
}

/// Resuming a continuation a second time faults with
/// `ContinuationReused`; the downstream code does not run twice.
#[test]
fn test_second_resume_faults() {
    let (registry, give) = give_int();
    let runs = Arc::new(Mutex::new(0u32));
    let runs_in_scrutinee = Arc::clone(&runs);

    let handler = Handler::builder(&registry)
        .on(give, "ask", |_args, k| {
            let first = k.resume(1i64);
            let second = k.resume(2i64);
            first.and_then(move |_| second)
        })
        .build()
        .unwrap();

    let fault = install_handler(
        &registry,
        handler,
        Box::new(move || {
            ask(give).and_then(move |v| {
                *runs_in_scrutinee.lock() += 1;
                Comp::value(v)
            })
        }),
    )
    .unwrap_err();

    assert!(matches!(fault, RuntimeFault::ContinuationReused { .. }));
    assert_eq!(*runs.lock(), 1);
}

/// An unhandled perform reports the operation and the chain depth at the
/// perform site.
#[test]
fn test_unhandled_effect_reports_context() {
    let mut registry = EffectRegistry::new();
    let give = registry
        .declare_effect(EffectDecl::new("GiveInt").operation("ask", vec![], ValueShape::Int))
        .unwrap();
    let other = registry
        .declare_effect(EffectDecl::new("Other").operation("nop", vec![], ValueShape::Unit))
        .unwrap();
    let registry = Arc::new(registry);

    // One unrelated frame is in scope when the perform fails.
    let unrelated = Handler::builder(&registry)
        .on(other, "nop", |_args, k| k.resume(Value::Unit))
        .build()
        .unwrap();

    let fault = install_handler(&registry, unrelated, Box::new(move || ask(give))).unwrap_err();
    assert_eq!(
        fault,
        RuntimeFault::UnhandledEffect {
            effect: "GiveInt".into(),
            operation: "ask".into(),
            depth: 1,
        }
    );
}

/// Tail-resumption equivalence: a clause dispatched fused (declared
/// shape) and the same clause dispatched with full capture produce the
/// same observable side effect sequence and the same final value.
#[test]
fn test_fused_and_captured_observably_equivalent() {
    fn run(shaped: bool) -> (Value, Vec<String>) {
        let mut registry = EffectRegistry::new();
        let cell = registry
            .declare_effect(EffectDecl::new("Cell").operation("get", vec![], ValueShape::Int))
            .unwrap();
        let registry = Arc::new(registry);

        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let clause_log = Arc::clone(&log);
        let counter = Arc::new(Mutex::new(0i64));

        let clause = move |_args: Vec<Value>, k: ichor_runtime::Continuation| {
            clause_log.lock().push("clause".to_string());
            let mut n = counter.lock();
            *n += 1;
            k.resume(*n)
        };

        let builder = Handler::builder(&registry);
        let handler = if shaped {
            builder.on_shaped(
                cell,
                "get",
                ClauseShape::Seq(vec![ClauseShape::Value, ClauseShape::Resume]),
                clause,
            )
        } else {
            builder.on(cell, "get", clause)
        }
        .build()
        .unwrap();

        let body_log = Arc::clone(&log);
        let result = install_handler(
            &registry,
            handler,
            Box::new(move || {
                body_log.lock().push("before".to_string());
                let mid_log = Arc::clone(&body_log);
                perform(cell, OpIndex(0), vec![]).and_then(move |a| {
                    mid_log.lock().push(format!("got {a}"));
                    let end_log = Arc::clone(&mid_log);
                    perform(cell, OpIndex(0), vec![]).and_then(move |b| {
                        end_log.lock().push(format!("got {b}"));
                        Comp::value(Value::Int(a.as_int().unwrap() + b.as_int().unwrap()))
                    })
                })
            }),
        )
        .unwrap();

        let entries = log.lock().clone();
        (result, entries)
    }

    let (fused_result, fused_log) = run(true);
    let (captured_result, captured_log) = run(false);
    assert_eq!(fused_result, captured_result);
    assert_eq!(fused_log, captured_log);
    assert_eq!(fused_result, Value::Int(3));
}

/// A continuation can be resumed under handler installations that did
/// not exist at capture time; the captured frames are re-established
/// below the resuming context.
#[test]
fn test_resume_from_a_different_dynamic_context() {
    let mut registry = EffectRegistry::new();
    let give = registry
        .declare_effect(EffectDecl::new("GiveInt").operation("ask", vec![], ValueShape::Int))
        .unwrap();
    let other = registry
        .declare_effect(EffectDecl::new("Other").operation("nop", vec![], ValueShape::Unit))
        .unwrap();
    let registry = Arc::new(registry);

    // The clause resumes from inside a freshly installed unrelated
    // handler; the captured frames are spliced below it.
    let reg = Arc::clone(&registry);
    let handler = Handler::builder(&registry)
        .on(give, "ask", move |_args, k| {
            let noise = Handler::builder(&reg)
                .on(other, "nop", |_args, k2| k2.resume(Value::Unit))
                .build()
                .unwrap();
            Comp::handle(noise, move || k.resume(5i64))
        })
        .build()
        .unwrap();

    let result = install_handler(
        &registry,
        handler,
        Box::new(move || ask(give).map(|v| Value::Int(v.as_int().unwrap() * 2))),
    )
    .unwrap();
    assert_eq!(result, Value::Int(10));
}

/// Frame state is observable through the machine API between
/// evaluations.
#[test]
fn test_machine_is_clean_between_evaluations() {
    let (registry, give) = give_int();
    let mut machine = Machine::new(Arc::clone(&registry));

    let handler = Handler::builder(&registry)
        .on(give, "ask", |_args, k| k.resume(1i64))
        .build()
        .unwrap();
    machine
        .install_handler(handler, Box::new(move || ask(give)))
        .unwrap();
    assert_eq!(machine.chain_depth(), 0);

    let handler = Handler::builder(&registry)
        .on(give, "ask", |_args, k| k.resume(2i64))
        .build()
        .unwrap();
    let result = machine
        .install_handler(handler, Box::new(move || ask(give)))
        .unwrap();
    assert_eq!(result, Value::Int(2));
}
