//! # Standard Effects Library
//!
//! Commonly used effects built on the core runtime, following the
//! patterns established by Koka and other effect-typed languages.
//!
//! | Effect | Operations | Tail-Resumptive |
//! |--------|------------|-----------------|
//! | State  | get, put   | Yes (declared tail-resumptive-only) |
//! | Fail   | throw      | No (never resumes) |
//! | Emit   | emit       | Yes (declared tail-resumptive-only) |
//!
//! `State` emulates mutable state, `Fail` is exception-style early exit,
//! and `Emit` is a writer, useful for mocked I/O and for observing side
//! effect ordering in tests.
//!
//! References:
//! - [Koka std/core/exn](https://koka-lang.github.io/koka/doc/std_core_exn.html)
//! - [Koka std/core types](https://koka-lang.github.io/koka/doc/std_core_types.html)

use std::sync::Arc;

use parking_lot::Mutex;

use crate::classify::ClauseShape;
use crate::comp::{perform, Comp, Thunk};
use crate::fault::{RegistryError, RuntimeFault};
use crate::frame::Handler;
use crate::registry::{EffectDecl, EffectId, EffectRegistry, OpIndex};
use crate::value::{Value, ValueShape};

// ============================================================================
// State
// ============================================================================

/// The `State` effect: mutable-state emulation via `get` and `put`.
///
/// Both operations are tail-resumptive, and the effect is declared
/// tail-resumptive-only, so dispatch through the ready-made handler is
/// fused into direct calls.
#[derive(Debug, Clone, Copy)]
pub struct State {
    effect: EffectId,
}

impl State {
    /// Operation index of `get`.
    pub const GET_OP: OpIndex = OpIndex(0);

    /// Operation index of `put`.
    pub const PUT_OP: OpIndex = OpIndex(1);

    /// Declare the `State` effect into `registry`.
    pub fn declare(registry: &mut EffectRegistry) -> Result<Self, RegistryError> {
        let effect = registry.declare_effect(
            EffectDecl::new("State")
                .operation("get", vec![], ValueShape::Any)
                .operation("put", vec![ValueShape::Any], ValueShape::Unit)
                .tail_resumptive_only(),
        )?;
        Ok(Self { effect })
    }

    /// The effect id.
    pub fn effect(&self) -> EffectId {
        self.effect
    }

    /// Read the current state.
    pub fn get(&self) -> Comp {
        perform(self.effect, Self::GET_OP, vec![])
    }

    /// Replace the current state.
    pub fn put(&self, value: impl Into<Value>) -> Comp {
        perform(self.effect, Self::PUT_OP, vec![value.into()])
    }

    /// A handler holding the state in a cell, starting from `initial`.
    pub fn handler(
        &self,
        registry: &EffectRegistry,
        initial: Value,
    ) -> Result<Handler, RuntimeFault> {
        let cell = Arc::new(Mutex::new(initial));
        let get_cell = Arc::clone(&cell);
        Handler::builder(registry)
            .on_shaped(self.effect, "get", ClauseShape::Resume, move |_args, k| {
                k.resume(get_cell.lock().clone())
            })
            .on_shaped(self.effect, "put", ClauseShape::Resume, move |mut args, k| {
                *cell.lock() = args.remove(0);
                k.resume(Value::Unit)
            })
            .build()
    }

    /// Run `body` with state starting at `initial`.
    pub fn scope(
        &self,
        registry: &EffectRegistry,
        initial: Value,
        body: Thunk,
    ) -> Result<Comp, RuntimeFault> {
        Ok(Comp::handle(self.handler(registry, initial)?, body))
    }
}

// ============================================================================
// Fail
// ============================================================================

/// The `Fail` effect: exception-style early exit via `throw`.
///
/// `throw` never resumes: the handler clause abandons the continuation,
/// so nothing between the throw site and the handler runs.
#[derive(Debug, Clone, Copy)]
pub struct Fail {
    effect: EffectId,
}

impl Fail {
    /// Operation index of `throw`.
    pub const THROW_OP: OpIndex = OpIndex(0);

    /// Declare the `Fail` effect into `registry`.
    pub fn declare(registry: &mut EffectRegistry) -> Result<Self, RegistryError> {
        let effect = registry.declare_effect(
            EffectDecl::new("Fail").operation("throw", vec![ValueShape::Any], ValueShape::Any),
        )?;
        Ok(Self { effect })
    }

    /// The effect id.
    pub fn effect(&self) -> EffectId {
        self.effect
    }

    /// Abort the current computation with `reason`.
    pub fn throw(&self, reason: impl Into<Value>) -> Comp {
        perform(self.effect, Self::THROW_OP, vec![reason.into()])
    }

    /// Run `body`, mapping a throw to `on_fail(reason)` instead of
    /// completing normally.
    pub fn catch(
        &self,
        registry: &EffectRegistry,
        body: Thunk,
        on_fail: impl Fn(Value) -> Comp + Send + Sync + 'static,
    ) -> Result<Comp, RuntimeFault> {
        let handler = Handler::builder(registry)
            .on_shaped(self.effect, "throw", ClauseShape::Value, move |mut args, _k| {
                on_fail(args.remove(0))
            })
            .build()?;
        Ok(Comp::handle(handler, body))
    }
}

// ============================================================================
// Emit
// ============================================================================

/// The `Emit` effect: a writer for one-way output.
///
/// Handlers decide where emitted values go; [`collect_into`] records them
/// in order, which doubles as a side-effect log for tests and as a mock
/// for real output.
///
/// [`collect_into`]: Emit::collect_into
#[derive(Debug, Clone, Copy)]
pub struct Emit {
    effect: EffectId,
}

impl Emit {
    /// Operation index of `emit`.
    pub const EMIT_OP: OpIndex = OpIndex(0);

    /// Declare the `Emit` effect into `registry`.
    pub fn declare(registry: &mut EffectRegistry) -> Result<Self, RegistryError> {
        let effect = registry.declare_effect(
            EffectDecl::new("Emit")
                .operation("emit", vec![ValueShape::Any], ValueShape::Unit)
                .tail_resumptive_only(),
        )?;
        Ok(Self { effect })
    }

    /// The effect id.
    pub fn effect(&self) -> EffectId {
        self.effect
    }

    /// Emit a value to the enclosing handler.
    pub fn emit(&self, value: impl Into<Value>) -> Comp {
        perform(self.effect, Self::EMIT_OP, vec![value.into()])
    }

    /// Run `body`, appending every emitted value to `sink` in order.
    pub fn collect_into(
        &self,
        registry: &EffectRegistry,
        sink: Arc<Mutex<Vec<Value>>>,
        body: Thunk,
    ) -> Result<Comp, RuntimeFault> {
        let handler = Handler::builder(registry)
            .on_shaped(self.effect, "emit", ClauseShape::Resume, move |mut args, k| {
                sink.lock().push(args.remove(0));
                k.resume(Value::Unit)
            })
            .build()?;
        Ok(Comp::handle(handler, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;

    #[test]
    fn test_state_get_put_roundtrip() {
        let mut registry = EffectRegistry::new();
        let state = State::declare(&mut registry).unwrap();

        let comp = state
            .scope(
                &registry,
                Value::Int(0),
                Box::new(move || {
                    state.get().and_then(move |v| {
                        state
                            .put(v.as_int().unwrap() + 1)
                            .and_then(move |_| state.get())
                    })
                }),
            )
            .unwrap();

        let result = Machine::new(Arc::new(registry)).eval(comp).unwrap();
        assert_eq!(result, Value::Int(1));
    }

    #[test]
    fn test_state_declared_tail_only() {
        let mut registry = EffectRegistry::new();
        let state = State::declare(&mut registry).unwrap();
        assert!(registry.effect(state.effect()).unwrap().tail_resumptive_only());
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let mut registry = EffectRegistry::new();
        State::declare(&mut registry).unwrap();
        assert!(matches!(
            State::declare(&mut registry),
            Err(RegistryError::DuplicateEffect { .. })
        ));
    }

    #[test]
    fn test_fail_catch_maps_throw() {
        let mut registry = EffectRegistry::new();
        let fail = Fail::declare(&mut registry).unwrap();

        let comp = fail
            .catch(
                &registry,
                Box::new(move || {
                    fail.throw("boom")
                        .and_then(|_| panic!("code after throw must not run"))
                }),
                |reason| Comp::value(reason),
            )
            .unwrap();

        let result = Machine::new(Arc::new(registry)).eval(comp).unwrap();
        assert_eq!(result, Value::str("boom"));
    }

    #[test]
    fn test_fail_catch_passes_through_normal_completion() {
        let mut registry = EffectRegistry::new();
        let fail = Fail::declare(&mut registry).unwrap();

        let comp = fail
            .catch(
                &registry,
                Box::new(|| Comp::value(5i64)),
                |_reason| Comp::value(-1i64),
            )
            .unwrap();

        let result = Machine::new(Arc::new(registry)).eval(comp).unwrap();
        assert_eq!(result, Value::Int(5));
    }

    #[test]
    fn test_emit_collects_in_order() {
        let mut registry = EffectRegistry::new();
        let emit = Emit::declare(&mut registry).unwrap();
        let sink = Arc::new(Mutex::new(Vec::new()));

        let comp = emit
            .collect_into(
                &registry,
                Arc::clone(&sink),
                Box::new(move || {
                    emit.emit(1i64)
                        .and_then(move |_| emit.emit(2i64))
                        .and_then(|_| Comp::value(3i64))
                }),
            )
            .unwrap();

        let result = Machine::new(Arc::new(registry)).eval(comp).unwrap();
        assert_eq!(result, Value::Int(3));
        assert_eq!(*sink.lock(), vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_effects_compose() {
        let mut registry = EffectRegistry::new();
        let state = State::declare(&mut registry).unwrap();
        let fail = Fail::declare(&mut registry).unwrap();

        // put(7) then throw: the catch sees the reason, and the state
        // handler's frame unwinds without completing normally.
        let inner = state
            .scope(
                &registry,
                Value::Int(0),
                Box::new(move || {
                    state
                        .put(7i64)
                        .and_then(move |_| fail.throw("stop"))
                        .and_then(|_| panic!("unreachable"))
                }),
            )
            .unwrap();
        let comp = fail
            .catch(&registry, Box::new(move || inner), |reason| {
                Comp::value(reason)
            })
            .unwrap();

        let result = Machine::new(Arc::new(registry)).eval(comp).unwrap();
        assert_eq!(result, Value::str("stop"));
    }
}
