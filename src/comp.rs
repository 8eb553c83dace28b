//! # Computation Representation
//!
//! The explicit form of "a computation that may perform effects".
//!
//! The runtime cannot suspend the host call stack, so computations are
//! reified values executed by the machine's trampoline: return a value,
//! perform an operation, install a handler around a sub-computation, or
//! sequence one computation into the next. On the happy path a performed
//! operation behaves exactly like an ordinary call that returned the
//! resume value; the suspension is invisible to the computation itself.
//!
//! The upstream evaluator lowers its effect-annotated program into this
//! form. Sugar (expression-level handler application, block-scoped
//! installation) desugars upstream into [`perform`] and [`Comp::handle`].

use std::fmt;
use std::sync::Arc;

use crate::continuation::ContCore;
use crate::frame::Handler;
use crate::registry::{EffectId, OpIndex};
use crate::value::Value;

/// A deferred, zero-argument computation: the scrutinee form taken by
/// handler installation.
pub type Thunk = Box<dyn FnOnce() -> Comp + Send>;

/// A suspended-able computation producing a [`Value`].
pub struct Comp {
    pub(crate) kind: CompKind,
}

pub(crate) enum CompKind {
    /// Finished with a value.
    Return(Value),
    /// Perform an operation and suspend until a handler resumes.
    Perform {
        effect: EffectId,
        op: OpIndex,
        args: Vec<Value>,
    },
    /// Install a handler around a scrutinee computation.
    Handle { handler: Arc<Handler>, body: Thunk },
    /// Run `first`, then feed its value to `rest`.
    Then {
        first: Box<Comp>,
        rest: Box<dyn FnOnce(Value) -> Comp + Send>,
    },
    /// Resume a captured continuation with a value. Built only by
    /// [`Continuation::resume`](crate::Continuation::resume).
    Resume { core: Arc<ContCore>, value: Value },
}

impl Comp {
    /// A computation that immediately produces `value`.
    pub fn value(value: impl Into<Value>) -> Comp {
        Comp {
            kind: CompKind::Return(value.into()),
        }
    }

    /// Install `handler` around `body` for the dynamic extent of its
    /// evaluation.
    pub fn handle(handler: Handler, body: impl FnOnce() -> Comp + Send + 'static) -> Comp {
        Comp {
            kind: CompKind::Handle {
                handler: Arc::new(handler),
                body: Box::new(body),
            },
        }
    }

    /// Sequence: run `self`, then feed its value to `rest`.
    pub fn and_then(self, rest: impl FnOnce(Value) -> Comp + Send + 'static) -> Comp {
        Comp {
            kind: CompKind::Then {
                first: Box::new(self),
                rest: Box::new(rest),
            },
        }
    }

    /// Map the final value of `self`.
    pub fn map(self, f: impl FnOnce(Value) -> Value + Send + 'static) -> Comp {
        self.and_then(move |value| Comp::value(f(value)))
    }
}

/// Perform `effect.op` with `args`.
///
/// When executed, control transfers to the nearest enclosing handler
/// frame with a clause for the operation; the performed computation's
/// value is whatever that clause resumes with. With no matching frame in
/// scope, evaluation faults with `UnhandledEffect`.
pub fn perform(effect: EffectId, op: OpIndex, args: Vec<Value>) -> Comp {
    Comp {
        kind: CompKind::Perform { effect, op, args },
    }
}

impl fmt::Debug for Comp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CompKind::Return(value) => f.debug_tuple("Return").field(value).finish(),
            CompKind::Perform { effect, op, args } => f
                .debug_struct("Perform")
                .field("effect", effect)
                .field("op", op)
                .field("args", args)
                .finish(),
            CompKind::Handle { handler, .. } => {
                f.debug_struct("Handle").field("handler", handler).finish()
            }
            CompKind::Then { first, .. } => f.debug_tuple("Then").field(first).finish(),
            CompKind::Resume { core, value } => f
                .debug_struct("Resume")
                .field("continuation", &core.id)
                .field("value", value)
                .finish(),
        }
    }
}
