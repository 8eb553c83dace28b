//! # Handler Frames
//!
//! Handler definitions and the frames that install them.
//!
//! A [`Handler`] maps operations to response clauses and optionally
//! transforms the scrutinee's final value with a return clause. Handlers
//! come in two kinds:
//!
//! - **Deep**: resuming the continuation re-installs the frame, so every
//!   later perform of the same effect is handled by the same clauses and
//!   the return clause fires when the scrutinee eventually completes.
//! - **Shallow**: the frame is consumed by its first dispatch; after a
//!   resume, further performs are seen by the next-outer handler unless
//!   the clause explicitly re-installs.
//!
//! A [`FrameRef`] is one live installation: a fresh identity, the shared
//! handler definition, and the frame's lifecycle state
//! (`Running → Dispatching → Settled → Done`).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::classify::{classify_clause, ClauseShape, ResumeMode};
use crate::comp::Comp;
use crate::continuation::Continuation;
use crate::fault::{RegistryError, RuntimeFault};
use crate::registry::{EffectId, EffectRegistry, OpIndex};
use crate::value::Value;

/// Unique identifier for a live handler frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u64);

impl FrameId {
    /// The null frame id, used in diagnostics for "no frame".
    pub const NONE: FrameId = FrameId(0);

    /// Get the raw id value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            write!(f, "frame#none")
        } else {
            write!(f, "frame#{}", self.0)
        }
    }
}

/// Global frame id counter. Zero is reserved for [`FrameId::NONE`].
static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

fn next_frame_id() -> FrameId {
    FrameId(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed))
}

/// Lifecycle state of a single handler installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FrameState {
    /// The scrutinee is executing under this frame.
    #[default]
    Running = 0,
    /// A clause of this frame is executing with a live continuation.
    /// While dispatching, the frame is excluded from handler search.
    Dispatching = 1,
    /// The scrutinee completed; the return clause is being applied.
    Settled = 2,
    /// The frame is released.
    Done = 3,
}

impl FrameState {
    fn from_u8(raw: u8) -> FrameState {
        match raw {
            0 => FrameState::Running,
            1 => FrameState::Dispatching,
            2 => FrameState::Settled,
            _ => FrameState::Done,
        }
    }
}

/// The kind of effect handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerKind {
    /// Deep handler: persists across resumes.
    #[default]
    Deep,
    /// Shallow handler: consumed on first dispatch.
    Shallow,
}

/// An operation clause: the response body plus its resume discipline.
pub(crate) type OpClauseFn = dyn Fn(Vec<Value>, Continuation) -> Comp + Send + Sync;

/// A return clause, applied to the scrutinee's final value.
pub(crate) type ReturnClauseFn = dyn Fn(Value) -> Comp + Send + Sync;

#[derive(Clone)]
pub(crate) struct OpClause {
    pub(crate) run: Arc<OpClauseFn>,
    pub(crate) mode: ResumeMode,
}

/// A handler definition: clauses keyed by operation, an optional return
/// clause, and the handler kind.
pub struct Handler {
    kind: HandlerKind,
    clauses: HashMap<(EffectId, OpIndex), OpClause>,
    return_clause: Option<Arc<ReturnClauseFn>>,
    effects: Vec<EffectId>,
}

impl Handler {
    /// Start building a handler validated against `registry`.
    pub fn builder(registry: &EffectRegistry) -> HandlerBuilder<'_> {
        HandlerBuilder {
            registry,
            kind: HandlerKind::default(),
            clauses: Vec::new(),
            return_clause: None,
        }
    }

    /// The handler kind.
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    /// The set of effects this handler has clauses for, in first-use order.
    pub fn effect_set(&self) -> &[EffectId] {
        &self.effects
    }

    /// Whether this handler has a clause for the given operation.
    pub fn handles(&self, effect: EffectId, op: OpIndex) -> bool {
        self.clauses.contains_key(&(effect, op))
    }

    /// Whether this handler has a return clause.
    pub fn has_return_clause(&self) -> bool {
        self.return_clause.is_some()
    }

    pub(crate) fn clause(&self, effect: EffectId, op: OpIndex) -> Option<&OpClause> {
        self.clauses.get(&(effect, op))
    }

    /// Apply the return clause to a completed scrutinee value.
    /// Defaults to passing the value through unchanged.
    pub(crate) fn apply_return(&self, value: Value) -> Comp {
        match &self.return_clause {
            Some(clause) => clause(value),
            None => Comp::value(value),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("kind", &self.kind)
            .field("clauses", &self.clauses.len())
            .field("return_clause", &self.return_clause.is_some())
            .finish()
    }
}

struct PendingClause {
    effect: EffectId,
    op_name: String,
    shape: Option<ClauseShape>,
    run: Arc<OpClauseFn>,
}

/// Builder for [`Handler`].
///
/// Clauses are recorded eagerly and validated in [`build`]: operation
/// names are resolved against the registry, duplicates are rejected, and
/// clauses for tail-resumptive-only effects with a declared shape that
/// classifies as non-tail are rejected before execution.
///
/// [`build`]: HandlerBuilder::build
pub struct HandlerBuilder<'r> {
    registry: &'r EffectRegistry,
    kind: HandlerKind,
    clauses: Vec<PendingClause>,
    return_clause: Option<Arc<ReturnClauseFn>>,
}

impl HandlerBuilder<'_> {
    /// Set the handler kind.
    pub fn kind(mut self, kind: HandlerKind) -> Self {
        self.kind = kind;
        self
    }

    /// Make this a shallow handler.
    pub fn shallow(self) -> Self {
        self.kind(HandlerKind::Shallow)
    }

    /// Add a clause for `effect.op_name` with no declared control shape.
    ///
    /// The clause is treated as [`ResumeMode::General`] and always pays
    /// full continuation capture.
    pub fn on(
        self,
        effect: EffectId,
        op_name: impl Into<String>,
        clause: impl Fn(Vec<Value>, Continuation) -> Comp + Send + Sync + 'static,
    ) -> Self {
        self.push_clause(effect, op_name.into(), None, Arc::new(clause))
    }

    /// Add a clause with a declared control shape, enabling
    /// tail-resumption classification and fused dispatch.
    pub fn on_shaped(
        self,
        effect: EffectId,
        op_name: impl Into<String>,
        shape: ClauseShape,
        clause: impl Fn(Vec<Value>, Continuation) -> Comp + Send + Sync + 'static,
    ) -> Self {
        self.push_clause(effect, op_name.into(), Some(shape), Arc::new(clause))
    }

    fn push_clause(
        mut self,
        effect: EffectId,
        op_name: String,
        shape: Option<ClauseShape>,
        run: Arc<OpClauseFn>,
    ) -> Self {
        self.clauses.push(PendingClause {
            effect,
            op_name,
            shape,
            run,
        });
        self
    }

    /// Set the return clause, applied to the scrutinee's completed value.
    pub fn on_return(
        mut self,
        clause: impl Fn(Value) -> Comp + Send + Sync + 'static,
    ) -> Self {
        self.return_clause = Some(Arc::new(clause));
        self
    }

    /// Resolve and validate the recorded clauses into a [`Handler`].
    pub fn build(self) -> Result<Handler, RuntimeFault> {
        let mut clauses = HashMap::new();
        let mut effects: Vec<EffectId> = Vec::new();

        for pending in self.clauses {
            let kind = self.registry.effect(pending.effect)?;
            let (op, _sig) = kind
                .operation_named(&pending.op_name)
                .ok_or_else(|| RegistryError::UnknownOperation {
                    effect: kind.name().to_string(),
                    operation: pending.op_name.clone(),
                })?;

            let mode = match &pending.shape {
                Some(shape) => classify_clause(shape),
                None => ResumeMode::General,
            };

            // Static half of the tail-resumptive-only check: a declared
            // shape that classifies as general is rejected here; unshaped
            // clauses are enforced at their first dispatch instead.
            if kind.tail_resumptive_only() && mode == ResumeMode::General && pending.shape.is_some()
            {
                return Err(RuntimeFault::TailResumptionViolation {
                    effect: kind.name().to_string(),
                    operation: pending.op_name,
                });
            }

            if clauses
                .insert((pending.effect, op), OpClause { run: pending.run, mode })
                .is_some()
            {
                return Err(RegistryError::DuplicateClause {
                    effect: kind.name().to_string(),
                    operation: pending.op_name,
                }
                .into());
            }
            if !effects.contains(&pending.effect) {
                effects.push(pending.effect);
            }
        }

        Ok(Handler {
            kind: self.kind,
            clauses,
            return_clause: self.return_clause,
            effects,
        })
    }
}

struct FrameCore {
    id: FrameId,
    handler: Arc<Handler>,
    state: AtomicU8,
}

/// One live handler installation.
///
/// Cloning a `FrameRef` shares the installation: the segment stack entry
/// and the handler chain node refer to the same frame and observe the
/// same lifecycle state.
#[derive(Clone)]
pub struct FrameRef(Arc<FrameCore>);

impl FrameRef {
    /// Install a handler as a fresh frame in the `Running` state.
    pub(crate) fn new(handler: Arc<Handler>) -> Self {
        FrameRef(Arc::new(FrameCore {
            id: next_frame_id(),
            handler,
            state: AtomicU8::new(FrameState::Running as u8),
        }))
    }

    /// The frame's identity.
    pub fn id(&self) -> FrameId {
        self.0.id
    }

    /// The installed handler definition.
    pub fn handler(&self) -> &Arc<Handler> {
        &self.0.handler
    }

    /// The frame's current lifecycle state.
    pub fn state(&self) -> FrameState {
        FrameState::from_u8(self.0.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_state(&self, state: FrameState) {
        self.0.state.store(state as u8, Ordering::Relaxed);
    }
}

impl fmt::Debug for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRef")
            .field("id", &self.0.id)
            .field("state", &self.state())
            .field("kind", &self.0.handler.kind())
            .finish()
    }
}
