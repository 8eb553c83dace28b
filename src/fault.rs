//! # Fault Taxonomy
//!
//! Error types for the effect runtime.
//!
//! Two layers:
//!
//! - [`RegistryError`]: declaration-time and handler-building errors.
//!   These are ordinary recoverable errors for the embedding evaluator.
//! - [`RuntimeFault`]: failures during evaluation. `UnhandledEffect` and
//!   `TailResumptionViolation` should have been ruled out by the upstream
//!   effect checker; the runtime enforces their absence rather than
//!   recovering from them. `ContinuationReused` and `FrameMismatch` are
//!   defects, reported with full context and never silently papered over.
//!
//! A fault aborts the current top-level evaluation; the machine drops all
//! pending segments and frames before returning it.

use thiserror::Error;

use crate::continuation::ContinuationId;
use crate::frame::FrameId;
use crate::registry::EffectId;
use crate::value::ValueShape;

/// Errors from effect declaration and handler construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// An effect with this name is already declared in the registry.
    #[error("effect `{name}` is already declared")]
    DuplicateEffect {
        /// The colliding effect name.
        name: String,
    },

    /// No effect with this id exists in the registry.
    #[error("no effect with id {id}")]
    UnknownEffect {
        /// The unknown effect id.
        id: EffectId,
    },

    /// The effect exists but has no such operation.
    #[error("effect `{effect}` has no operation `{operation}`")]
    UnknownOperation {
        /// The effect name.
        effect: String,
        /// The operation that was looked up.
        operation: String,
    },

    /// A handler already has a clause for this operation.
    #[error("handler already has a clause for `{effect}.{operation}`")]
    DuplicateClause {
        /// The effect name.
        effect: String,
        /// The operation name.
        operation: String,
    },
}

/// Failures during evaluation.
#[derive(Debug, PartialEq, Error)]
pub enum RuntimeFault {
    /// An operation was performed with no matching handler frame in scope.
    #[error("unhandled effect `{effect}.{operation}` ({depth} frame(s) in scope)")]
    UnhandledEffect {
        /// The effect name.
        effect: String,
        /// The operation name.
        operation: String,
        /// Handler chain depth at the perform site.
        depth: usize,
    },

    /// A consumed continuation was resumed a second time.
    #[error("continuation {id} resumed more than once")]
    ContinuationReused {
        /// The continuation that was reused.
        id: ContinuationId,
    },

    /// A handler used its continuation non-tail for an effect that
    /// requires tail resumption.
    #[error("non-tail resume in handler clause for tail-resumptive-only `{effect}.{operation}`")]
    TailResumptionViolation {
        /// The effect name.
        effect: String,
        /// The operation name.
        operation: String,
    },

    /// Frame bookkeeping between the segment stack and the handler chain
    /// disagreed. Indicates a runtime bug, not a user error.
    #[error("handler frame mismatch: expected {expected}, found {found}")]
    FrameMismatch {
        /// The frame the runtime expected to see.
        expected: FrameId,
        /// The frame actually found (`FrameId::NONE` if none).
        found: FrameId,
    },

    /// An operation was performed with the wrong number of arguments.
    #[error("operation `{effect}.{operation}` takes {expected} argument(s), got {got}")]
    ArityMismatch {
        /// The effect name.
        effect: String,
        /// The operation name.
        operation: String,
        /// Declared parameter count.
        expected: usize,
        /// Actual argument count.
        got: usize,
    },

    /// An operation argument did not match its declared shape.
    #[error("operation `{effect}.{operation}` argument {index} has shape {got}, expected {expected}")]
    ShapeMismatch {
        /// The effect name.
        effect: String,
        /// The operation name.
        operation: String,
        /// Zero-based argument index.
        index: usize,
        /// Declared shape.
        expected: ValueShape,
        /// Actual shape.
        got: ValueShape,
    },

    /// The segment stack grew past the configured limit.
    #[error("segment stack exceeded the configured limit of {limit}")]
    StackExhausted {
        /// The configured limit.
        limit: usize,
    },

    /// A registry error surfaced during evaluation or handler building.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
