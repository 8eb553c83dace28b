//! # One-Shot Continuations
//!
//! The captured "rest of the computation" between a perform site and the
//! handler frame that processes it.
//!
//! ## Design
//!
//! A continuation owns the machine segments that were moved off the
//! segment stack at capture time, behind a consume-on-take slot. Resuming
//! takes the slot; a second resume finds it empty and faults with
//! `ContinuationReused` rather than re-running downstream code with stale
//! state. Dropping a continuation without resuming releases the captured
//! segments (and every frame and pending closure inside them)
//! immediately and deterministically.
//!
//! Continuations are **one-shot**: each can be resumed at most once.
//! One-shot is much cheaper than multi-shot (which requires copying
//! captured state) and is the deliberate, ownership-motivated design
//! here; see [Retrofitting Effect Handlers onto
//! OCaml](https://dl.acm.org/doi/10.1145/3453483.3454039) (PLDI'21) for
//! the same trade-off.
//!
//! `Continuation` is `Send`, so cross-thread resumption can be layered on
//! top by transferring ownership through a channel; the single-resume
//! rule still applies.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::comp::{Comp, CompKind};
use crate::frame::FrameId;
use crate::machine::Segment;
use crate::value::Value;

/// Unique identifier for a continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContinuationId(u64);

impl ContinuationId {
    /// Get the raw id value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContinuationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k#{}", self.0)
    }
}

/// Global continuation id counter.
static NEXT_CONTINUATION_ID: AtomicU64 = AtomicU64::new(1);

fn next_continuation_id() -> ContinuationId {
    ContinuationId(NEXT_CONTINUATION_ID.fetch_add(1, Ordering::Relaxed))
}

/// The consumable payload of a continuation.
pub(crate) enum ContState {
    /// Captured segments, ready to be spliced back onto a machine stack.
    Captured {
        /// The segments between the perform site and the handler frame,
        /// bottom (handler side) first.
        segments: Vec<Segment>,
        /// Whether the bottom segment is the handler's own frame, to be
        /// re-installed in the `Running` state (deep handlers).
        resumes_frame: bool,
        /// Whether resuming must be the clause's final action
        /// (tail-resumptive-only effect handled on the capture path).
        enforce_tail: bool,
        /// Stack height right after capture; with `enforce_tail`, the
        /// resume must happen at exactly this height.
        base_height: usize,
    },
    /// Fused tail dispatch: nothing was captured, the perform site is
    /// still on the machine stack behind a guard for this frame.
    Direct {
        /// The frame whose guard must be on top of the stack at resume.
        frame: FrameId,
    },
    /// Already resumed (or abandoned by a settled fused clause).
    Consumed,
}

pub(crate) struct ContCore {
    pub(crate) id: ContinuationId,
    pub(crate) effect: String,
    pub(crate) operation: String,
    pub(crate) state: Mutex<ContState>,
    pub(crate) captured_frames: usize,
}

/// A single-use capability to resume a suspended computation.
///
/// Owned by the handler clause that received it. [`resume`] builds the
/// resuming computation; executing that computation consumes the
/// capability. Dropping the continuation without resuming is valid and
/// means "never resume": nothing after the perform site runs.
///
/// [`resume`]: Continuation::resume
pub struct Continuation {
    core: Arc<ContCore>,
}

impl Continuation {
    pub(crate) fn captured(
        segments: Vec<Segment>,
        resumes_frame: bool,
        enforce_tail: bool,
        base_height: usize,
        effect: &str,
        operation: &str,
    ) -> Self {
        let captured_frames = segments
            .iter()
            .filter(|seg| matches!(seg, Segment::Prompt(_)))
            .count();
        Continuation {
            core: Arc::new(ContCore {
                id: next_continuation_id(),
                effect: effect.to_string(),
                operation: operation.to_string(),
                state: Mutex::new(ContState::Captured {
                    segments,
                    resumes_frame,
                    enforce_tail,
                    base_height,
                }),
                captured_frames,
            }),
        }
    }

    pub(crate) fn direct(frame: FrameId, effect: &str, operation: &str) -> Self {
        Continuation {
            core: Arc::new(ContCore {
                id: next_continuation_id(),
                effect: effect.to_string(),
                operation: operation.to_string(),
                state: Mutex::new(ContState::Direct { frame }),
                captured_frames: 0,
            }),
        }
    }

    pub(crate) fn core_arc(&self) -> Arc<ContCore> {
        Arc::clone(&self.core)
    }

    /// The continuation's id.
    pub fn id(&self) -> ContinuationId {
        self.core.id
    }

    /// The operation whose perform site this continuation resumes, as
    /// `effect.operation`.
    pub fn origin(&self) -> String {
        format!("{}.{}", self.core.effect, self.core.operation)
    }

    /// Whether this continuation has already been consumed.
    pub fn is_consumed(&self) -> bool {
        matches!(*self.core.state.lock(), ContState::Consumed)
    }

    /// Number of handler frames captured inside this continuation.
    pub fn captured_frames(&self) -> usize {
        self.core.captured_frames
    }

    /// Build the computation that resumes at the perform site with
    /// `value`.
    ///
    /// Executing the built computation consumes the continuation; a
    /// second execution faults with `ContinuationReused`.
    pub fn resume(&self, value: impl Into<Value>) -> Comp {
        Comp {
            kind: CompKind::Resume {
                core: Arc::clone(&self.core),
                value: value.into(),
            },
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("id", &self.core.id)
            .field("origin", &self.origin())
            .field("consumed", &self.is_consumed())
            .field("captured_frames", &self.core.captured_frames)
            .finish()
    }
}
