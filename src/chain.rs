//! # Handler Chain
//!
//! The dynamically-scoped chain of active handler frames.
//!
//! ## Design
//!
//! The chain is a persistent, immutable linked list of frame references,
//! not a mutable array. Pushing and popping build and drop list nodes;
//! cloning the chain is an `Arc` copy. This matters because continuations
//! can be resumed from a dynamic context other than the one where they
//! were captured: every captured continuation must carry a correct view
//! of the frames it restores, and a shared mutable stack would let one
//! resumption corrupt another's view.
//!
//! Handler search ([`find_handler`]) walks outward from the innermost
//! frame and skips frames whose clause is currently executing
//! ([`FrameState::Dispatching`]), so an operation performed inside a
//! clause, for the same effect, is seen by the next-outer handler.
//!
//! [`find_handler`]: HandlerChain::find_handler

use std::sync::Arc;

use crate::fault::RuntimeFault;
use crate::frame::{FrameId, FrameRef, FrameState};
use crate::registry::{EffectId, OpIndex};

struct ChainNode {
    frame: FrameRef,
    parent: Option<Arc<ChainNode>>,
}

/// A persistent chain of active handler frames, innermost first.
///
/// `Clone` is a cheap snapshot: the clone and the original share nodes
/// but diverge independently under further pushes and pops.
#[derive(Clone, Default)]
pub struct HandlerChain {
    head: Option<Arc<ChainNode>>,
    len: usize,
}

impl HandlerChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active frames.
    pub fn depth(&self) -> usize {
        self.len
    }

    /// Whether no frames are installed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The innermost frame's id, or [`FrameId::NONE`] if empty.
    pub fn head_id(&self) -> FrameId {
        self.head
            .as_ref()
            .map(|node| node.frame.id())
            .unwrap_or(FrameId::NONE)
    }

    /// Install a frame as the new innermost entry.
    pub fn push_frame(&mut self, frame: FrameRef) {
        self.head = Some(Arc::new(ChainNode {
            frame,
            parent: self.head.take(),
        }));
        self.len += 1;
    }

    /// Remove the innermost frame, which must be `expected`.
    ///
    /// Fails with [`RuntimeFault::FrameMismatch`] if the innermost frame
    /// is a different one, or if the chain is empty. Frames pop in LIFO
    /// order relative to their own nesting; a mismatch here means the
    /// runtime's bookkeeping broke, not that user input was malformed.
    pub fn pop_frame(&mut self, expected: FrameId) -> Result<FrameRef, RuntimeFault> {
        match self.head.take() {
            None => Err(RuntimeFault::FrameMismatch {
                expected,
                found: FrameId::NONE,
            }),
            Some(node) => {
                if node.frame.id() != expected {
                    let found = node.frame.id();
                    self.head = Some(node);
                    return Err(RuntimeFault::FrameMismatch { expected, found });
                }
                let frame = node.frame.clone();
                self.head = node.parent.clone();
                self.len -= 1;
                Ok(frame)
            }
        }
    }

    /// Drop all frames. Used when aborting an evaluation.
    pub fn clear(&mut self) {
        self.head = None;
        self.len = 0;
    }

    /// Find the nearest frame with a clause for `effect.op`.
    ///
    /// Walks outward from the innermost frame, or from just below the
    /// frame named by `starting_below`. Frames currently dispatching a
    /// clause are excluded from the search. Returns the matching frame
    /// and the number of frames walked to reach it.
    pub fn find_handler(
        &self,
        effect: EffectId,
        op: OpIndex,
        starting_below: Option<FrameId>,
    ) -> Option<(FrameRef, usize)> {
        let mut skipping = starting_below;
        let mut walked = 0;
        for frame in self.frames() {
            if let Some(boundary) = skipping {
                if frame.id() == boundary {
                    skipping = None;
                }
                continue;
            }
            walked += 1;
            if frame.state() == FrameState::Dispatching {
                continue;
            }
            if frame.handler().handles(effect, op) {
                return Some((frame.clone(), walked));
            }
        }
        None
    }

    /// Iterate over frames, innermost first.
    pub fn frames(&self) -> Frames<'_> {
        Frames {
            node: self.head.as_ref(),
        }
    }
}

impl std::fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.frames()).finish()
    }
}

/// Iterator over chain frames, innermost first.
pub struct Frames<'a> {
    node: Option<&'a Arc<ChainNode>>,
}

impl<'a> Iterator for Frames<'a> {
    type Item = &'a FrameRef;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.node?;
        self.node = node.parent.as_ref();
        Some(&node.frame)
    }
}
