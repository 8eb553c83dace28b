//! # Dispatcher
//!
//! The trampoline that evaluates computations under a dynamic chain of
//! handler frames.
//!
//! ## Design
//!
//! The machine holds two structures that move in lockstep:
//!
//! - a **segment stack**: pending work, as a vector of segments — either
//!   the rest of a sequencing step (`Cont`), a handler installation
//!   delimiting the computation below it (`Prompt`), or a guard marking
//!   an in-flight fused tail dispatch (`TailGuard`);
//! - the **handler chain**: the persistent frame chain searched on every
//!   perform (see [`crate::chain`]).
//!
//! Performing an operation finds the nearest matching frame and **moves**
//! every segment between the perform site and that frame (inclusive for
//! deep handlers) off the stack into a fresh continuation. The clause
//! then runs in the context *outside* the frame: an operation it performs
//! is seen by the next-outer handler. Resuming splices the captured
//! segments back and continues at the perform site; dropping the
//! continuation instead discards them, so nothing after the perform site
//! ever runs.
//!
//! ## Fused tail dispatch
//!
//! When the matched clause is classified tail-resumptive and the frame is
//! the innermost one, nothing is captured: a guard segment is pushed and
//! the clause runs in place, its final resume simply continuing at the
//! perform site. Observably this is identical to a direct call. A resume
//! that is not the clause's final action finds pending work above the
//! guard and faults; a clause that settles without resuming unwinds the
//! guarded frame like any other abandoned continuation.

use std::mem;
use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::chain::HandlerChain;
use crate::classify::ResumeMode;
use crate::comp::{Comp, CompKind, Thunk};
use crate::config::MachineConfig;
use crate::continuation::{ContCore, ContState, Continuation};
use crate::fault::{RegistryError, RuntimeFault};
use crate::frame::{FrameId, FrameRef, FrameState, Handler, HandlerKind};
use crate::registry::{EffectId, EffectRegistry, OpIndex, OperationSig};
use crate::value::Value;

/// One entry of the machine's segment stack.
pub(crate) enum Segment {
    /// The rest of a sequencing step, awaiting the previous value.
    Cont(Box<dyn FnOnce(Value) -> Comp + Send>),
    /// An installed handler frame delimiting the segments above it.
    Prompt(FrameRef),
    /// An in-flight fused tail dispatch for `frame`. The clause is
    /// executing above this guard with no captured continuation.
    TailGuard {
        frame: FrameRef,
        core: Arc<ContCore>,
    },
}

/// Transient record of an operation being dispatched.
///
/// Exists only between the perform and the invocation of the matching
/// clause; carries the resolved names for fault context.
struct PendingOperation {
    effect: String,
    operation: String,
    args: Vec<Value>,
}

impl PendingOperation {
    fn check_args(&self, sig: &OperationSig) -> Result<(), RuntimeFault> {
        if self.args.len() != sig.params.len() {
            return Err(RuntimeFault::ArityMismatch {
                effect: self.effect.clone(),
                operation: self.operation.clone(),
                expected: sig.params.len(),
                got: self.args.len(),
            });
        }
        for (index, (arg, shape)) in self.args.iter().zip(&sig.params).enumerate() {
            if !arg.matches(*shape) {
                return Err(RuntimeFault::ShapeMismatch {
                    effect: self.effect.clone(),
                    operation: self.operation.clone(),
                    index,
                    expected: *shape,
                    got: arg.shape(),
                });
            }
        }
        Ok(())
    }
}

/// The effect machine: evaluates computations against a registry.
///
/// Single-threaded and cooperative: suspension happens only at perform
/// sites. A machine is reusable across evaluations; a fault drops all
/// pending segments and frames before it is returned.
pub struct Machine {
    registry: Arc<EffectRegistry>,
    config: MachineConfig,
    stack: Vec<Segment>,
    chain: HandlerChain,
}

impl Machine {
    /// Create a machine with the default configuration.
    pub fn new(registry: Arc<EffectRegistry>) -> Self {
        Self::with_config(registry, MachineConfig::default())
    }

    /// Create a machine with an explicit configuration.
    pub fn with_config(registry: Arc<EffectRegistry>, config: MachineConfig) -> Self {
        Machine {
            registry,
            config,
            stack: Vec::new(),
            chain: HandlerChain::new(),
        }
    }

    /// The registry this machine evaluates against.
    pub fn registry(&self) -> &Arc<EffectRegistry> {
        &self.registry
    }

    /// Current handler chain depth. Zero outside of evaluation.
    pub fn chain_depth(&self) -> usize {
        self.chain.depth()
    }

    /// Install `handler` around `scrutinee` and evaluate to completion.
    pub fn install_handler(
        &mut self,
        handler: Handler,
        scrutinee: Thunk,
    ) -> Result<Value, RuntimeFault> {
        self.eval(Comp::handle(handler, scrutinee))
    }

    /// Evaluate a computation to completion.
    ///
    /// An operation performed with no enclosing handler faults with
    /// `UnhandledEffect`.
    pub fn eval(&mut self, comp: Comp) -> Result<Value, RuntimeFault> {
        debug_assert!(self.stack.is_empty() && self.chain.is_empty());
        let result = self.run(comp);
        if let Err(fault) = &result {
            error!(%fault, depth = self.chain.depth(), "evaluation aborted");
            self.stack.clear();
            self.chain.clear();
        }
        result
    }

    fn run(&mut self, mut comp: Comp) -> Result<Value, RuntimeFault> {
        loop {
            if self.stack.len() >= self.config.max_segments {
                return Err(RuntimeFault::StackExhausted {
                    limit: self.config.max_segments,
                });
            }
            comp = match comp.kind {
                CompKind::Return(value) => match self.stack.pop() {
                    None => {
                        if !self.chain.is_empty() {
                            return Err(RuntimeFault::FrameMismatch {
                                expected: FrameId::NONE,
                                found: self.chain.head_id(),
                            });
                        }
                        return Ok(value);
                    }
                    Some(Segment::Cont(rest)) => rest(value),
                    Some(Segment::Prompt(frame)) => {
                        // Scrutinee completed normally: fire the return
                        // clause exactly once and release the frame.
                        self.chain.pop_frame(frame.id())?;
                        frame.set_state(FrameState::Settled);
                        trace!(frame = %frame.id(), "scrutinee settled, applying return clause");
                        let next = frame.handler().apply_return(value);
                        frame.set_state(FrameState::Done);
                        next
                    }
                    Some(Segment::TailGuard { frame, core }) => {
                        // The fused clause settled without resuming: the
                        // clause value becomes the frame's result and the
                        // delimited computation is abandoned.
                        *core.state.lock() = ContState::Consumed;
                        trace!(frame = %frame.id(), "fused clause settled without resume");
                        self.unwind_through(frame.id())?;
                        Comp::value(value)
                    }
                },
                CompKind::Then { first, rest } => {
                    self.stack.push(Segment::Cont(rest));
                    *first
                }
                CompKind::Handle { handler, body } => {
                    let frame = FrameRef::new(handler);
                    trace!(frame = %frame.id(), depth = self.chain.depth(), "installing handler");
                    self.chain.push_frame(frame.clone());
                    self.stack.push(Segment::Prompt(frame));
                    body()
                }
                CompKind::Perform { effect, op, args } => {
                    let kind = Arc::clone(self.registry.effect(effect)?);
                    let sig = kind.operation(op).ok_or_else(|| {
                        RegistryError::UnknownOperation {
                            effect: kind.name().to_string(),
                            operation: format!("#{op}"),
                        }
                    })?;
                    let pending = PendingOperation {
                        effect: kind.name().to_string(),
                        operation: sig.name.clone(),
                        args,
                    };
                    pending.check_args(sig)?;
                    self.dispatch(pending, effect, op, kind.tail_resumptive_only())?
                }
                CompKind::Resume { core, value } => self.resume_continuation(core, value)?,
            };
        }
    }

    /// Find the nearest matching frame and invoke its clause.
    fn dispatch(
        &mut self,
        pending: PendingOperation,
        effect: EffectId,
        op: OpIndex,
        tail_only: bool,
    ) -> Result<Comp, RuntimeFault> {
        let Some((frame, walked)) = self.chain.find_handler(effect, op, None) else {
            return Err(RuntimeFault::UnhandledEffect {
                effect: pending.effect,
                operation: pending.operation,
                depth: self.chain.depth(),
            });
        };

        let clause = match frame.handler().clause(effect, op) {
            Some(clause) => clause.clone(),
            // find_handler only matches frames whose handler covers the
            // operation; a miss here is broken bookkeeping.
            None => {
                return Err(RuntimeFault::FrameMismatch {
                    expected: frame.id(),
                    found: FrameId::NONE,
                })
            }
        };

        let fused = (tail_only || clause.mode == ResumeMode::Tail)
            && frame.id() == self.chain.head_id();

        if fused {
            debug!(
                effect = %pending.effect,
                operation = %pending.operation,
                frame = %frame.id(),
                "fused tail dispatch"
            );
            frame.set_state(FrameState::Dispatching);
            let k = Continuation::direct(frame.id(), &pending.effect, &pending.operation);
            let core = k.core_arc();
            self.stack.push(Segment::TailGuard {
                frame,
                core,
            });
            return Ok((clause.run)(pending.args, k));
        }

        // Capture path: locate the frame's prompt on the segment stack.
        let Some(idx) = self
            .stack
            .iter()
            .rposition(|seg| matches!(seg, Segment::Prompt(f) if f.id() == frame.id()))
        else {
            return Err(RuntimeFault::FrameMismatch {
                expected: frame.id(),
                found: FrameId::NONE,
            });
        };

        frame.set_state(FrameState::Dispatching);
        let (captured, resumes_frame) = match frame.handler().kind() {
            // Deep: the frame travels with the continuation and is
            // re-installed on resume.
            HandlerKind::Deep => (self.stack.split_off(idx), true),
            // Shallow: the frame is consumed by this dispatch.
            HandlerKind::Shallow => {
                let segments = self.stack.split_off(idx + 1);
                self.stack.pop();
                (segments, false)
            }
        };

        // Every captured frame leaves the chain, innermost first.
        for seg in captured.iter().rev() {
            if let Segment::Prompt(f) = seg {
                self.chain.pop_frame(f.id())?;
            }
        }
        if frame.handler().kind() == HandlerKind::Shallow {
            self.chain.pop_frame(frame.id())?;
            frame.set_state(FrameState::Done);
        }

        let k = Continuation::captured(
            captured,
            resumes_frame,
            tail_only,
            self.stack.len(),
            &pending.effect,
            &pending.operation,
        );
        debug!(
            effect = %pending.effect,
            operation = %pending.operation,
            frame = %frame.id(),
            walked,
            continuation = %k.id(),
            frames_captured = k.captured_frames(),
            "captured continuation, dispatching clause"
        );
        Ok((clause.run)(pending.args, k))
    }

    /// Consume a continuation and continue at its perform site.
    fn resume_continuation(
        &mut self,
        core: Arc<ContCore>,
        value: Value,
    ) -> Result<Comp, RuntimeFault> {
        let taken = mem::replace(&mut *core.state.lock(), ContState::Consumed);
        match taken {
            ContState::Consumed => Err(RuntimeFault::ContinuationReused { id: core.id }),
            ContState::Direct { frame } => match self.stack.pop() {
                Some(Segment::TailGuard { frame: guarded, .. }) if guarded.id() == frame => {
                    trace!(continuation = %core.id, frame = %frame, "direct tail resume");
                    guarded.set_state(FrameState::Running);
                    Ok(Comp::value(value))
                }
                other => {
                    // Pending work above the guard, or a resume from a
                    // foreign context: either way the clause did not
                    // resume as its final action.
                    if let Some(seg) = other {
                        self.stack.push(seg);
                    }
                    Err(RuntimeFault::TailResumptionViolation {
                        effect: core.effect.clone(),
                        operation: core.operation.clone(),
                    })
                }
            },
            ContState::Captured {
                segments,
                resumes_frame,
                enforce_tail,
                base_height,
            } => {
                if enforce_tail && self.stack.len() != base_height {
                    return Err(RuntimeFault::TailResumptionViolation {
                        effect: core.effect.clone(),
                        operation: core.operation.clone(),
                    });
                }
                trace!(
                    continuation = %core.id,
                    segments = segments.len(),
                    "splicing captured continuation"
                );
                self.splice(segments, resumes_frame);
                Ok(Comp::value(value))
            }
        }
    }

    /// Re-establish captured segments on top of the current context.
    fn splice(&mut self, segments: Vec<Segment>, resumes_frame: bool) {
        for (index, seg) in segments.into_iter().enumerate() {
            match seg {
                Segment::Prompt(frame) => {
                    if index == 0 && resumes_frame {
                        // Deep re-installation of the dispatching frame.
                        frame.set_state(FrameState::Running);
                    }
                    self.chain.push_frame(frame.clone());
                    self.stack.push(Segment::Prompt(frame));
                }
                other => self.stack.push(other),
            }
        }
    }

    /// Drop pending segments down to and including the frame `target`,
    /// releasing abandoned frames without firing their return clauses.
    fn unwind_through(&mut self, target: FrameId) -> Result<(), RuntimeFault> {
        loop {
            match self.stack.pop() {
                Some(Segment::Prompt(frame)) => {
                    self.chain.pop_frame(frame.id())?;
                    frame.set_state(FrameState::Done);
                    if frame.id() == target {
                        return Ok(());
                    }
                }
                Some(_) => {}
                None => {
                    return Err(RuntimeFault::FrameMismatch {
                        expected: target,
                        found: FrameId::NONE,
                    })
                }
            }
        }
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("segments", &self.stack.len())
            .field("chain_depth", &self.chain.depth())
            .finish()
    }
}

/// Install `handler` around `scrutinee` and evaluate on a fresh machine
/// with the default configuration.
pub fn install_handler(
    registry: &Arc<EffectRegistry>,
    handler: Handler,
    scrutinee: Thunk,
) -> Result<Value, RuntimeFault> {
    Machine::new(Arc::clone(registry)).install_handler(handler, scrutinee)
}
