//! # Ichor Effect Runtime
//!
//! An algebraic-effect execution runtime: named, typed operations that
//! suspend the current computation, dynamically-scoped handler dispatch,
//! one-shot continuations, and tail-resumptive fusion.
//!
//! The runtime is a library consumed by an upstream evaluator or
//! compiler. It begins where an instruction stream already carries
//! effect-operation calls and handler installations, and ends by
//! producing ordinary values. Parsing, name resolution, and effect
//! checking happen upstream.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        ICHOR RUNTIME                           │
//! ├────────────────────────────────────────────────────────────────┤
//! │                                                                │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐        │
//! │  │   Registry   │   │   Handlers   │   │    Chain     │        │
//! │  │ (registry.rs)│   │  (frame.rs)  │   │  (chain.rs)  │        │
//! │  └──────────────┘   └──────────────┘   └──────────────┘        │
//! │         │                  │                  │                │
//! │         └──────────────────┼──────────────────┘                │
//! │                            │                                   │
//! │  ┌──────────────┐  ┌─────────────────┐  ┌──────────────┐      │
//! │  │  Dispatcher  │  │  Continuations  │  │  Classifier  │      │
//! │  │ (machine.rs) │  │(continuation.rs)│  │ (classify.rs)│      │
//! │  └──────────────┘  └─────────────────┘  └──────────────┘      │
//! │                                                                │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use ichor_runtime::{
//!     install_handler, perform, EffectDecl, EffectRegistry, Handler, OpIndex,
//!     Value, ValueShape,
//! };
//!
//! let mut registry = EffectRegistry::new();
//! let give = registry
//!     .declare_effect(EffectDecl::new("GiveInt").operation("ask", vec![], ValueShape::Int))
//!     .unwrap();
//!
//! let handler = Handler::builder(&registry)
//!     .on(give, "ask", |_args, k| k.resume(0i64))
//!     .build()
//!     .unwrap();
//!
//! let registry = Arc::new(registry);
//! let result = install_handler(
//!     &registry,
//!     handler,
//!     Box::new(move || {
//!         perform(give, OpIndex(0), vec![]).and_then(move |a| {
//!             perform(give, OpIndex(0), vec![])
//!                 .map(move |b| Value::Int(5 + a.as_int().unwrap() + b.as_int().unwrap()))
//!         })
//!     }),
//! )
//! .unwrap();
//! assert_eq!(result, Value::Int(5));
//! ```
//!
//! ## Semantics in brief
//!
//! - **Nearest handler wins**: dispatch walks the handler chain outward
//!   from the innermost frame; a frame whose clause is currently running
//!   is excluded, so a clause performing its own effect reaches the
//!   next-outer installation.
//! - **One-shot continuations**: a continuation resumes at most once.
//!   Resuming a second time faults with `ContinuationReused`; dropping
//!   without resuming abandons everything after the perform site.
//! - **Deep by default**: resuming re-installs the handler frame, and the
//!   return clause fires exactly once when the scrutinee completes
//!   normally. Shallow handlers are consumed by their first dispatch.
//! - **Tail-resumptive fusion**: clauses classified as tail-resumptive
//!   dispatch as direct calls with no continuation capture, observably
//!   identical to the captured path.
//!
//! Execution is single-threaded and cooperative; there is no preemption
//! and no blocking inside the runtime. A not-yet-resumed continuation may
//! be moved across threads; the single-resume rule still applies.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod chain;
pub mod classify;
pub mod comp;
pub mod config;
pub mod continuation;
pub mod fault;
pub mod frame;
pub mod machine;
pub mod registry;
pub mod std_effects;
pub mod value;

// Re-exports
pub use chain::HandlerChain;
pub use classify::{classify_clause, is_tail_resumptive, ClauseShape, ResumeMode};
pub use comp::{perform, Comp, Thunk};
pub use config::{ConfigError, MachineConfig, MachineConfigBuilder};
pub use continuation::{Continuation, ContinuationId};
pub use fault::{RegistryError, RuntimeFault};
pub use frame::{FrameId, FrameRef, FrameState, Handler, HandlerBuilder, HandlerKind};
pub use machine::{install_handler, Machine};
pub use registry::{EffectDecl, EffectId, EffectKind, EffectRegistry, OpIndex, OperationSig};
pub use value::{Value, ValueShape};

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
