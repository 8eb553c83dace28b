//! # Tail-Resumption Classification
//!
//! Determines, per handler clause, how the clause uses its continuation.
//!
//! A clause is *tail-resumptive* if every control path through it either
//! never resumes, or resumes exactly once as its final action with no
//! further work afterwards. For such clauses the dispatcher can fuse the
//! suspend/find/resume round trip into a direct call with no continuation
//! capture.
//!
//! Based on: [Effect Handlers, Evidently](https://dl.acm.org/doi/10.1145/3408981)
//! (ICFP 2020) — "Tail-resumptive operations can execute _in-place_
//! (instead of yielding to the handler)".
//!
//! Runtime clauses are opaque closures, so classification works on a
//! declarative control-shape description ([`ClauseShape`]) produced by
//! the upstream compiler from the clause body it lowered.

/// How a clause uses its continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Every resuming path resumes exactly once, in tail position.
    /// Eligible for fused dispatch.
    Tail,
    /// No path resumes. The clause always abandons the continuation.
    Abort,
    /// Anything else: resume followed by further work, conditional
    /// non-tail resumes, or resumes inside loops. Requires full capture.
    General,
}

/// Condensed control shape of a clause body.
///
/// Only the structure relevant to resume placement is retained; ordinary
/// computation collapses into [`ClauseShape::Value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClauseShape {
    /// The path ends by resuming the continuation.
    Resume,
    /// The path ends by producing a value without resuming.
    Value,
    /// Sequential composition; only the last element is in tail position.
    Seq(Vec<ClauseShape>),
    /// Branching (if/match); each arm is an independent path.
    Branch(Vec<ClauseShape>),
    /// A loop body, which may execute any number of times.
    Loop(Box<ClauseShape>),
}

impl ClauseShape {
    /// Whether any path through this shape resumes.
    pub fn contains_resume(&self) -> bool {
        match self {
            ClauseShape::Resume => true,
            ClauseShape::Value => false,
            ClauseShape::Seq(parts) => parts.iter().any(ClauseShape::contains_resume),
            ClauseShape::Branch(arms) => arms.iter().any(ClauseShape::contains_resume),
            ClauseShape::Loop(body) => body.contains_resume(),
        }
    }
}

/// Per-path summary used during classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Summary {
    /// No path resumes.
    NoResume,
    /// Every resuming path resumes exactly once, in final position.
    /// Some paths may not resume at all.
    TailOnly,
    /// Some path resumes non-finally, more than once, or inside a loop.
    Bad,
}

fn summarize(shape: &ClauseShape) -> Summary {
    match shape {
        ClauseShape::Resume => Summary::TailOnly,
        ClauseShape::Value => Summary::NoResume,
        ClauseShape::Seq(parts) => match parts.split_last() {
            None => Summary::NoResume,
            Some((last, init)) => {
                // A resume anywhere before the tail element is never final.
                if init.iter().any(ClauseShape::contains_resume) {
                    return Summary::Bad;
                }
                summarize(last)
            }
        },
        ClauseShape::Branch(arms) => {
            let mut any_resume = false;
            for arm in arms {
                match summarize(arm) {
                    Summary::Bad => return Summary::Bad,
                    Summary::TailOnly => any_resume = true,
                    Summary::NoResume => {}
                }
            }
            if any_resume {
                Summary::TailOnly
            } else {
                Summary::NoResume
            }
        }
        // A loop body may run zero or many times, so any resume inside
        // it is neither final nor guaranteed single.
        ClauseShape::Loop(body) => {
            if body.contains_resume() {
                Summary::Bad
            } else {
                Summary::NoResume
            }
        }
    }
}

/// Classify a clause's continuation discipline from its control shape.
pub fn classify_clause(shape: &ClauseShape) -> ResumeMode {
    match summarize(shape) {
        Summary::NoResume => ResumeMode::Abort,
        Summary::TailOnly => ResumeMode::Tail,
        Summary::Bad => ResumeMode::General,
    }
}

/// Check whether a clause shape is tail-resumptive.
///
/// Both [`ResumeMode::Tail`] and [`ResumeMode::Abort`] qualify: a path
/// that never resumes performs no work after the (absent) resume either.
pub fn is_tail_resumptive(shape: &ClauseShape) -> bool {
    matches!(
        classify_clause(shape),
        ResumeMode::Tail | ResumeMode::Abort
    )
}
