//! Native stack growth for the recursive paths of the reader and evaluator.
//!
//! Tail calls run in the evaluator loop and never get here. What remains
//! recursive is nesting: a list inside a list in the reader, an argument that
//! is itself a call in the evaluator. Both are bounded by explicit depth
//! limits ([`crate::MAX_PARSE_DEPTH`], [`crate::MAX_EVAL_DEPTH`]); this module
//! makes sure the native stack can actually hold that many frames.

/// Grow the stack when less than this remains
const RED_ZONE: usize = 128 * 1024;

/// Size of each new stack segment
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Run `f`, first allocating a new stack segment if the current one is nearly full.
#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

/// WASM manages its own stack.
#[inline]
#[cfg(target_arch = "wasm32")]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
