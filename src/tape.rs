//! One rewindable reverse-mode tape **per thread**.
//!
//! `Tape` composes four [`BlockList`]s: `nodes`, `multi_adjoints`, `derivs`
//! and `arg_ptrs`. Every thread owns exactly one, stashed in a
//! `thread_local!`; no tape is ever shared across threads, and nothing in
//! this module reaches across a thread boundary.

use std::cell::RefCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::block_list::BlockList;
use crate::errors::{Result, TapeError};
use crate::node::Node;

/// Block capacity used for `nodes`, `derivs` and `arg_ptrs`. Generous
/// enough that a typical Monte-Carlo path's tape lives in a handful of
/// blocks; `derivs`/`arg_ptrs` only ever see `emplace_back_multi(n)` with
/// `n <= 2`, so this mostly bounds how often a new block is chained.
const TAPE_BLOCK_SIZE: usize = 4096;

/// Block capacity for `multi_adjoints`. Each `record_node` in multi mode
/// reserves `num_outputs` contiguous slots from this list, so this is also
/// the hard ceiling on `num_outputs` (see [`set_num_results_for_aad`]).
const MULTI_ADJOINT_BLOCK_SIZE: usize = 1 << 16;

pub struct Tape {
    nodes: BlockList<Node, TAPE_BLOCK_SIZE>,
    multi_adjoints: BlockList<f64, MULTI_ADJOINT_BLOCK_SIZE>,
    derivs: BlockList<f64, TAPE_BLOCK_SIZE>,
    arg_ptrs: BlockList<*mut f64, TAPE_BLOCK_SIZE>,
    /// Cache-line pad after the hot cursor/block-pointer fields above, so
    /// that an array of per-worker-thread `Tape`s (should a caller build
    /// one) doesn't suffer false sharing between adjacent tapes. This
    /// crate keeps one `Tape` per thread in a `thread_local!`, not in such
    /// an array itself, but the padding is a property of the type.
    _pad: [u8; 64],
}

impl Default for Tape {
    fn default() -> Self {
        Tape {
            nodes: BlockList::new(),
            multi_adjoints: BlockList::new(),
            derivs: BlockList::new(),
            arg_ptrs: BlockList::new(),
            _pad: [0; 64],
        }
    }
}

impl Tape {
    fn new() -> Self {
        Self::default()
    }

    /// Allocate a `Node` of the given arity, wiring up its per-operation
    /// storage from the other three arenas. `multi`/`k` come from the
    /// process-wide configuration at the moment of the call.
    pub fn record_node(&mut self, arity: u8) -> NonNull<Node> {
        let (multi, k) = num_results_for_aad();
        let own_adjoints_ptr = if multi {
            let base = self.multi_adjoints.emplace_back_multi(k);
            unsafe {
                for i in 0..k {
                    *base.as_ptr().add(i) = 0.0;
                }
            }
            base.as_ptr()
        } else {
            std::ptr::null_mut()
        };
        let (derivatives, arg_adjoints) = if arity > 0 {
            let n = arity as usize;
            let d = self.derivs.emplace_back_multi(n);
            let a = self.arg_ptrs.emplace_back_multi(n);
            (d.as_ptr(), a.as_ptr())
        } else {
            (std::ptr::null_mut(), std::ptr::null_mut())
        };
        let node = Node {
            n: arity,
            own_adjoint_scalar: 0.0,
            own_adjoints_ptr,
            derivatives,
            arg_adjoints,
        };
        self.nodes.emplace_back(node)
    }

    /// Zero every adjoint currently on the tape.
    pub fn reset_adjoints(&mut self) {
        if num_results_for_aad().0 {
            self.multi_adjoints.memset_zero();
        } else {
            for node in self.nodes.iter_mut() {
                node.own_adjoint_scalar = 0.0;
            }
        }
    }

    /// Release all four arenas down to (at most) one block each.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.multi_adjoints.clear();
        self.derivs.clear();
        self.arg_ptrs.clear();
    }

    /// Logically empty the tape; all four arenas keep their blocks.
    pub fn rewind(&mut self) {
        self.nodes.rewind();
        self.multi_adjoints.rewind();
        self.derivs.rewind();
        self.arg_ptrs.rewind();
    }

    /// Save the current cursor across all four arenas atomically.
    pub fn mark(&mut self) {
        self.nodes.set_mark();
        self.multi_adjoints.set_mark();
        self.derivs.set_mark();
        self.arg_ptrs.set_mark();
    }

    /// Restore the cursor across all four arenas atomically. Partial
    /// application (marking only `nodes`, say) would leave live nodes
    /// pointing at freed derivative/arg-pointer storage, so this always
    /// rewinds all four together.
    pub fn rewind_to_mark(&mut self) {
        self.nodes.rewind_to_mark();
        self.multi_adjoints.rewind_to_mark();
        self.derivs.rewind_to_mark();
        self.arg_ptrs.rewind_to_mark();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Logical tape length at the last `mark()`; `0` if never marked.
    pub fn mark_index(&self) -> usize {
        self.nodes.mark_index()
    }

    pub fn find(&self, node: NonNull<Node>) -> Option<usize> {
        self.nodes.find(node)
    }

    pub fn get(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    /// Plain-text dump of every recorded node, in insertion order. A
    /// debugging helper, not wired into any logging framework — there is
    /// nothing on the AAD hot path worth instrumenting without paying for
    /// it.
    pub fn debug_print(&self) {
        for (i, node) in self.nodes.iter().enumerate() {
            println!("{i}: {node:?}");
        }
    }
}

thread_local! {
    /// Each thread owns its own tape; no cross-thread sharing.
    static TAPE: RefCell<Tape> = RefCell::new(Tape::new());
}

pub(crate) fn with_tape<R>(f: impl FnOnce(&mut Tape) -> R) -> R {
    TAPE.with(|t| f(&mut t.borrow_mut()))
}

pub(crate) fn with_tape_ref<R>(f: impl FnOnce(&Tape) -> R) -> R {
    TAPE.with(|t| f(&t.borrow()))
}

/* ===================================================================== */
/*  Process-wide multi-output configuration                              */
/* ===================================================================== */

static MULTI: AtomicBool = AtomicBool::new(false);
static NUM_OUTPUTS: AtomicUsize = AtomicUsize::new(1);

/// Set the process-wide `(multi, num_outputs)` pair used by every
/// subsequent `record_node`. Mutating this while any thread is mid-
/// recording is undefined; this is meant to be set once per process, or
/// scoped with [`NumResultsGuard`] around a nested multi-output sweep.
///
/// Panics if `k == 0` or `k` exceeds the multi-adjoint arena's block
/// capacity — a configuration error that must fail loudly rather than
/// silently truncate.
pub fn set_num_results_for_aad(multi: bool, k: usize) {
    assert!(k > 0, "set_num_results_for_aad: k must be at least 1");
    assert!(
        k <= MULTI_ADJOINT_BLOCK_SIZE,
        "set_num_results_for_aad: k={k} exceeds the multi-adjoint block capacity {MULTI_ADJOINT_BLOCK_SIZE}"
    );
    MULTI.store(multi, Ordering::SeqCst);
    NUM_OUTPUTS.store(k, Ordering::SeqCst);
}

/// Read back the current `(multi, num_outputs)` configuration.
pub fn num_results_for_aad() -> (bool, usize) {
    (MULTI.load(Ordering::SeqCst), NUM_OUTPUTS.load(Ordering::SeqCst))
}

/// RAII guard that restores the previous `(multi, num_outputs)` on drop
/// (including on unwind), so nested multi-output sweeps compose.
#[must_use = "NumResultsGuard restores the previous configuration when dropped"]
pub struct NumResultsGuard {
    prev_multi: bool,
    prev_k: usize,
}

impl NumResultsGuard {
    pub fn new(multi: bool, k: usize) -> Self {
        let (prev_multi, prev_k) = num_results_for_aad();
        set_num_results_for_aad(multi, k);
        NumResultsGuard { prev_multi, prev_k }
    }
}

impl Drop for NumResultsGuard {
    fn drop(&mut self) {
        set_num_results_for_aad(self.prev_multi, self.prev_k);
    }
}

/* ===================================================================== */
/*  Reverse sweep                                                         */
/* ===================================================================== */

/// Walk the current thread's tape from `from` backward to `to` (both
/// inclusive), invoking `propagate_one` or `propagate_all` on each node
/// depending on the tape-wide `multi` flag. `from` must be at or after `to`
/// in insertion order.
pub fn propagate_adjoints(from: usize, to: usize) {
    assert!(
        from >= to,
        "propagate_adjoints: from ({from}) must be at or after to ({to})"
    );
    let (multi, k) = num_results_for_aad();
    with_tape_ref(|tape| {
        for i in (to..=from).rev() {
            let node = tape
                .get(i)
                .copied()
                .expect("propagate_adjoints: index out of range");
            if multi {
                node.propagate_all(k);
            } else {
                node.propagate_one();
            }
        }
    });
}

/// Walk from `mark_index() - 1` down to `0`, without seeding anything.
/// Used for the second half of a two-phase sweep: the post-mark phase is
/// swept (and its outputs seeded) first via [`propagate_adjoints`], then
/// this continues the same sweep through the pre-mark phase.
pub fn propagate_mark_to_start() {
    let from = with_tape_ref(|tape| tape.mark_index()).saturating_sub(1);
    if with_tape_ref(|tape| tape.is_empty()) {
        return;
    }
    propagate_adjoints(from, 0);
}

pub(crate) fn tape_index(node: NonNull<Node>) -> Result<usize> {
    with_tape_ref(|tape| tape.find(node)).ok_or(TapeError::NotOnTape)
}


/* ===================================================================== */
/*  Free-function surface over the current thread's tape                 */
/* ===================================================================== */

/// Release all four arenas down to (at most) one block each.
pub fn clear() {
    with_tape(|t| t.clear());
}

/// Logically empty the current thread's tape; blocks are kept for reuse.
pub fn rewind() {
    with_tape(|t| t.rewind());
}

/// Save the current cursor across all four arenas atomically.
pub fn mark() {
    with_tape(|t| t.mark());
}

/// Restore the cursor across all four arenas atomically.
pub fn rewind_to_mark() {
    with_tape(|t| t.rewind_to_mark());
}

/// Zero every adjoint currently on the tape.
pub fn reset_adjoints() {
    with_tape(|t| t.reset_adjoints());
}

/// Number of nodes currently recorded on the current thread's tape.
pub fn tape_len() -> usize {
    with_tape_ref(|t| t.len())
}

/// Plain-text dump of the current thread's tape, in insertion order.
pub fn debug_print() {
    with_tape_ref(|t| t.debug_print());
}
