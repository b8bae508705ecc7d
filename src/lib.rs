//! Reverse-mode adjoint algorithmic differentiation.
//!
//! A [`Number`] is a plain `f64` plus a handle into a per-thread [`tape`].
//! Every arithmetic operator and every free function in this crate (`exp`,
//! `log`, `sqrt`, `pow`, `fabs`, `normal_cdf`, `normal_dens`, `max`, `min`)
//! computes its `f64` result eagerly and records exactly one [`Node`] with
//! that operation's local partial derivatives, wiring raw pointers back to
//! each argument's adjoint storage. A later call to one of `Number`'s
//! `propagate_*` methods walks the tape backward and accumulates adjoints
//! in place — the standard reverse-mode sweep, without building or walking
//! any separate computation graph: the tape *is* the graph, in recorded
//! order.
//!
//! ```
//! use aad_core::Number;
//!
//! let x = Number::from(3.0);
//! let y = x * x + x * 2.0 + Number::from(1.0);
//! assert_eq!(y.value(), 16.0);
//!
//! y.propagate_to_start();
//! assert_eq!(x.adjoint(), 8.0); // dy/dx = 2x + 2 at x=3
//! ```
//!
//! Tapes are thread-local and never shared; a [`Number`] must not cross a
//! thread boundary (see [`tape`] for the process-wide multi-output
//! configuration and the mark/rewind primitives used for checkpointed or
//! two-phase sweeps).

pub mod block_list;
pub mod errors;
pub mod node;
pub mod number;
pub mod real;
pub mod tape;

pub use errors::{Result, TapeError};
pub use number::{exp, fabs, log, max, min, normal_cdf, normal_dens, pow, propagate_mark_to_start, sqrt, Number};
pub use real::Real;
pub use tape::{mark, rewind, rewind_to_mark, set_num_results_for_aad, NumResultsGuard};
