//! The differentiable scalar.
//!
//! `Number` pairs a plain `f64` value with a non-owning handle to the node
//! that represents it on the current thread's tape. Every arithmetic
//! operator computes its result in plain `f64`, records one new node on the
//! thread tape with that operation's local partial derivatives, and wires
//! each argument's adjoint address into the new node — eagerly, on every
//! call, never lazily. There is no expression-template deferral here: one
//! operator call is one recorded node.

use std::fmt::{Debug, Display};
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};
use std::ptr::NonNull;

use crate::errors::{Result, TapeError};
use crate::node::Node;
use crate::tape;

/// A differentiable scalar. Two fields: the forward value, and an optional
/// handle to this value's node on the current thread's tape.
///
/// `node` is `None` only for a value that has never touched the tape (the
/// `Default` impl, or before [`put_on_tape`](Number::put_on_tape) runs).
/// Dereferencing `node` is only sound while its tape position is still
/// live — i.e. the owning tape has not since been rewound past it. `Number`
/// has no `Drop` impl that removes itself from the tape; it is a non-owning
/// handle, the same way an index into a `Vec` stays syntactically valid
/// after the `Vec` is `truncate`d but no longer points at anything
/// meaningful.
#[derive(Clone, Copy)]
pub struct Number {
    value: f64,
    node: Option<NonNull<Node>>,
}

// Safety: a `Number`'s raw pointer only ever refers into the tape of the
// thread that recorded it; moving the `Number` value itself to another
// thread does not move the tape, so dereferencing it there would already
// be a documented programmer error, not something `Send`/`Sync` should
// paper over by refusing to compile. This crate does not implement
// Send/Sync for Number: it stays !Send/!Sync, matching the "Numbers don't
// cross thread boundaries" invariant directly.

impl Default for Number {
    fn default() -> Self {
        Number { value: 0.0, node: None }
    }
}

impl Number {
    /// Record a leaf (arity-0) node and return the `Number` that refers to
    /// it. Equivalent to `Number::from(value)`.
    pub fn new(value: f64) -> Self {
        Number::from(value)
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Force a leaf recording for a `Number` whose node is currently
    /// absent (e.g. default-constructed, or built without going through
    /// [`From<f64>`]). No-op if this `Number` is already on the tape.
    pub fn put_on_tape(&mut self) {
        if self.node.is_none() {
            self.node = Some(tape::with_tape(|t| t.record_node(0)));
        }
    }

    fn node_ptr(&self) -> NonNull<Node> {
        self.node
            .expect("Number has no tape node; call put_on_tape() first")
    }

    /// Dereference this `Number`'s node. In debug builds this additionally
    /// performs a tape-presence check: a linear scan via `Tape::find`,
    /// intended purely as a debugging aid (it is not run in release, and
    /// is not how correctness is normally guaranteed).
    fn node_ref(&self) -> &Node {
        let p = self.node_ptr();
        #[cfg(debug_assertions)]
        {
            let present = tape::with_tape_ref(|t| t.find(p).is_some());
            debug_assert!(present, "Number's node is not on the current tape");
        }
        unsafe { p.as_ref() }
    }

    /// This `Number`'s adjoint, single-output mode.
    pub fn adjoint(&self) -> f64 {
        self.node_ref().own_adjoint_scalar
    }

    /// This `Number`'s adjoint for output `output_index`, multi-output mode.
    pub fn adjoint_multi(&self, output_index: usize) -> Result<f64> {
        let (_, k) = tape::num_results_for_aad();
        if output_index >= k {
            return Err(TapeError::OutputIndexOutOfRange {
                index: output_index,
                num_outputs: k,
            });
        }
        let node = self.node_ref();
        Ok(unsafe { *node.own_adjoints_ptr.add(output_index) })
    }

    /// Seed this `Number`'s own adjoint directly (single-output mode).
    /// Exposed so callers can seed with `alpha != 1.0` (see the linearity
    /// property in the design's testable properties).
    pub fn seed_adjoint(&self, value: f64) {
        let p = self.node_ptr();
        unsafe {
            (*p.as_ptr()).own_adjoint_scalar = value;
        }
    }

    /// Seed one slot of this `Number`'s adjoint vector (multi-output mode).
    pub fn seed_adjoint_multi(&self, output_index: usize, value: f64) -> Result<()> {
        let (_, k) = tape::num_results_for_aad();
        if output_index >= k {
            return Err(TapeError::OutputIndexOutOfRange {
                index: output_index,
                num_outputs: k,
            });
        }
        let p = self.node_ptr();
        unsafe {
            *(*p.as_ptr()).own_adjoints_ptr.add(output_index) = value;
        }
        Ok(())
    }

    /// The address an argument's adjoint lives at: the scalar field in
    /// single mode, the `K`-vector base in multi mode. This is what gets
    /// written into a new node's `arg_adjoints[i]`.
    fn adjoint_slot(&self, multi: bool) -> *mut f64 {
        let p = self.node_ptr().as_ptr();
        unsafe {
            if multi {
                (*p).own_adjoints_ptr
            } else {
                std::ptr::addr_of_mut!((*p).own_adjoint_scalar)
            }
        }
    }

    /// This `Number`'s position on the current thread's tape, found via a
    /// linear scan over the tape's node list.
    pub fn try_tape_index(&self) -> Result<usize> {
        tape::tape_index(self.node_ptr())
    }

    fn tape_index(&self) -> usize {
        self.try_tape_index()
            .expect("Number::propagate_adjoints: node not found on the current tape")
    }

    /// Record a unary node depending only on `arg`.
    fn unary(arg: Number, d: f64, value: f64) -> Number {
        let (multi, _) = tape::num_results_for_aad();
        let node = tape::with_tape(|t| t.record_node(1));
        unsafe {
            let n = node.as_ptr();
            *(*n).derivatives = d;
            *(*n).arg_adjoints = arg.adjoint_slot(multi);
        }
        Number { value, node: Some(node) }
    }

    /// Record a binary node depending on `lhs` and `rhs`.
    fn binary(lhs: Number, rhs: Number, d_lhs: f64, d_rhs: f64, value: f64) -> Number {
        let (multi, _) = tape::num_results_for_aad();
        let node = tape::with_tape(|t| t.record_node(2));
        unsafe {
            let n = node.as_ptr();
            *(*n).derivatives.add(0) = d_lhs;
            *(*n).derivatives.add(1) = d_rhs;
            *(*n).arg_adjoints.add(0) = lhs.adjoint_slot(multi);
            *(*n).arg_adjoints.add(1) = rhs.adjoint_slot(multi);
        }
        Number { value, node: Some(node) }
    }

    /* ---- reverse sweep entry points ---- */

    /// Seed this `Number`'s adjoint to `1.0`, locate it on the tape, and
    /// walk backward to `to` (inclusive).
    pub fn propagate_adjoints(&self, to: usize) {
        self.seed_adjoint(1.0);
        let from = self.tape_index();
        tape::propagate_adjoints(from, to);
    }

    pub fn propagate_to_start(&self) {
        self.propagate_adjoints(0);
    }

    pub fn propagate_to_mark(&self) {
        let m = tape::with_tape_ref(|t| t.mark_index());
        self.propagate_adjoints(m);
    }

    /// Multi-output variant: seeds `own_adjoints_ptr[output_index] = 1.0`
    /// rather than the scalar adjoint, then sweeps exactly as
    /// [`propagate_adjoints`](Self::propagate_adjoints). The tape-wide
    /// multi flag (not this call) decides whether `propagate_one` or
    /// `propagate_all` runs at each node.
    pub fn propagate_adjoints_multi(&self, output_index: usize, to: usize) -> Result<()> {
        self.seed_adjoint_multi(output_index, 1.0)?;
        let from = self.tape_index();
        tape::propagate_adjoints(from, to);
        Ok(())
    }
}

/// Walk from `mark_index() - 1` down to `0`, without seeding anything.
/// The second half of a two-phase sweep: sweep (and seed) the post-mark
/// phase first via [`Number::propagate_adjoints`], then call this to
/// continue through the pre-mark phase.
pub fn propagate_mark_to_start() {
    tape::propagate_mark_to_start();
}

/* ===================================================================== */
/*  Construction                                                         */
/* ===================================================================== */

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        let node = tape::with_tape(|t| t.record_node(0));
        Number { value, node: Some(node) }
    }
}

impl From<f32> for Number {
    fn from(value: f32) -> Self {
        Number::from(value as f64)
    }
}

impl From<i32> for Number {
    fn from(value: i32) -> Self {
        Number::from(value as f64)
    }
}

impl From<Number> for f64 {
    fn from(n: Number) -> Self {
        n.value
    }
}

/* ===================================================================== */
/*  Operators                                                            */
/* ===================================================================== */

impl Add for Number {
    type Output = Number;
    fn add(self, rhs: Number) -> Number {
        Number::binary(self, rhs, 1.0, 1.0, self.value + rhs.value)
    }
}
impl Add<f64> for Number {
    type Output = Number;
    fn add(self, c: f64) -> Number {
        Number::unary(self, 1.0, self.value + c)
    }
}
impl Add<Number> for f64 {
    type Output = Number;
    fn add(self, r: Number) -> Number {
        r + self
    }
}

impl Sub for Number {
    type Output = Number;
    fn sub(self, rhs: Number) -> Number {
        Number::binary(self, rhs, 1.0, -1.0, self.value - rhs.value)
    }
}
impl Sub<f64> for Number {
    type Output = Number;
    fn sub(self, c: f64) -> Number {
        Number::unary(self, 1.0, self.value - c)
    }
}
impl Sub<Number> for f64 {
    type Output = Number;
    fn sub(self, r: Number) -> Number {
        Number::unary(r, -1.0, self - r.value)
    }
}

impl Mul for Number {
    type Output = Number;
    fn mul(self, rhs: Number) -> Number {
        Number::binary(self, rhs, rhs.value, self.value, self.value * rhs.value)
    }
}
impl Mul<f64> for Number {
    type Output = Number;
    fn mul(self, c: f64) -> Number {
        Number::unary(self, c, self.value * c)
    }
}
impl Mul<Number> for f64 {
    type Output = Number;
    fn mul(self, r: Number) -> Number {
        r * self
    }
}

impl Div for Number {
    type Output = Number;
    fn div(self, rhs: Number) -> Number {
        let inv = 1.0 / rhs.value;
        Number::binary(self, rhs, inv, -self.value * inv * inv, self.value * inv)
    }
}
impl Div<f64> for Number {
    type Output = Number;
    fn div(self, c: f64) -> Number {
        Number::unary(self, 1.0 / c, self.value / c)
    }
}
impl Div<Number> for f64 {
    type Output = Number;
    fn div(self, r: Number) -> Number {
        let v = self / r.value;
        Number::unary(r, -self / (r.value * r.value), v)
    }
}

impl Neg for Number {
    type Output = Number;
    /// Computed as `0.0 - a`: a unary node with derivative `-1`.
    fn neg(self) -> Number {
        Number::unary(self, -1.0, -self.value)
    }
}

// Unary `+a` is the identity and records nothing: Rust has no `Pos`
// operator trait, so this is simply `a` itself at call sites.

macro_rules! impl_compound_assign {
    ($Trait:ident, $method:ident, $op:tt) => {
        impl $Trait<Number> for Number {
            fn $method(&mut self, rhs: Number) {
                *self = *self $op rhs;
            }
        }
        impl $Trait<f64> for Number {
            fn $method(&mut self, rhs: f64) {
                *self = *self $op rhs;
            }
        }
    };
}
impl_compound_assign!(AddAssign, add_assign, +);
impl_compound_assign!(SubAssign, sub_assign, -);
impl_compound_assign!(MulAssign, mul_assign, *);
impl_compound_assign!(DivAssign, div_assign, /);

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}
impl PartialEq<f64> for Number {
    fn eq(&self, other: &f64) -> bool {
        self.value == *other
    }
}
impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.value.partial_cmp(&other.value)
    }
}
impl PartialOrd<f64> for Number {
    fn partial_cmp(&self, other: &f64) -> Option<std::cmp::Ordering> {
        self.value.partial_cmp(other)
    }
}

impl Debug for Number {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Number(value={})", self.value)
    }
}
impl Display for Number {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

/* ===================================================================== */
/*  Free-function math operators                                         */
/* ===================================================================== */

fn normal_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

fn normal_cdf_f64(x: f64) -> f64 {
    0.5 * (1.0 + statrs::function::erf::erf(x / std::f64::consts::SQRT_2))
}

/// `a ** b`, with `∂/∂a = b·aᵇ/a` and `∂/∂b = ln(a)·aᵇ`. As with the
/// underlying `f64::powf`, `a <= 0` propagates NaN rather than being
/// checked for.
pub fn pow(a: Number, b: Number) -> Number {
    let v = a.value.powf(b.value);
    let d_a = b.value * v / a.value;
    let d_b = a.value.ln() * v;
    Number::binary(a, b, d_a, d_b, v)
}

/// `max(a, b)`. At `a == b` neither branch fires and both derivatives
/// are `0`.
pub fn max(a: Number, b: Number) -> Number {
    let d_a = if a.value > b.value { 1.0 } else { 0.0 };
    let d_b = if b.value > a.value { 1.0 } else { 0.0 };
    Number::binary(a, b, d_a, d_b, a.value.max(b.value))
}

/// `min(a, b)`. At `a == b` neither branch fires and both derivatives
/// are `0`.
pub fn min(a: Number, b: Number) -> Number {
    let d_a = if a.value < b.value { 1.0 } else { 0.0 };
    let d_b = if b.value < a.value { 1.0 } else { 0.0 };
    Number::binary(a, b, d_a, d_b, a.value.min(b.value))
}

pub fn exp(a: Number) -> Number {
    let v = a.value.exp();
    Number::unary(a, v, v)
}

/// Natural log. `a <= 0` propagates NaN rather than being checked for.
pub fn log(a: Number) -> Number {
    let v = a.value.ln();
    Number::unary(a, 1.0 / a.value, v)
}

pub fn sqrt(a: Number) -> Number {
    let v = a.value.sqrt();
    Number::unary(a, 0.5 / v, v)
}

/// Absolute value. At exactly `a == 0` the derivative is defined as `-1`
/// rather than `0` — a known pseudo-discontinuity; avoid seeding
/// adjoints through this kink if it matters to the caller.
pub fn fabs(a: Number) -> Number {
    let v = a.value.abs();
    let d = if a.value > 0.0 { 1.0 } else { -1.0 };
    Number::unary(a, d, v)
}

/// Standard normal density `φ(a)`.
pub fn normal_dens(a: Number) -> Number {
    let v = normal_pdf(a.value);
    Number::unary(a, -a.value * v, v)
}

/// Standard normal CDF `Φ(a)`, with `∂/∂a = φ(a)`.
pub fn normal_cdf(a: Number) -> Number {
    let v = normal_cdf_f64(a.value);
    let d = normal_pdf(a.value);
    Number::unary(a, d, v)
}
