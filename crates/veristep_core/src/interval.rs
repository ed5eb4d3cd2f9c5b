use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

/// Returns the largest float strictly below `x` (identity on -inf and NaN).
fn next_down(x: f64) -> f64 {
    if x.is_nan() || x == f64::NEG_INFINITY {
        return x;
    }
    if x == 0.0 {
        return -f64::from_bits(1);
    }
    let bits = x.to_bits();
    f64::from_bits(if x > 0.0 { bits - 1 } else { bits + 1 })
}

/// Returns the smallest float strictly above `x` (identity on +inf and NaN).
fn next_up(x: f64) -> f64 {
    if x.is_nan() || x == f64::INFINITY {
        return x;
    }
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    f64::from_bits(if x > 0.0 { bits + 1 } else { bits - 1 })
}

/// Lower bound on the exact sum: the two-sum residue recovers the rounding
/// error of `a + b`, so the computed sum is nudged one ulp only when the
/// true sum lies below it. Exact sums stay exact.
fn add_down(a: f64, b: f64) -> f64 {
    let s = a + b;
    if !s.is_finite() {
        return next_down(s);
    }
    let bb = s - a;
    let err = (a - (s - bb)) + (b - bb);
    if err < 0.0 || err.is_nan() {
        next_down(s)
    } else {
        s
    }
}

fn add_up(a: f64, b: f64) -> f64 {
    let s = a + b;
    if !s.is_finite() {
        return next_up(s);
    }
    let bb = s - a;
    let err = (a - (s - bb)) + (b - bb);
    if err > 0.0 || err.is_nan() {
        next_up(s)
    } else {
        s
    }
}

/// Lower bound on the exact product via the fused-multiply-add residue.
/// A product in the subnormal range can lose the residue to underflow and
/// is nudged unconditionally; 0 * inf is the exact product of the zero
/// endpoint, which is zero.
fn mul_down(a: f64, b: f64) -> f64 {
    let p = a * b;
    if p.is_nan() {
        return 0.0;
    }
    if !p.is_finite() || (p.abs() < f64::MIN_POSITIVE && a != 0.0 && b != 0.0) {
        return next_down(p);
    }
    let err = a.mul_add(b, -p);
    if err < 0.0 || err.is_nan() {
        next_down(p)
    } else {
        p
    }
}

fn mul_up(a: f64, b: f64) -> f64 {
    let p = a * b;
    if p.is_nan() {
        return 0.0;
    }
    if !p.is_finite() || (p.abs() < f64::MIN_POSITIVE && a != 0.0 && b != 0.0) {
        return next_up(p);
    }
    let err = a.mul_add(b, -p);
    if err > 0.0 || err.is_nan() {
        next_up(p)
    } else {
        p
    }
}

/// Directed quotient bound: `q*b - a` has the sign of `(q - a/b) * b`, so
/// its sign against `b` tells which side of the true quotient `q` fell on.
fn div_down(a: f64, b: f64) -> f64 {
    let q = a / b;
    if !q.is_finite() || (q.abs() < f64::MIN_POSITIVE && a != 0.0) {
        return next_down(q);
    }
    let err = q.mul_add(b, -a);
    if err == 0.0 {
        q
    } else if err.is_nan() || ((err > 0.0) == (b > 0.0)) {
        next_down(q)
    } else {
        q
    }
}

fn div_up(a: f64, b: f64) -> f64 {
    let q = a / b;
    if !q.is_finite() || (q.abs() < f64::MIN_POSITIVE && a != 0.0) {
        return next_up(q);
    }
    let err = q.mul_add(b, -a);
    if err == 0.0 {
        q
    } else if err.is_nan() || ((err > 0.0) != (b > 0.0)) {
        next_up(q)
    } else {
        q
    }
}

/// A closed interval [lo, hi] over f64 with outward-rounded arithmetic.
///
/// Each endpoint operation recovers its rounding residue (two-sum for
/// sums, fused-multiply-add for products and quotients) and nudges the
/// computed endpoint one ulp outward only when the residue shows the true
/// value fell outside it. The result of any expression therefore contains
/// the exact real result for all points of the operands, and operations
/// that are exact in f64 stay exact. Division by an interval containing
/// zero yields the entire real line rather than panicking; see
/// [`Interval::try_div`] for the checked variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    lo: f64,
    hi: f64,
}

impl Interval {
    pub const ZERO: Interval = Interval { lo: 0.0, hi: 0.0 };
    pub const ONE: Interval = Interval { lo: 1.0, hi: 1.0 };
    pub const ENTIRE: Interval = Interval {
        lo: f64::NEG_INFINITY,
        hi: f64::INFINITY,
    };

    /// Creates [lo, hi]. Panics if the bounds are inverted or NaN; an
    /// inverted interval is a programming error on par with an
    /// out-of-bounds index.
    pub fn new(lo: f64, hi: f64) -> Interval {
        assert!(lo <= hi, "inverted interval bounds [{lo}, {hi}]");
        Interval { lo, hi }
    }

    /// The degenerate interval [v, v].
    pub fn point(v: f64) -> Interval {
        assert!(!v.is_nan(), "NaN interval endpoint");
        Interval { lo: v, hi: v }
    }

    pub fn left(&self) -> f64 {
        self.lo
    }

    pub fn right(&self) -> f64 {
        self.hi
    }

    /// Midpoint, rounded to nearest.
    pub fn mid(&self) -> f64 {
        if self.lo == f64::NEG_INFINITY || self.hi == f64::INFINITY {
            return 0.0;
        }
        0.5 * self.lo + 0.5 * self.hi
    }

    /// Upper bound on the diameter hi - lo.
    pub fn diam(&self) -> f64 {
        next_up(self.hi - self.lo)
    }

    /// Maximal absolute value over the interval.
    pub fn mag(&self) -> f64 {
        self.lo.abs().max(self.hi.abs())
    }

    /// Minimal absolute value over the interval.
    pub fn mig(&self) -> f64 {
        if self.contains_zero() {
            0.0
        } else {
            self.lo.abs().min(self.hi.abs())
        }
    }

    /// The interval of absolute values [mig, mag].
    pub fn abs(&self) -> Interval {
        Interval {
            lo: self.mig(),
            hi: self.mag(),
        }
    }

    pub fn is_point(&self) -> bool {
        self.lo == self.hi
    }

    pub fn contains(&self, v: f64) -> bool {
        self.lo <= v && v <= self.hi
    }

    pub fn contains_zero(&self) -> bool {
        self.lo <= 0.0 && 0.0 <= self.hi
    }

    pub fn is_finite(&self) -> bool {
        self.lo.is_finite() && self.hi.is_finite()
    }

    /// Is `self` a subset of `other`?
    pub fn subset(&self, other: &Interval) -> bool {
        other.lo <= self.lo && self.hi <= other.hi
    }

    /// Is `self` a subset of the interior of `other`?
    pub fn subset_interior(&self, other: &Interval) -> bool {
        other.lo < self.lo && self.hi < other.hi
    }

    /// The smallest interval containing both arguments.
    pub fn hull(a: Interval, b: Interval) -> Interval {
        Interval {
            lo: a.lo.min(b.lo),
            hi: a.hi.max(b.hi),
        }
    }

    pub fn intersection(a: Interval, b: Interval) -> Option<Interval> {
        let lo = a.lo.max(b.lo);
        let hi = a.hi.min(b.hi);
        if lo <= hi {
            Some(Interval { lo, hi })
        } else {
            None
        }
    }

    /// Splits into the midpoint and a symmetric radius interval [-r, r]
    /// such that mid + [-r, r] contains `self`.
    pub fn split(&self) -> (Interval, Interval) {
        let m = self.mid();
        let r = next_up((m - self.lo).max(self.hi - m)).max(0.0);
        (Interval::point(m), Interval { lo: -r, hi: r })
    }

    /// Inflates by `eps` on both sides (eps >= 0).
    pub fn inflated(&self, eps: f64) -> Interval {
        Interval {
            lo: next_down(self.lo - eps),
            hi: next_up(self.hi + eps),
        }
    }

    /// Multiplication by a point scalar without building an interval first.
    pub fn mul_f64(self, v: f64) -> Interval {
        self * Interval::point(v)
    }

    /// Checked division: `None` when the divisor contains zero.
    pub fn try_div(self, rhs: Interval) -> Option<Interval> {
        if rhs.contains_zero() {
            None
        } else {
            Some(self / rhs)
        }
    }

    /// Rigorous enclosure of exp over the interval.
    pub fn exp(self) -> Interval {
        // libm exp is within 1 ulp; widening by two dominates that.
        let lo = next_down(next_down(self.lo.exp())).max(0.0);
        let hi = next_up(next_up(self.hi.exp()));
        Interval { lo, hi }
    }

    /// Rigorous enclosure of ln over the positive part of the interval.
    /// The lower bound is -inf when the interval reaches zero or below.
    pub fn ln(self) -> Interval {
        let lo = if self.lo > 0.0 {
            next_down(next_down(self.lo.ln()))
        } else {
            f64::NEG_INFINITY
        };
        let hi = if self.hi > 0.0 {
            next_up(next_up(self.hi.ln()))
        } else {
            f64::NEG_INFINITY
        };
        Interval { lo, hi }
    }

    /// Interval power with a natural exponent. Even powers are tightened
    /// through zero: [-2,2]^2 = [0,4], not [-4,4].
    pub fn powi(self, n: usize) -> Interval {
        match n {
            0 => Interval::ONE,
            1 => self,
            _ => {
                if n % 2 == 0 {
                    pos_pow(Interval::new(self.mig(), self.mag()), n)
                } else if self.lo >= 0.0 {
                    pos_pow(self, n)
                } else if self.hi <= 0.0 {
                    -pos_pow(-self, n)
                } else {
                    let neg = pos_pow(Interval::new(0.0, -self.lo), n);
                    let pos = pos_pow(Interval::new(0.0, self.hi), n);
                    Interval {
                        lo: -neg.hi,
                        hi: pos.hi,
                    }
                }
            }
        }
    }
}

/// Binary exponentiation over a nonnegative interval; both endpoint powers
/// are monotone so the interval products keep the bounds outward.
fn pos_pow(x: Interval, n: usize) -> Interval {
    debug_assert!(x.lo >= 0.0);
    let mut r = Interval::ONE;
    let mut base = x;
    let mut k = n;
    while k > 0 {
        if k & 1 == 1 {
            r = r * base;
        }
        base = base * base;
        k >>= 1;
    }
    // x >= 0 so no rounding step can push the lower bound below zero
    // meaningfully, but clamp to keep the sign exact.
    Interval {
        lo: r.lo.max(0.0),
        hi: r.hi,
    }
}

impl Default for Interval {
    fn default() -> Self {
        Interval::ZERO
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lo, self.hi)
    }
}

impl Add for Interval {
    type Output = Interval;
    fn add(self, rhs: Interval) -> Interval {
        Interval {
            lo: add_down(self.lo, rhs.lo),
            hi: add_up(self.hi, rhs.hi),
        }
    }
}

impl Sub for Interval {
    type Output = Interval;
    fn sub(self, rhs: Interval) -> Interval {
        Interval {
            lo: add_down(self.lo, -rhs.hi),
            hi: add_up(self.hi, -rhs.lo),
        }
    }
}

impl Mul for Interval {
    type Output = Interval;
    fn mul(self, rhs: Interval) -> Interval {
        let lo = mul_down(self.lo, rhs.lo)
            .min(mul_down(self.lo, rhs.hi))
            .min(mul_down(self.hi, rhs.lo))
            .min(mul_down(self.hi, rhs.hi));
        let hi = mul_up(self.lo, rhs.lo)
            .max(mul_up(self.lo, rhs.hi))
            .max(mul_up(self.hi, rhs.lo))
            .max(mul_up(self.hi, rhs.hi));
        Interval { lo, hi }
    }
}

impl Div for Interval {
    type Output = Interval;
    fn div(self, rhs: Interval) -> Interval {
        if rhs.contains_zero() {
            return Interval::ENTIRE;
        }
        let lo = div_down(self.lo, rhs.lo)
            .min(div_down(self.lo, rhs.hi))
            .min(div_down(self.hi, rhs.lo))
            .min(div_down(self.hi, rhs.hi));
        let hi = div_up(self.lo, rhs.lo)
            .max(div_up(self.lo, rhs.hi))
            .max(div_up(self.hi, rhs.lo))
            .max(div_up(self.hi, rhs.hi));
        Interval { lo, hi }
    }
}

impl Neg for Interval {
    type Output = Interval;
    fn neg(self) -> Interval {
        Interval {
            lo: -self.hi,
            hi: -self.lo,
        }
    }
}

impl AddAssign for Interval {
    fn add_assign(&mut self, rhs: Interval) {
        *self = *self + rhs;
    }
}

impl SubAssign for Interval {
    fn sub_assign(&mut self, rhs: Interval) {
        *self = *self - rhs;
    }
}

impl MulAssign for Interval {
    fn mul_assign(&mut self, rhs: Interval) {
        *self = *self * rhs;
    }
}

impl DivAssign for Interval {
    fn div_assign(&mut self, rhs: Interval) {
        *self = *self / rhs;
    }
}

impl Zero for Interval {
    fn zero() -> Interval {
        Interval::ZERO
    }
    fn is_zero(&self) -> bool {
        self.lo == 0.0 && self.hi == 0.0
    }
}

impl One for Interval {
    fn one() -> Interval {
        Interval::ONE
    }
}

impl From<f64> for Interval {
    fn from(v: f64) -> Interval {
        Interval::point(v)
    }
}
