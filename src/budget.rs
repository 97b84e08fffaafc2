//! Information-budget math.
//!
//! The pure numerical kernel behind every verdict: Bernoulli KL
//! divergence in bits, the required/observed budget computation, gap
//! classification, and the adjusted-confidence formula. Everything here
//! is deterministic and side-effect free.
//!
//! The central quantity is the budget gap:
//!
//! ```text
//! required = KL(target || p0)    bits needed to reach the stated confidence
//! observed = KL(p1 || p0)        bits the evidence actually moved the estimate
//! gap      = required - observed
//! ```
//!
//! A positive gap means the evidence supplies less information than the
//! claim's stated confidence demands.

use crate::types::{BudgetResult, Verdict};

/// Clamp bound applied inside the KL kernel to avoid log singularities.
const KL_EPS: f64 = 1e-10;

/// Clamp bounds applied to probabilities entering the budget computation.
const P_MIN: f64 = 0.01;
const P_MAX: f64 = 0.99;

/// Bernoulli KL divergence D(p || q) in bits.
///
/// Inputs are clamped to `[1e-10, 1 - 1e-10]` before computation, so the
/// result is always finite. `kl_bits(p, p) == 0` and `kl_bits(p, q) >= 0`
/// for all inputs (Gibbs' inequality).
pub fn kl_bits(p: f64, q: f64) -> f64 {
    let p = p.clamp(KL_EPS, 1.0 - KL_EPS);
    let q = q.clamp(KL_EPS, 1.0 - KL_EPS);
    p * (p / q).log2() + (1.0 - p) * ((1.0 - p) / (1.0 - q)).log2()
}

/// Compute the information budget for one claim.
///
/// `p0` is the pseudo-prior (probability with evidence scrubbed), `p1`
/// the posterior (probability with full evidence), and `target` the
/// confidence the claim states. All three are clamped to `[0.01, 0.99]`.
pub fn compute_budget(p0: f64, p1: f64, target: f64) -> BudgetResult {
    let p0 = p0.clamp(P_MIN, P_MAX);
    let p1 = p1.clamp(P_MIN, P_MAX);
    let target = target.clamp(P_MIN, P_MAX);

    let required_bits = kl_bits(target, p0);
    let observed_bits = kl_bits(p1, p0);
    let gap = required_bits - observed_bits;

    let verdict = classify(p0, p1, gap);
    let adjusted_confidence = adjusted_confidence(p1, target, required_bits, observed_bits);

    BudgetResult {
        p0,
        p1,
        target,
        required_bits,
        observed_bits,
        gap,
        verdict,
        adjusted_confidence,
    }
}

/// Gap classification. The rule order is part of the contract: the
/// contradiction checks run before any gap comparison, and the narrow
/// "high posterior, small overshoot" window is carved out of the
/// Unsupported range.
fn classify(p0: f64, p1: f64, gap: f64) -> Verdict {
    if p1 < 0.3 && p0 > 0.5 {
        return Verdict::Contradicted;
    }
    if p1 < 0.2 {
        return Verdict::Contradicted;
    }
    if gap > 0.0 {
        if gap > 2.0 {
            return Verdict::Unsupported;
        }
        if p1 > 0.7 && gap < 1.0 {
            return Verdict::Grounded;
        }
        return Verdict::Unsupported;
    }
    Verdict::Grounded
}

/// Confidence the caller should carry forward.
///
/// When nothing is required the posterior stands as-is. Otherwise the
/// target is scaled by the fraction of the requirement the evidence met,
/// and the posterior acts as a ceiling.
fn adjusted_confidence(p1: f64, target: f64, required: f64, observed: f64) -> f64 {
    if required <= 0.0 {
        return p1;
    }
    let ratio = (observed / required).min(1.0);
    p1.min(target * ratio).clamp(0.0, 1.0)
}

/// Conservative gap range over probability intervals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetInterval {
    /// Smallest gap consistent with the intervals (max observed, min required)
    pub gap_best: f64,
    /// Largest gap consistent with the intervals (min observed, max required)
    pub gap_worst: f64,
    pub required_lo: f64,
    pub required_hi: f64,
    pub observed_lo: f64,
    pub observed_hi: f64,
}

impl BudgetInterval {
    /// Flag only when even the best case leaves a positive gap.
    pub fn should_flag(&self) -> bool {
        self.gap_best > 0.0
    }
}

/// Interval variant of [`compute_budget`]: given bounds on p0 and p1,
/// compute the conservative gap range over the interval corners.
pub fn compute_budget_interval(
    p0_lo: f64,
    p0_hi: f64,
    p1_lo: f64,
    p1_hi: f64,
    target: f64,
) -> BudgetInterval {
    let p0_lo = p0_lo.clamp(P_MIN, P_MAX);
    let p0_hi = p0_hi.clamp(P_MIN, P_MAX);
    let p1_lo = p1_lo.clamp(P_MIN, P_MAX);
    let p1_hi = p1_hi.clamp(P_MIN, P_MAX);
    let target = target.clamp(P_MIN, P_MAX);

    let req_a = kl_bits(target, p0_lo);
    let req_b = kl_bits(target, p0_hi);
    let (required_lo, required_hi) = (req_a.min(req_b), req_a.max(req_b));

    let corners = [
        kl_bits(p1_lo, p0_lo),
        kl_bits(p1_lo, p0_hi),
        kl_bits(p1_hi, p0_lo),
        kl_bits(p1_hi, p0_hi),
    ];
    let observed_lo = corners.iter().cloned().fold(f64::INFINITY, f64::min);
    let observed_hi = corners.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    BudgetInterval {
        gap_best: required_lo - observed_hi,
        gap_worst: required_hi - observed_lo,
        required_lo,
        required_hi,
        observed_lo,
        observed_hi,
    }
}

/// Map a budget gap to a trust score in (0, 1): `1 / (1 + e^gap)`.
///
/// Zero gap maps to 0.5; large positive gaps approach 0, large negative
/// gaps approach 1.
pub fn trust_from_gap(gap: f64) -> f64 {
    1.0 / (1.0 + gap.exp())
}

/// Severity of a finding in [0, 1].
///
/// Grounded claims have no severity; Unsupported severity grows
/// monotonically with the gap but stays below the Contradicted ceiling.
pub fn severity(verdict: Verdict, gap: f64) -> f64 {
    match verdict {
        Verdict::Grounded => 0.0,
        Verdict::Unverifiable => 0.25,
        Verdict::Unsupported => {
            let g = gap.max(0.0);
            0.5 + 0.4 * g / (g + 2.0)
        }
        Verdict::Contradicted => 1.0,
    }
}
