//! Skewed index sampling.

use rand::Rng;

/// Samples an index in `[0, n)` biased toward 0.
///
/// One uniform draw `m` in `[1, n]` is mapped through
/// `n - 1 - floor(n * ln(m) / ln(n + 1))`. Because `ln` is concave, most of the
/// draws land near the top of `[1, n]` and therefore near index 0.
///
/// # Panics
///
/// Panics if `n` is zero.
#[must_use]
#[allow(clippy::cast_precision_loss)] // Key ranges are far below 2^52.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)] // ln(m) / ln(n + 1) is in [0, 1).
pub fn sample_skewed<R: Rng + ?Sized>(rng: &mut R, n: usize) -> usize {
    assert!(n > 0, "sample range must be non-empty");
    let m = rng.gen_range(1..=n) as f64;
    let len = n as f64;
    let offset = (len * m.ln() / (len + 1.0).ln()).floor() as usize;
    // offset < n for every m <= n; min() guards float rounding.
    n - 1 - offset.min(n - 1)
}
