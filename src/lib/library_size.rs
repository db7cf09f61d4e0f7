//! Library complexity estimation from duplication counts.

use crate::errors::{MarkdupsError, Result};

/// Estimate the number of unique molecules in a library.
///
/// Given `read_pairs` observed pairs of which `unique_read_pairs` were
/// distinct, solves `c/x - 1 + exp(-n/x) = 0` for the library size by
/// bisection on the multiplier `x = m * c`. The bracket `[1, M]` is expanded
/// until it contains the root, then halved for 40 iterations, which puts the
/// relative error well under 1e-10.
pub fn estimate_library_size(read_pairs: u64, unique_read_pairs: u64) -> Result<u64> {
    let n = read_pairs as f64;
    let c = unique_read_pairs as f64;

    if unique_read_pairs > read_pairs {
        return Err(MarkdupsError::Math {
            reason: format!(
                "unique read pairs ({unique_read_pairs}) exceeds total read pairs ({read_pairs})"
            ),
        });
    }
    // Without any duplicate pairs the saturation curve has no finite root.
    if read_pairs == 0 || unique_read_pairs == 0 || read_pairs == unique_read_pairs || f(c, c, n) < 0.0
    {
        return Err(MarkdupsError::Math {
            reason: format!(
                "no root for read pairs = {read_pairs}, unique read pairs = {unique_read_pairs}"
            ),
        });
    }

    let mut lo = 1.0f64;
    let mut hi = 100.0f64;
    while f(hi * c, c, n) > 0.0 {
        hi *= 10.0;
    }

    for _ in 0..40 {
        let mid = (lo + hi) / 2.0;
        let value = f(mid * c, c, n);
        if value == 0.0 {
            lo = mid;
            hi = mid;
            break;
        } else if value > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    Ok((c * (lo + hi) / 2.0) as u64)
}

/// The saturation identity: `c/x - 1 + exp(-n/x)`.
fn f(x: f64, c: f64, n: f64) -> f64 {
    c / x - 1.0 + (-n / x).exp()
}
