use ndarray::Array2;
use tracing::instrument;

use crate::{AlignedToken, Alignment};

/// Unit-cost edit distance between `a` and `b` with one optimal alignment.
///
/// Several minimum-cost paths can exist. Backtracking from the bottom-right
/// cell always prefers, in order: a deletion (`a[i-1]` against a gap), an
/// insertion (a gap against `b[j-1]`), then the diagonal. The order is an
/// arbitrary convention, but it is fixed because confusion counts depend on it.
#[instrument(level = "trace", skip_all, fields(a = a.len(), b = b.len()))]
pub fn align<T: PartialEq + Clone>(a: &[T], b: &[T]) -> Alignment<T> {
    let (n, m) = (a.len(), b.len());
    let mut dp = Array2::<usize>::zeros((n + 1, m + 1));
    for i in 0..=n {
        dp[[i, 0]] = i;
    }
    for j in 0..=m {
        dp[[0, j]] = j;
    }
    for i in 1..=n {
        for j in 1..=m {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            dp[[i, j]] = (dp[[i - 1, j]] + 1)
                .min(dp[[i, j - 1]] + 1)
                .min(dp[[i - 1, j - 1]] + cost);
        }
    }

    let (mut i, mut j) = (n, m);
    let mut aligned_a = Vec::with_capacity(n.max(m));
    let mut aligned_b = Vec::with_capacity(n.max(m));
    while i > 0 || j > 0 {
        if i > 0 && dp[[i, j]] == dp[[i - 1, j]] + 1 {
            aligned_a.push(AlignedToken::Token(a[i - 1].clone()));
            aligned_b.push(AlignedToken::Gap);
            i -= 1;
        } else if j > 0 && dp[[i, j]] == dp[[i, j - 1]] + 1 {
            aligned_a.push(AlignedToken::Gap);
            aligned_b.push(AlignedToken::Token(b[j - 1].clone()));
            j -= 1;
        } else {
            // Both borders are pure deletion/insertion, so a diagonal step is
            // only reached with i > 0 and j > 0.
            aligned_a.push(AlignedToken::Token(a[i - 1].clone()));
            aligned_b.push(AlignedToken::Token(b[j - 1].clone()));
            i -= 1;
            j -= 1;
        }
    }
    aligned_a.reverse();
    aligned_b.reverse();

    Alignment {
        distance: dp[[n, m]],
        aligned_a,
        aligned_b,
    }
}
