//! Small dense least squares solvers used by the per-pixel regressions

use ndarray::{s, Array1, Array2};

const RANK_TOLERANCE: f64 = 1e-10;

/// Least squares `y = scale * x + offset`; `None` for fewer than two
/// distinct x values
pub(crate) fn linear_fit(pairs: &[(f64, f64)]) -> Option<(f64, f64)> {
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = pairs.iter().map(|p| (p.0 - mx).powi(2)).sum();
    if sxx <= RANK_TOLERANCE * (1.0 + mx.abs()) {
        return None;
    }
    let sxy: f64 = pairs.iter().map(|p| (p.0 - mx) * (p.1 - my)).sum();
    let scale = sxy / sxx;
    Some((scale, my - scale * mx))
}

/// Ordinary least squares through Householder QR
///
/// Returns `None` when there are fewer rows than unknowns or the design is rank
/// deficient.
pub(crate) fn solve(rows: &[Vec<f64>], ys: &[f64]) -> Option<Vec<f64>> {
    let n = rows.len();
    let k = rows.first()?.len();
    if k == 0 || n < k || ys.len() != n {
        return None;
    }

    let mut a = Array2::from_shape_fn((n, k), |(i, j)| rows[i][j]);
    let mut b = Array1::from(ys.to_vec());
    let norms: Vec<f64> = (0..k).map(|j| a.column(j).dot(&a.column(j)).sqrt()).collect();

    for j in 0..k {
        let column = a.slice(s![j.., j]).to_owned();
        let norm = column.dot(&column).sqrt();
        if norm <= RANK_TOLERANCE * norms[j].max(1.0) {
            return None;
        }
        let alpha = if column[0] > 0.0 { -norm } else { norm };
        let mut v = column;
        v[0] -= alpha;
        let vv = v.dot(&v);
        if vv == 0.0 {
            continue;
        }
        for c in j..k {
            let f = 2.0 * v.dot(&a.slice(s![j.., c])) / vv;
            a.slice_mut(s![j.., c]).scaled_add(-f, &v);
        }
        let f = 2.0 * v.dot(&b.slice(s![j..])) / vv;
        b.slice_mut(s![j..]).scaled_add(-f, &v);
    }

    let mut x = vec![0.0; k];
    for j in (0..k).rev() {
        let tail: f64 = (j + 1..k).map(|c| a[[j, c]] * x[c]).sum();
        x[j] = (b[j] - tail) / a[[j, j]];
    }
    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_exact_plane() {
        let rows: Vec<Vec<f64>> = (0..6).map(|i| vec![1.0, i as f64, (i * i) as f64]).collect();
        let ys: Vec<f64> = (0..6).map(|i| 2.0 - 0.5 * i as f64 + 0.25 * (i * i) as f64).collect();
        let beta = solve(&rows, &ys).unwrap();
        assert_relative_eq!(beta[0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(beta[1], -0.5, epsilon = 1e-9);
        assert_relative_eq!(beta[2], 0.25, epsilon = 1e-9);
    }

    #[test]
    fn test_underdetermined_and_collinear() {
        assert!(solve(&[vec![1.0, 2.0]], &[3.0]).is_none());
        let rows = vec![vec![1.0, 2.0], vec![2.0, 4.0], vec![3.0, 6.0]];
        assert!(solve(&rows, &[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn test_linear_fit() {
        let (scale, offset) = linear_fit(&[(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)]).unwrap();
        assert_relative_eq!(scale, 2.0, epsilon = 1e-12);
        assert_relative_eq!(offset, 1.0, epsilon = 1e-12);
        assert!(linear_fit(&[(1.0, 1.0), (1.0, 2.0)]).is_none());
    }
}
