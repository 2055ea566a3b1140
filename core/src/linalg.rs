//! Fixed-dimension linear algebra for the correction cycle.
//!
//! Every matrix used by the filter carries its shape in its type: the baro observation matrix is a
//! `Matrix<1, 10>`, its Kalman gain a `Matrix<10, 1>`, and so on. Multiplying non-conformant shapes is
//! a compile error, so nothing in this module checks dimensions at runtime.
//!
//! Public API:
//!     pub fn from_rows(rows) -> Matrix<R, C>
//!     pub fn scalar_reciprocal(m) -> Option<Matrix<1, 1>>
//!     pub fn invert_innovation(s) -> Option<Matrix<D, D>>
//!     pub fn quadratic_form(r, s_inv) -> f64
//!     pub fn symmetrize(m) / is_symmetric(m, tol)
//!     pub fn joseph_update(p, k, h, r) / subtractive_update(p, k, h)
//!
//! Covariance update strategy:
//! 1) Joseph form P ← (I − KH) P (I − KH)ᵀ + K R Kᵀ (stays PSD under round-off)
//! 2) Symmetrize P ← ½ (P + Pᵀ)

use nalgebra::{SMatrix, SVector};

/// Row-by-column matrix of `f64` with compile-time dimensions.
pub type Matrix<const R: usize, const C: usize> = SMatrix<f64, R, C>;
/// Column vector of `f64` with a compile-time length.
pub type Vector<const N: usize> = SVector<f64, N>;

/// Build a matrix from a row-major literal.
///
/// The outer array holds the rows, so `from_rows([[1.0, 2.0], [3.0, 4.0]])[(1, 0)] == 3.0`. Both
/// dimensions are taken from the literal's type.
///
/// # Arguments
/// * `rows` - `R` rows of `C` values each
///
/// # Returns
/// The matrix with `m[(i, j)] == rows[i][j]`.
pub fn from_rows<const R: usize, const C: usize>(rows: [[f64; C]; R]) -> Matrix<R, C> {
    Matrix::<R, C>::from_fn(|i, j| rows[i][j])
}

/// Reciprocal of a scalar innovation; `None` for zero or non-finite values.
fn reciprocal(value: f64) -> Option<f64> {
    if value == 0.0 || !value.is_finite() {
        return None;
    }
    Some(1.0 / value)
}

/// Reciprocal of a 1×1 matrix.
///
/// This is the inversion used by scalar sensors in place of a general matrix inverse.
///
/// # Returns
/// `None` if the single entry is zero or not finite.
pub fn scalar_reciprocal(m: &Matrix<1, 1>) -> Option<Matrix<1, 1>> {
    reciprocal(m[(0, 0)]).map(Matrix::<1, 1>::new)
}

/// Invert an innovation covariance `S`.
///
/// One-dimensional innovations take the same reciprocal as [scalar_reciprocal]. Larger ones are
/// symmetrized and inverted through a Cholesky factorization; `S = H P Hᵀ + R` is symmetric positive
/// definite whenever `R` is.
///
/// # Arguments
/// * `s` - the innovation covariance
///
/// # Returns
/// `None` if `s` is not invertible (zero, non-finite, or not positive definite).
pub fn invert_innovation<const D: usize>(s: &Matrix<D, D>) -> Option<Matrix<D, D>> {
    if D == 1 {
        return reciprocal(s[(0, 0)]).map(Matrix::<D, D>::from_element);
    }
    let inverse = symmetrize(s).cholesky()?.inverse();
    if inverse.iter().all(|v| v.is_finite()) {
        Some(inverse)
    } else {
        None
    }
}

/// Scalar quadratic form `rᵀ · M · r`.
///
/// With `M = S⁻¹` this is the normalized innovation squared used as the fault statistic `beta`.
#[inline]
pub fn quadratic_form<const D: usize>(r: &Vector<D>, m: &Matrix<D, D>) -> f64 {
    (r.transpose() * m * r)[(0, 0)]
}

/// Symmetrize a matrix: P ← ½ (P + Pᵀ)
///
/// Removes the asymmetry that accumulates from floating point round-off.
#[inline]
pub fn symmetrize<const N: usize>(m: &Matrix<N, N>) -> Matrix<N, N> {
    (m + m.transpose()) * 0.5
}

/// Check that `m` equals its transpose to within `tolerance` (max absolute difference).
pub fn is_symmetric<const N: usize>(m: &Matrix<N, N>, tolerance: f64) -> bool {
    (m - m.transpose()).amax() <= tolerance
}

/// Joseph-form covariance update, symmetrized.
///
/// P⁺ = (I − K H) P (I − K H)ᵀ + K R Kᵀ
///
/// Algebraically equal to the subtractive form for the optimal gain, but the sum of two PSD terms
/// cannot lose positive semi-definiteness to round-off.
///
/// # Arguments
/// * `p` - prior covariance
/// * `k` - Kalman gain
/// * `h` - observation matrix
/// * `r` - measurement noise covariance
pub fn joseph_update<const N: usize, const D: usize>(
    p: &Matrix<N, N>,
    k: &Matrix<N, D>,
    h: &Matrix<D, N>,
    r: &Matrix<D, D>,
) -> Matrix<N, N> {
    let i_kh = Matrix::<N, N>::identity() - k * h;
    symmetrize(&(i_kh * p * i_kh.transpose() + k * r * k.transpose()))
}

/// Subtractive covariance update: P⁺ = P − K H P
pub fn subtractive_update<const N: usize, const D: usize>(
    p: &Matrix<N, N>,
    k: &Matrix<N, D>,
    h: &Matrix<D, N>,
) -> Matrix<N, N> {
    symmetrize(&(p - k * h * p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::SymmetricEigen;

    const EPS: f64 = 1e-12;

    fn spd3() -> Matrix<3, 3> {
        from_rows([[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]])
    }

    #[test]
    fn from_rows_fills_row_major() {
        let m: Matrix<2, 3> = from_rows([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(m[(0, 0)], 1.0);
        assert_eq!(m[(0, 2)], 3.0);
        assert_eq!(m[(1, 0)], 4.0);
        assert_eq!(m[(1, 2)], 6.0);
    }

    #[test]
    fn column_literal_transposes_to_row() {
        let column: Matrix<10, 1> = Matrix::<10, 1>::from_fn(|i, _| (i + 1) as f64);
        let row: Matrix<1, 10> = column.transpose();
        for j in 0..10 {
            assert_eq!(row[(0, j)], (j + 1) as f64);
        }
        assert_eq!(row.transpose(), column);
    }

    #[test]
    fn transpose_round_trip() {
        let m: Matrix<3, 4> = Matrix::<3, 4>::from_fn(|i, j| (i * 7 + j * 3) as f64 - 4.5);
        assert_eq!(m.transpose().transpose(), m);
    }

    #[test]
    fn column_times_scalar_matrix() {
        let a: Matrix<10, 1> = Matrix::<10, 1>::from_fn(|i, _| (i + 1) as f64);
        let b = Matrix::<1, 1>::new(10.0);
        let result = a * b;
        for i in 0..10 {
            assert_eq!(result[(i, 0)], 10.0 * (i + 1) as f64);
        }
    }

    #[test]
    fn scalar_inversion_rejects_zero_and_non_finite() {
        let inv = invert_innovation(&Matrix::<1, 1>::new(4.0)).unwrap();
        assert_approx_eq!(inv[(0, 0)], 0.25, EPS);
        assert!(invert_innovation(&Matrix::<1, 1>::new(0.0)).is_none());
        assert!(invert_innovation(&Matrix::<1, 1>::new(f64::NAN)).is_none());
        assert!(invert_innovation(&Matrix::<1, 1>::new(f64::INFINITY)).is_none());
    }

    #[test]
    fn scalar_reciprocal_values() {
        let r = scalar_reciprocal(&Matrix::<1, 1>::new(4.0)).unwrap();
        assert_approx_eq!(r[(0, 0)], 0.25, EPS);
        assert!(scalar_reciprocal(&Matrix::<1, 1>::new(0.0)).is_none());
        assert!(scalar_reciprocal(&Matrix::<1, 1>::new(f64::NAN)).is_none());
    }

    #[test]
    fn invert_innovation_scalar_matches_reciprocal() {
        let s = Matrix::<1, 1>::new(2.5);
        let inv = invert_innovation(&s).unwrap();
        assert_approx_eq!(inv[(0, 0)], 0.4, EPS);
    }

    #[test]
    fn invert_innovation_general_spd() {
        let s = spd3();
        let inv = invert_innovation(&s).unwrap();
        let product = s * inv;
        let identity = Matrix::<3, 3>::identity();
        assert!((product - identity).amax() < 1e-10);
    }

    #[test]
    fn invert_innovation_rejects_indefinite() {
        let s: Matrix<2, 2> = from_rows([[1.0, 0.0], [0.0, -1.0]]);
        assert!(invert_innovation(&s).is_none());
    }

    #[test]
    fn quadratic_form_scalar_and_vector() {
        let r = Vector::<1>::new(3.0);
        let s_inv = Matrix::<1, 1>::new(0.5);
        assert_approx_eq!(quadratic_form(&r, &s_inv), 4.5, EPS);

        let r3 = Vector::<3>::new(1.0, 2.0, 3.0);
        let m = Matrix::<3, 3>::identity() * 2.0;
        assert_approx_eq!(quadratic_form(&r3, &m), 28.0, EPS);
    }

    #[test]
    fn symmetrize_makes_symmetric() {
        let m: Matrix<2, 2> = from_rows([[1.0, 2.0], [4.0, 3.0]]);
        let s = symmetrize(&m);
        assert!(is_symmetric(&s, EPS));
        assert_approx_eq!(s[(0, 1)], 3.0, EPS);
        assert!(!is_symmetric(&m, EPS));
    }

    #[test]
    fn innovation_covariance_is_symmetric() {
        let p = spd3();
        let h: Matrix<2, 3> = from_rows([[1.0, 0.0, -1.0], [0.3, 2.0, 0.0]]);
        let r: Matrix<2, 2> = from_rows([[0.5, 0.0], [0.0, 0.25]]);
        let s = h * p * h.transpose() + r;
        assert!(is_symmetric(&s, 1e-12));
    }

    #[test]
    fn joseph_matches_subtractive_for_optimal_gain() {
        let p = spd3();
        let h: Matrix<1, 3> = from_rows([[0.0, 0.0, -1.0]]);
        let r = Matrix::<1, 1>::new(1.0);
        let s = h * p * h.transpose() + r;
        let k = p * h.transpose() * invert_innovation(&s).unwrap();

        let joseph = joseph_update(&p, &k, &h, &r);
        let plain = subtractive_update(&p, &k, &h);
        assert!((joseph - plain).amax() < 1e-12);
    }

    #[test]
    fn joseph_keeps_covariance_psd() {
        let p = spd3() * 1e-6;
        let h: Matrix<1, 3> = from_rows([[1.0, 1.0, 1.0]]);
        let r = Matrix::<1, 1>::new(1e-9);
        let s = h * p * h.transpose() + r;
        let k = p * h.transpose() * invert_innovation(&s).unwrap();

        let updated = joseph_update(&p, &k, &h, &r);
        assert!(is_symmetric(&updated, 0.0));
        let eig = SymmetricEigen::new(updated);
        assert!(eig.eigenvalues.iter().all(|&l| l > -1e-18));
    }
}
