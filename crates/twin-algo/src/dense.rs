//! Dense linear algebra on top of faer.
//!
//! The networks this engine targets have tens to low hundreds of buses, so
//! every system is assembled densely and factorized with partial-pivot LU.
//! Complex systems are solved through their real 2n×2n embedding
//! `[[G, -B], [B, G]]`, which keeps a single real factorization path.

use faer::prelude::SpSolver;
use faer::{FaerMat, Mat};
use num_complex::Complex64;
use twin_core::{TwinError, TwinResult};

/// Solutions larger than this are treated as coming from a singular matrix.
const SINGULAR_GROWTH: f64 = 1e12;

/// Solve `a · x = b` for a dense real matrix.
pub fn solve_real(a: &[Vec<f64>], b: &[f64]) -> TwinResult<Vec<f64>> {
    let n = b.len();
    if n == 0 {
        return Ok(vec![]);
    }
    if a.len() != n || a.iter().any(|row| row.len() != n) {
        return Err(TwinError::Numerical(format!(
            "matrix shape does not match right-hand side of length {n}"
        )));
    }

    let mut mat = Mat::<f64>::zeros(n, n);
    for (i, row) in a.iter().enumerate() {
        for (j, &value) in row.iter().enumerate() {
            mat.write(i, j, value);
        }
    }
    let mut rhs = Mat::<f64>::zeros(n, 1);
    for (i, &value) in b.iter().enumerate() {
        rhs.write(i, 0, value);
    }

    let lu = mat.partial_piv_lu();
    let solution = lu.solve(&rhs);
    let x: Vec<f64> = (0..n).map(|i| solution.read(i, 0)).collect();

    if x.iter().any(|v| !v.is_finite() || v.abs() > SINGULAR_GROWTH) {
        return Err(TwinError::Numerical("singular matrix".into()));
    }
    Ok(x)
}

/// Invert a dense complex matrix given in row-major order.
pub fn invert_complex(a: &[Complex64], n: usize) -> TwinResult<Vec<Complex64>> {
    if a.len() != n * n {
        return Err(TwinError::Numerical(format!(
            "expected {} entries for a {n}x{n} matrix, got {}",
            n * n,
            a.len()
        )));
    }
    if n == 0 {
        return Ok(vec![]);
    }

    // [[G, -B], [B, G]] · [X; Y] = [I; 0]  gives  (G + jB)(X + jY) = I
    let mut mat = Mat::<f64>::zeros(2 * n, 2 * n);
    for i in 0..n {
        for j in 0..n {
            let y = a[i * n + j];
            mat.write(i, j, y.re);
            mat.write(i, j + n, -y.im);
            mat.write(i + n, j, y.im);
            mat.write(i + n, j + n, y.re);
        }
    }
    let mut rhs = Mat::<f64>::zeros(2 * n, n);
    for k in 0..n {
        rhs.write(k, k, 1.0);
    }

    let lu = mat.partial_piv_lu();
    let solution = lu.solve(&rhs);

    let mut inverse = vec![Complex64::new(0.0, 0.0); n * n];
    for i in 0..n {
        for k in 0..n {
            let z = Complex64::new(solution.read(i, k), solution.read(i + n, k));
            if !z.re.is_finite() || !z.im.is_finite() || z.norm() > SINGULAR_GROWTH {
                return Err(TwinError::Numerical("singular matrix".into()));
            }
            inverse[i * n + k] = z;
        }
    }
    Ok(inverse)
}
