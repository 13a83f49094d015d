use nalgebra::DMatrix;

/// Log-determinant and inverse of a symmetric positive definite matrix.
pub fn spd_logdet_inverse(matrix: &DMatrix<f64>) -> Option<(f64, DMatrix<f64>)> {
    let chol = matrix.clone().cholesky()?;
    let logdet = 2.0 * chol.l_dirty().diagonal().iter().map(|v| v.ln()).sum::<f64>();
    if !logdet.is_finite() {
        return None;
    }
    Some((logdet, chol.inverse()))
}

pub fn cov2cor(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    let sd: Vec<f64> = matrix
        .diagonal()
        .iter()
        .map(|v| if *v > 0.0 { v.sqrt() } else { 0.0 })
        .collect();
    DMatrix::from_fn(matrix.nrows(), matrix.ncols(), |i, j| {
        let denom = sd[i] * sd[j];
        if denom != 0.0 { matrix[(i, j)] / denom } else { 0.0 }
    })
}
