use nalgebra::DMatrix;

use crate::error::{Result, fit_err};
use crate::model::SemModel;

/// Model-implied covariance of all variables, `(I - A)^-1 S (I - A)^-T`.
pub fn implied_covariance(model: &SemModel, theta: &[f64]) -> Result<DMatrix<f64>> {
    let (a, s) = model.build_matrices(theta);
    let n = a.nrows();
    let inv = (DMatrix::<f64>::identity(n, n) - a)
        .try_inverse()
        .ok_or_else(|| fit_err("I - A is singular"))?;
    Ok(&inv * s * inv.transpose())
}

pub fn implied_observed(model: &SemModel, theta: &[f64]) -> Result<DMatrix<f64>> {
    let full = implied_covariance(model, theta)?;
    let k = model.obs_names.len();
    Ok(full.view((0, 0), (k, k)).into_owned())
}
