use nalgebra::DMatrix;

use crate::error::Result;
use crate::implied::implied_observed;
use crate::model::SemModel;

/// Central differences of the observed implied covariance, one matrix per free parameter.
pub fn sigma_derivatives(model: &SemModel, theta: &[f64]) -> Result<Vec<DMatrix<f64>>> {
    let mut out = Vec::with_capacity(theta.len());
    for j in 0..theta.len() {
        let eps = 1e-6 * theta[j].abs().max(1.0);
        let mut t_plus = theta.to_vec();
        let mut t_minus = theta.to_vec();
        t_plus[j] += eps;
        t_minus[j] -= eps;
        let plus = implied_observed(model, &t_plus)?;
        let minus = implied_observed(model, &t_minus)?;
        out.push((plus - minus) / (2.0 * eps));
    }
    Ok(out)
}

/// Expected information of one observation under normal theory,
/// `I_ab = 1/2 tr(Sigma^-1 D_a Sigma^-1 D_b)`.
pub fn expected_information(derivs: &[DMatrix<f64>], sigma_inv: &DMatrix<f64>) -> DMatrix<f64> {
    let weighted: Vec<DMatrix<f64>> = derivs.iter().map(|d| sigma_inv * d).collect();
    let q = weighted.len();
    let mut info = DMatrix::<f64>::zeros(q, q);
    for a in 0..q {
        for b in a..q {
            let value = 0.5 * weighted[a].component_mul(&weighted[b].transpose()).sum();
            info[(a, b)] = value;
            info[(b, a)] = value;
        }
    }
    info
}

/// Sampling covariance of the free parameters, `(N I)^-1`. `None` when the
/// information matrix is singular.
pub fn parameter_covariance(
    model: &SemModel,
    theta: &[f64],
    sigma_inv: &DMatrix<f64>,
    n_obs: usize,
) -> Result<Option<DMatrix<f64>>> {
    let derivs = sigma_derivatives(model, theta)?;
    let info = expected_information(&derivs, sigma_inv) * n_obs as f64;
    Ok(info.try_inverse())
}

pub fn diag_sqrt(cov: &DMatrix<f64>) -> Vec<f64> {
    cov.diagonal()
        .iter()
        .map(|v| if v.is_finite() && *v >= 0.0 { v.sqrt() } else { f64::NAN })
        .collect()
}
