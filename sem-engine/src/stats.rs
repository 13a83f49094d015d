use std::f64::consts::PI;

use nalgebra::DMatrix;
use statrs::distribution::{ChiSquared, ContinuousCDF};
use tracing::debug;

use crate::error::Result;
use crate::fit::Model;
use crate::linalg::{cov2cor, spd_logdet_inverse};
use crate::types::FitStats;

/// Fit statistics of a fitted model.
///
/// `chi2` is `N * F_ml` against the saturated model; the baseline is the
/// independence model. Moments of sample-fixed covariates count towards
/// neither model's degrees of freedom. Values that are
/// undefined for the model (for example RMSEA with zero degrees of freedom)
/// are NaN.
pub fn calc_stats(model: &Model) -> Result<FitStats> {
    let fitted = model.fitted()?;
    let s = &fitted.moments.cov;
    let n = fitted.moments.n_obs as f64;
    let k = s.nrows();
    let p_star = (k * (k + 1) / 2) as f64;
    let npar = fitted.summary.npar as f64;
    let fixed = fitted.layout.sample_fixed_count() as f64;

    let dof = p_star - fixed - npar;
    let chi2 = (n * fitted.fmin).max(0.0);
    let p_value = chi2_p_value(chi2, dof);

    let xs = fitted.layout.fixed_x();
    let dof_base = p_star - fixed - (k - xs.len()) as f64;
    let chi2_base = (n * baseline_discrepancy(s, &xs, fitted.logdet_s)).max(0.0);
    debug!("stats: k={k}, dof={dof}, chi2={chi2}, dof_base={dof_base}, chi2_base={chi2_base}");

    let excess = (chi2 - dof).max(0.0);
    let excess_base = (chi2_base - dof_base).max(excess);
    let cfi = if excess_base > 0.0 { 1.0 - excess / excess_base } else { 1.0 };
    let nfi = if chi2_base > 0.0 { (chi2_base - chi2) / chi2_base } else { f64::NAN };
    let tli = if dof > 0.0 && dof_base > 0.0 {
        let ratio_base = chi2_base / dof_base;
        (ratio_base - chi2 / dof) / (ratio_base - 1.0)
    } else {
        f64::NAN
    };

    let gfi = compute_gfi(&fitted.sigma_inv, s);
    let agfi = if dof > 0.0 { 1.0 - p_star / dof * (1.0 - gfi) } else { f64::NAN };
    let rmsea = if dof > 0.0 && n > 1.0 {
        (excess / (dof * (n - 1.0))).sqrt()
    } else {
        f64::NAN
    };
    let srmr = compute_srmr(s, &fitted.sigma_obs);

    let trace = (s * &fitted.sigma_inv).trace();
    let loglik = -0.5 * n * (k as f64 * (2.0 * PI).ln() + fitted.logdet_sigma + trace);
    let aic = 2.0 * npar - 2.0 * loglik;
    let bic = npar * n.ln() - 2.0 * loglik;

    Ok(FitStats::from_iter([
        ("DoF", dof),
        ("DoF Baseline", dof_base),
        ("chi2", chi2),
        ("chi2 p-value", p_value),
        ("chi2 Baseline", chi2_base),
        ("CFI", cfi),
        ("GFI", gfi),
        ("AGFI", agfi),
        ("NFI", nfi),
        ("TLI", tli),
        ("RMSEA", rmsea),
        ("SRMR", srmr),
        ("AIC", aic),
        ("BIC", bic),
        ("LogLik", loglik),
    ]))
}

/// Discrepancy of the independence model: observed variances only, with the
/// covariances among sample-fixed covariates kept.
fn baseline_discrepancy(s: &DMatrix<f64>, xs: &[usize], logdet_s: f64) -> f64 {
    let k = s.nrows();
    let base = DMatrix::from_fn(k, k, |i, j| {
        if i == j || (xs.contains(&i) && xs.contains(&j)) {
            s[(i, j)]
        } else {
            0.0
        }
    });
    match spd_logdet_inverse(&base) {
        Some((logdet, inv)) => logdet + (s * &inv).trace() - logdet_s - k as f64,
        None => f64::NAN,
    }
}

fn chi2_p_value(chi2: f64, dof: f64) -> f64 {
    if dof <= 0.0 {
        return f64::NAN;
    }
    ChiSquared::new(dof).map_or(f64::NAN, |dist| 1.0 - dist.cdf(chi2))
}

fn compute_gfi(sigma_inv: &DMatrix<f64>, s: &DMatrix<f64>) -> f64 {
    let m = sigma_inv * s;
    let resid = &m - DMatrix::<f64>::identity(m.nrows(), m.ncols());
    let denom = (&m * &m).trace();
    if denom == 0.0 {
        return f64::NAN;
    }
    1.0 - (&resid * &resid).trace() / denom
}

fn compute_srmr(s: &DMatrix<f64>, sigma: &DMatrix<f64>) -> f64 {
    let r_obs = cov2cor(s);
    let r_hat = cov2cor(sigma);
    let k = r_obs.nrows();
    let mut sum = 0.0;
    let mut count = 0.0;
    for i in 0..k {
        for j in 0..=i {
            let diff = r_obs[(i, j)] - r_hat[(i, j)];
            sum += diff * diff;
            count += 1.0;
        }
    }
    if count == 0.0 { f64::NAN } else { (sum / count).sqrt() }
}
