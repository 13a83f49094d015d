use std::cell::Cell;

use nalgebra::DMatrix;
use nlopt::{Algorithm, FailState, Nlopt, SuccessState, Target, approximate_gradient};
use polars::prelude::DataFrame;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{debug, warn};

use crate::data::SampleMoments;
use crate::error::{Result, SemError, fit_err};
use crate::implied::{implied_covariance, implied_observed};
use crate::linalg::spd_logdet_inverse;
use crate::model::SemModel;
use crate::parser::parse_model;
use crate::se::{diag_sqrt, parameter_covariance};
use crate::standardize::std_all;
use crate::types::{DefinedEstimate, FitOptions, FitSummary, ParamEstimate};

/// A structural equation model built from a lavaan-style description.
///
/// Construction parses and lays out the model; [`Model::fit`] estimates it
/// by maximum likelihood. Results are only available after a successful fit.
#[derive(Debug, Clone)]
pub struct Model {
    options: FitOptions,
    layout: SemModel,
    fitted: Option<Fitted>,
}

#[derive(Debug, Clone)]
pub(crate) struct Fitted {
    pub layout: SemModel,
    pub moments: SampleMoments,
    pub theta: Vec<f64>,
    pub vcov: DMatrix<f64>,
    pub sigma_obs: DMatrix<f64>,
    pub sigma_full: DMatrix<f64>,
    pub sigma_inv: DMatrix<f64>,
    pub logdet_sigma: f64,
    pub logdet_s: f64,
    pub fmin: f64,
    pub summary: FitSummary,
}

impl Model {
    pub fn new(description: &str) -> Result<Model> {
        Self::with_options(description, FitOptions::default())
    }

    pub fn with_options(description: &str, options: FitOptions) -> Result<Model> {
        let spec = parse_model(description)?;
        let layout = SemModel::from_spec(&spec, &options)?;
        debug!(
            "model: observed={:?}, latent={:?}, free={}",
            layout.obs_names,
            layout.latent_names,
            layout.free.len()
        );
        Ok(Model {
            options,
            layout,
            fitted: None,
        })
    }

    pub fn observed(&self) -> &[String] {
        &self.layout.obs_names
    }

    pub fn latent(&self) -> &[String] {
        &self.layout.latent_names
    }

    pub fn n_free(&self) -> usize {
        self.layout.free.len()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Estimates the model on `data`. Every observed variable must be a column.
    pub fn fit(&mut self, data: &DataFrame) -> Result<FitSummary> {
        self.fitted = None;
        let moments = SampleMoments::from_frame(data, &self.layout.obs_names)?;
        let fitted = estimate(&self.layout, moments, &self.options)?;
        let summary = fitted.summary.clone();
        self.fitted = Some(fitted);
        Ok(summary)
    }

    pub(crate) fn fitted(&self) -> Result<&Fitted> {
        self.fitted.as_ref().ok_or(SemError::NotFitted)
    }

    pub fn params(&self) -> Result<Vec<ParamEstimate>> {
        let fitted = self.fitted()?;
        let layout = &fitted.layout;
        let se = diag_sqrt(&fitted.vcov);
        let std = std_all(layout, &fitted.theta, &fitted.sigma_full);
        let normal = standard_normal();

        let mut out = Vec::with_capacity(layout.slots.len());
        for pos in layout.report_order() {
            let slot = &layout.slots[pos];
            let est = slot.value(&fitted.theta);
            let se_val = (slot.free_idx > 0).then(|| se[slot.free_idx - 1]);
            let z = se_val.map(|se| est / se);
            out.push(ParamEstimate {
                lhs: slot.lhs.clone(),
                op: slot.op.symbol().to_string(),
                rhs: slot.rhs.clone(),
                label: slot.label.clone(),
                free: slot.free_idx,
                est,
                se: se_val,
                z,
                p_value: z.map(|z| two_sided_p(&normal, z)),
                est_std_all: std.get(pos).copied(),
            });
        }
        Ok(out)
    }

    /// Values of `:=` parameters with delta-method standard errors.
    pub fn defined_params(&self) -> Result<Vec<DefinedEstimate>> {
        let fitted = self.fitted()?;
        let layout = &fitted.layout;
        let theta = &fitted.theta;

        let mut values = layout.label_values(theta);
        let mut out = Vec::with_capacity(layout.defined.len());
        for def in &layout.defined {
            let est = def.expr.eval(&values);
            let mut grad = vec![0.0; theta.len()];
            for (i, g) in grad.iter_mut().enumerate() {
                let eps = 1e-6 * theta[i].abs().max(1.0);
                let mut t_plus = theta.clone();
                let mut t_minus = theta.clone();
                t_plus[i] += eps;
                t_minus[i] -= eps;
                let f_plus = eval_with(layout, def, &t_plus, &out);
                let f_minus = eval_with(layout, def, &t_minus, &out);
                *g = (f_plus - f_minus) / (2.0 * eps);
            }
            let grad = DMatrix::from_column_slice(grad.len(), 1, &grad);
            let var = (grad.transpose() * &fitted.vcov * &grad)[(0, 0)];
            let se = if var.is_finite() && var >= 0.0 { var.sqrt() } else { f64::NAN };
            values.insert(def.name.clone(), est);
            out.push(DefinedEstimate {
                name: def.name.clone(),
                expr: def.source.clone(),
                est,
                se,
            });
        }
        Ok(out)
    }
}

fn eval_with(
    layout: &SemModel,
    def: &crate::parser::Defined,
    theta: &[f64],
    earlier: &[DefinedEstimate],
) -> f64 {
    let mut values = layout.label_values(theta);
    // Earlier definitions are re-evaluated so chained definitions differentiate correctly.
    for (prev, done) in layout.defined.iter().zip(earlier) {
        let v = prev.expr.eval(&values);
        values.insert(done.name.clone(), v);
    }
    def.expr.eval(&values)
}

pub(crate) fn standard_normal() -> Normal {
    Normal::standard()
}

pub(crate) fn two_sided_p(normal: &Normal, z: f64) -> f64 {
    if z.is_finite() {
        2.0 * (1.0 - normal.cdf(z.abs()))
    } else {
        f64::NAN
    }
}

struct ObjData<'a> {
    model: &'a SemModel,
    s: &'a DMatrix<f64>,
    logdet_s: f64,
    evals: Cell<usize>,
}

/// Maximum likelihood discrepancy `log|Sigma| + tr(S Sigma^-1) - log|S| - p`.
fn ml_objective(theta: &[f64], data: &ObjData<'_>) -> f64 {
    let sigma = match implied_observed(data.model, theta) {
        Ok(s) => s,
        Err(_) => return f64::INFINITY,
    };
    let Some((logdet, inv)) = spd_logdet_inverse(&sigma) else {
        return f64::INFINITY;
    };
    let trace = (data.s * &inv).trace();
    let f = logdet + trace - data.logdet_s - data.s.nrows() as f64;
    if f.is_finite() { f } else { f64::INFINITY }
}

fn estimate(layout: &SemModel, moments: SampleMoments, options: &FitOptions) -> Result<Fitted> {
    let mut layout = layout.clone();
    layout.bind_sample(&moments.cov);

    let k = moments.cov.nrows();
    let moments_left = k * (k + 1) / 2 - layout.sample_fixed_count();
    let npar = layout.free.len();
    if npar > moments_left {
        return Err(fit_err(format!(
            "model is not identified: {npar} free parameters but only {moments_left} sample moments"
        )));
    }

    let (logdet_s, _) = spd_logdet_inverse(&moments.cov)
        .ok_or_else(|| fit_err("sample covariance matrix is not positive definite"))?;

    let mut theta = layout.theta_start(&moments.cov);
    let mut warnings = Vec::new();

    let obj_data = ObjData {
        model: &layout,
        s: &moments.cov,
        logdet_s,
        evals: Cell::new(0),
    };

    let (converged, evaluations) = if theta.is_empty() {
        (true, 0)
    } else {
        let obj = |x: &[f64], grad: Option<&mut [f64]>, data: &mut ObjData| -> f64 {
            data.evals.set(data.evals.get() + 1);
            let f = ml_objective(x, data);
            if let Some(g) = grad {
                approximate_gradient(x, |x| ml_objective(x, data), g);
            }
            f
        };

        let (lower, upper) = layout.bounds();
        let mut opt = Nlopt::new(Algorithm::Slsqp, theta.len(), obj, Target::Minimize, obj_data);
        let _ = opt.set_ftol_rel(options.tolerance);
        let _ = opt.set_maxeval(options.max_evaluations);
        if let Some(lb) = lower {
            let _ = opt.set_lower_bounds(&lb);
        }
        if let Some(ub) = upper {
            let _ = opt.set_upper_bounds(&ub);
        }

        let result = opt.optimize(&mut theta);
        let evaluations = opt.recover_user_data().evals.get();
        let converged = match result {
            Ok((SuccessState::MaxEvalReached | SuccessState::MaxTimeReached, _)) => false,
            Ok(_) => true,
            // SLSQP reports this when the objective stops improving at the optimum.
            Err((FailState::RoundoffLimited, _)) => true,
            Err((fail, _)) => return Err(fit_err(format!("optimizer failed: {fail:?}"))),
        };
        (converged, evaluations)
    };
    if !converged {
        let msg = format!("model has not converged after {evaluations} evaluations");
        warn!("{msg}");
        warnings.push(msg);
    }

    let check = ObjData {
        model: &layout,
        s: &moments.cov,
        logdet_s,
        evals: Cell::new(0),
    };
    let fmin = ml_objective(&theta, &check);
    if !fmin.is_finite() {
        return Err(fit_err(
            "estimation failed: model-implied covariance matrix is not positive definite",
        ));
    }
    debug!("fit: evaluations={evaluations}, fmin={fmin}, converged={converged}");

    let sigma_full = implied_covariance(&layout, &theta)?;
    let sigma_obs = implied_observed(&layout, &theta)?;
    let (logdet_sigma, sigma_inv) = spd_logdet_inverse(&sigma_obs)
        .ok_or_else(|| fit_err("model-implied covariance matrix is not positive definite"))?;

    let vcov = match parameter_covariance(&layout, &theta, &sigma_inv, moments.n_obs)? {
        Some(v) => v,
        None => {
            let msg = "information matrix is singular; standard errors are unavailable".to_string();
            warn!("{msg}");
            warnings.push(msg);
            DMatrix::from_element(npar, npar, f64::NAN)
        }
    };

    let summary = FitSummary {
        converged,
        evaluations,
        fmin,
        n_obs: moments.n_obs,
        npar,
        warnings,
    };

    Ok(Fitted {
        layout,
        moments,
        theta,
        vcov,
        sigma_obs,
        sigma_full,
        sigma_inv,
        logdet_sigma,
        logdet_s,
        fmin,
        summary,
    })
}
