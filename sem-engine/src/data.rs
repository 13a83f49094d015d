use nalgebra::DMatrix;
use polars::prelude::*;
use tracing::debug;

use crate::error::{Result, SemError, fit_err};

/// Biased sample covariance of the complete rows of the observed columns.
#[derive(Debug, Clone)]
pub struct SampleMoments {
    pub n_obs: usize,
    pub cov: DMatrix<f64>,
}

impl SampleMoments {
    pub fn from_frame(data: &DataFrame, names: &[String]) -> Result<SampleMoments> {
        let mut columns: Vec<Vec<Option<f64>>> = Vec::with_capacity(names.len());
        for name in names {
            let column = data
                .column(name)
                .map_err(|_| SemError::MissingColumn(name.clone()))?;
            let series = column
                .as_materialized_series()
                .strict_cast(&DataType::Float64)
                .map_err(|_| SemError::NonNumericColumn(name.clone()))?;
            columns.push(series.f64()?.into_iter().collect());
        }

        let complete: Vec<usize> = (0..data.height())
            .filter(|&row| columns.iter().all(|c| c[row].is_some_and(f64::is_finite)))
            .collect();
        let n = complete.len();
        let dropped = data.height() - n;
        if dropped > 0 {
            debug!("dropped {dropped} incomplete rows");
        }
        if n < 2 {
            return Err(fit_err(format!("need at least 2 complete rows, found {n}")));
        }

        let k = names.len();
        let values = DMatrix::from_fn(n, k, |i, j| columns[j][complete[i]].unwrap_or(f64::NAN));
        let means = values.row_mean();
        let centered = DMatrix::from_fn(n, k, |i, j| values[(i, j)] - means[j]);
        let cov = centered.transpose() * &centered / n as f64;

        Ok(SampleMoments {
            n_obs: n,
            cov,
        })
    }
}
