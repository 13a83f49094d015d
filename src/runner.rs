use polars::prelude::DataFrame;
use sem_engine::{FitOptions, Model, calc_stats};
use tracing::{debug, warn};

use crate::error::Result;
use crate::record::ResultRecord;

/// Builds the model described by `model_spec`, fits it to `data` and collects
/// the parameter table and fit statistics.
pub fn run(data: &DataFrame, model_spec: &str) -> Result<ResultRecord> {
    run_with_options(data, model_spec, &FitOptions::default())
}

pub fn run_with_options(
    data: &DataFrame,
    model_spec: &str,
    options: &FitOptions,
) -> Result<ResultRecord> {
    let mut model = Model::with_options(model_spec, options.clone())?;
    let summary = model.fit(data)?;
    debug!(
        "fitted {} parameters on {} rows in {} evaluations",
        summary.npar, summary.n_obs, summary.evaluations
    );
    if !summary.converged {
        warn!("results come from a model that did not converge");
    }

    let estimates = if options.std_est {
        model.inspect_std()?
    } else {
        model.inspect()?
    };
    let stats = calc_stats(&model)?;

    ResultRecord::builder()
        .estimates(estimates)
        .stats(stats)
        .build()
}
