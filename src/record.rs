use polars::prelude::DataFrame;
use sem_engine::FitStats;

use crate::error::{Error, Result};

/// Parameter table and fit statistics of one fitted model.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    estimates: DataFrame,
    stats: FitStats,
}

impl ResultRecord {
    pub fn builder() -> ResultRecordBuilder {
        ResultRecordBuilder::default()
    }

    pub fn estimates(&self) -> &DataFrame {
        &self.estimates
    }

    pub fn stats(&self) -> &FitStats {
        &self.stats
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResultRecordBuilder {
    estimates: Option<DataFrame>,
    stats: Option<FitStats>,
}

impl ResultRecordBuilder {
    pub fn estimates(mut self, estimates: DataFrame) -> Self {
        self.estimates = Some(estimates);
        self
    }

    pub fn stats(mut self, stats: FitStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn build(self) -> Result<ResultRecord> {
        Ok(ResultRecord {
            estimates: self.estimates.ok_or(Error::MissingField("estimates"))?,
            stats: self.stats.ok_or(Error::MissingField("stats"))?,
        })
    }
}
