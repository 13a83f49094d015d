//! Maximum likelihood structural equation modeling over lavaan-style model
//! descriptions and polars data frames.
//!
//! ```no_run
//! # fn demo(data: &polars::prelude::DataFrame) -> sem_engine::Result<()> {
//! let mut model = sem_engine::Model::new("f =~ y1 + y2 + y3")?;
//! model.fit(data)?;
//! let estimates = model.inspect()?;
//! let stats = sem_engine::calc_stats(&model)?;
//! # Ok(())
//! # }
//! ```

pub mod data;
pub mod error;
pub mod fit;
pub mod implied;
mod inspect;
mod linalg;
pub mod model;
pub mod parser;
pub mod se;
pub mod standardize;
pub mod stats;
pub mod types;

pub use error::{Result, SemError};
pub use fit::Model;
pub use stats::calc_stats;
pub use types::*;
