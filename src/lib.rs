//! Fit structural equation models with `sem-engine` and print the results.
//!
//! [`run`] builds, fits and summarises a model in one call; [`print_results`]
//! renders the returned [`ResultRecord`].

pub mod error;
pub mod io;
pub mod logging;
pub mod printer;
pub mod record;
pub mod runner;

pub use error::{Error, Result};
pub use printer::{print_results, render_table, write_results};
pub use record::{ResultRecord, ResultRecordBuilder};
pub use runner::{run, run_with_options};
pub use sem_engine::{FitOptions, FitStats};
