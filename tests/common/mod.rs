#![allow(dead_code)]

use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

pub const ONE_FACTOR: &str = "f =~ y1 + y2 + y3 + y4";

pub const MEDIATION: &str = "
    # measurement
    ksi =~ x1 + x2 + x3
    eta =~ y1 + y2 + y3
    # structural
    eta ~ ksi
";

/// Four indicators of one standard normal factor.
pub fn one_factor_frame(n: usize, seed: u64) -> DataFrame {
    let mut rng = StdRng::seed_from_u64(seed);
    let loadings = [1.0, 0.8, 0.6, 0.7];
    let mut cols = vec![Vec::with_capacity(n); loadings.len()];
    for _ in 0..n {
        let f: f64 = rng.sample(StandardNormal);
        for (col, l) in cols.iter_mut().zip(loadings) {
            let e: f64 = rng.sample(StandardNormal);
            col.push(l * f + 0.5 * e);
        }
    }
    df!(
        "y1" => cols[0].clone(),
        "y2" => cols[1].clone(),
        "y3" => cols[2].clone(),
        "y4" => cols[3].clone(),
    )
    .expect("frame")
}

/// Two factors with three indicators each; `eta = 0.6 * ksi + zeta`.
pub fn two_factor_frame(n: usize, seed: u64) -> DataFrame {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut cols = vec![Vec::with_capacity(n); 6];
    for _ in 0..n {
        let ksi: f64 = rng.sample(StandardNormal);
        let zeta: f64 = rng.sample(StandardNormal);
        let eta = 0.6 * ksi + 0.8 * zeta;
        for (j, col) in cols.iter_mut().enumerate() {
            let factor = if j < 3 { ksi } else { eta };
            let loading = [1.0, 0.9, 0.7][j % 3];
            let e: f64 = rng.sample(StandardNormal);
            col.push(loading * factor + 0.5 * e);
        }
    }
    df!(
        "x1" => cols[0].clone(),
        "x2" => cols[1].clone(),
        "x3" => cols[2].clone(),
        "y1" => cols[3].clone(),
        "y2" => cols[4].clone(),
        "y3" => cols[5].clone(),
    )
    .expect("frame")
}
