use nalgebra::DMatrix;

use crate::model::{MatKind, SemModel};

/// Completely standardized value of every slot, aligned with `model.slots`.
pub fn std_all(model: &SemModel, theta: &[f64], sigma_full: &DMatrix<f64>) -> Vec<f64> {
    let sd: Vec<f64> = sigma_full
        .diagonal()
        .iter()
        .map(|v| if *v > 0.0 { v.sqrt() } else { 0.0 })
        .collect();

    model
        .slots
        .iter()
        .map(|slot| {
            let value = slot.value(theta);
            let (numer, denom) = match slot.kind {
                MatKind::A => (sd[slot.col], sd[slot.row]),
                MatKind::S => (1.0, sd[slot.row] * sd[slot.col]),
            };
            if denom != 0.0 { value * numer / denom } else { f64::NAN }
        })
        .collect()
}
