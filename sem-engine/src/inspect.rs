use polars::prelude::*;

use crate::error::Result;
use crate::fit::{Model, standard_normal, two_sided_p};

impl Model {
    /// Parameter table: `lval`, `op`, `rval`, `Estimate`, `Std. Err`,
    /// `z-value`, `p-value`. Fixed parameters have null standard errors.
    pub fn inspect(&self) -> Result<DataFrame> {
        self.inspect_frame(false)
    }

    /// [`Model::inspect`] plus a completely standardized `Est. Std` column.
    pub fn inspect_std(&self) -> Result<DataFrame> {
        self.inspect_frame(true)
    }

    fn inspect_frame(&self, with_std: bool) -> Result<DataFrame> {
        let params = self.params()?;
        let defined = self.defined_params()?;
        let normal = standard_normal();

        let rows = params.len() + defined.len();
        let mut lval = Vec::with_capacity(rows);
        let mut op = Vec::with_capacity(rows);
        let mut rval = Vec::with_capacity(rows);
        let mut est = Vec::with_capacity(rows);
        let mut se = Vec::with_capacity(rows);
        let mut z = Vec::with_capacity(rows);
        let mut p = Vec::with_capacity(rows);
        let mut std = Vec::with_capacity(rows);

        for row in &params {
            lval.push(row.lhs.clone());
            op.push(row.op.clone());
            rval.push(row.rhs.clone());
            est.push(row.est);
            se.push(row.se);
            z.push(row.z);
            p.push(row.p_value);
            std.push(row.est_std_all);
        }
        for row in &defined {
            let z_val = row.est / row.se;
            lval.push(row.name.clone());
            op.push(":=".to_string());
            rval.push(row.expr.clone());
            est.push(row.est);
            se.push(Some(row.se));
            z.push(Some(z_val));
            p.push(Some(two_sided_p(&normal, z_val)));
            std.push(None);
        }

        let mut frame = df!(
            "lval" => lval,
            "op" => op,
            "rval" => rval,
            "Estimate" => est,
            "Std. Err" => se,
            "z-value" => z,
            "p-value" => p,
        )?;
        if with_std {
            frame.with_column(Column::new("Est. Std".into(), std))?;
        }
        Ok(frame)
    }
}
