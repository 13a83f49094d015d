use std::collections::{HashMap, HashSet};

use nalgebra::DMatrix;

use crate::error::{Result, spec_err};
use crate::parser::{BoundOp, Defined, Modifier, ModelSpec, Operator};
use crate::types::FitOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatKind {
    /// Directed paths: loadings and regressions.
    A,
    /// Variances and covariances.
    S,
}

#[derive(Debug, Clone)]
pub struct ParamSlot {
    pub lhs: String,
    pub op: Operator,
    pub rhs: String,
    pub kind: MatKind,
    pub row: usize,
    pub col: usize,
    pub symmetric: bool,
    pub free_idx: usize,
    pub fixed: Option<f64>,
    pub label: Option<String>,
    pub start: Option<f64>,
    /// Fixed to the sample (co)variance once data is bound.
    pub sample_fixed: bool,
}

impl ParamSlot {
    fn new(
        lhs: &str,
        op: Operator,
        rhs: &str,
        kind: MatKind,
        row: usize,
        col: usize,
        modifier: Modifier,
    ) -> ParamSlot {
        let (fixed, label, start) = match modifier {
            Modifier::Fixed(v) => (Some(v), None, None),
            Modifier::Label(l) => (None, Some(l), None),
            Modifier::Start(v) => (None, None, Some(v)),
            Modifier::Free | Modifier::Default => (None, None, None),
        };
        ParamSlot {
            lhs: lhs.to_string(),
            op,
            rhs: rhs.to_string(),
            kind,
            row,
            col,
            symmetric: false,
            free_idx: 0,
            fixed,
            label,
            start,
            sample_fixed: false,
        }
    }

    fn with_symmetric(mut self, symmetric: bool) -> Self {
        self.symmetric = symmetric;
        self
    }

    fn fixed_to_sample(mut self) -> Self {
        self.sample_fixed = true;
        self.fixed = Some(f64::NAN);
        self
    }

    pub fn key(&self) -> String {
        format!("{} {} {}", self.lhs, self.op.symbol(), self.rhs)
    }

    fn same_cell(&self, other: &ParamSlot) -> bool {
        self.kind == other.kind
            && ((self.row == other.row && self.col == other.col)
                || (self.kind == MatKind::S && self.row == other.col && self.col == other.row))
    }

    pub fn value(&self, theta: &[f64]) -> f64 {
        if self.free_idx > 0 {
            theta.get(self.free_idx - 1).copied().unwrap_or(f64::NAN)
        } else {
            self.fixed.unwrap_or(f64::NAN)
        }
    }
}

#[derive(Debug, Clone)]
pub struct FreeParam {
    pub label: Option<String>,
    pub start: Option<f64>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    /// First slot that carries this parameter; drives the default start value.
    pub slot: usize,
}

/// RAM layout of a model: observed variables first, then latent ones.
#[derive(Debug, Clone)]
pub struct SemModel {
    pub var_names: Vec<String>,
    pub obs_names: Vec<String>,
    pub latent_names: Vec<String>,
    pub slots: Vec<ParamSlot>,
    pub free: Vec<FreeParam>,
    pub label_map: HashMap<String, usize>,
    pub defined: Vec<Defined>,
}

impl SemModel {
    pub fn from_spec(spec: &ModelSpec, options: &FitOptions) -> Result<SemModel> {
        if spec.relations.is_empty() {
            return Err(spec_err("model description contains no relations"));
        }

        let mut latent_names: Vec<String> = Vec::new();
        for rel in spec.relations.iter().filter(|r| r.op == Operator::Measure) {
            if !latent_names.contains(&rel.lhs) {
                latent_names.push(rel.lhs.clone());
            }
        }

        let mut obs_names: Vec<String> = Vec::new();
        for rel in &spec.relations {
            let names = std::iter::once(&rel.lhs).chain(rel.terms.iter().map(|t| &t.var));
            for name in names {
                if !latent_names.contains(name) && !obs_names.contains(name) {
                    obs_names.push(name.clone());
                }
            }
        }

        let var_names: Vec<String> = obs_names.iter().chain(&latent_names).cloned().collect();
        let index: HashMap<&str, usize> = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut slots: Vec<ParamSlot> = Vec::new();
        let mut marked: HashSet<usize> = HashSet::new();

        for rel in &spec.relations {
            let lhs = index[rel.lhs.as_str()];
            for term in &rel.terms {
                let rhs = index[term.var.as_str()];
                let slot = match rel.op {
                    Operator::Measure => {
                        if lhs == rhs {
                            return Err(spec_err(format!("factor {} cannot measure itself", rel.lhs)));
                        }
                        let first = marked.insert(lhs);
                        let modifier = if first && term.modifier == Modifier::Default && !options.std_lv
                        {
                            Modifier::Fixed(1.0)
                        } else {
                            term.modifier.clone()
                        };
                        ParamSlot::new(&rel.lhs, rel.op, &term.var, MatKind::A, rhs, lhs, modifier)
                    }
                    Operator::Regress => {
                        if lhs == rhs {
                            return Err(spec_err(format!(
                                "variable {} cannot be regressed on itself",
                                rel.lhs
                            )));
                        }
                        ParamSlot::new(
                            &rel.lhs,
                            rel.op,
                            &term.var,
                            MatKind::A,
                            lhs,
                            rhs,
                            term.modifier.clone(),
                        )
                    }
                    Operator::Covary => ParamSlot::new(
                        &rel.lhs,
                        rel.op,
                        &term.var,
                        MatKind::S,
                        lhs,
                        rhs,
                        term.modifier.clone(),
                    )
                    .with_symmetric(lhs != rhs),
                };
                if slots.iter().any(|s| s.same_cell(&slot)) {
                    return Err(spec_err(format!(
                        "parameter {} is specified more than once",
                        slot.key()
                    )));
                }
                slots.push(slot);
            }
        }

        let has_incoming: HashSet<usize> = slots
            .iter()
            .filter(|s| s.kind == MatKind::A)
            .map(|s| s.row)
            .collect();

        // Observed regression predictors without incoming paths.
        let mut exog_obs: Vec<usize> = Vec::new();
        for slot in slots.iter().filter(|s| s.op == Operator::Regress) {
            if slot.col < obs_names.len()
                && !has_incoming.contains(&slot.col)
                && !exog_obs.contains(&slot.col)
            {
                exog_obs.push(slot.col);
            }
        }
        exog_obs.sort_unstable();

        // A predictor named in an explicit `~~` keeps its moments free.
        let user_covaried: HashSet<usize> = slots
            .iter()
            .filter(|s| s.kind == MatKind::S)
            .flat_map(|s| [s.row, s.col])
            .collect();
        let fixed_x: Vec<usize> = if options.fixed_x {
            exog_obs
                .iter()
                .copied()
                .filter(|idx| !user_covaried.contains(idx))
                .collect()
        } else {
            Vec::new()
        };

        for (idx, name) in var_names.iter().enumerate() {
            let has_var = slots
                .iter()
                .any(|s| s.kind == MatKind::S && s.row == idx && s.col == idx);
            if has_var {
                continue;
            }
            let is_latent = idx >= obs_names.len();
            let slot = if fixed_x.contains(&idx) {
                ParamSlot::new(name, Operator::Covary, name, MatKind::S, idx, idx, Modifier::Default)
                    .fixed_to_sample()
            } else if is_latent && options.std_lv {
                ParamSlot::new(name, Operator::Covary, name, MatKind::S, idx, idx, Modifier::Fixed(1.0))
            } else {
                ParamSlot::new(name, Operator::Covary, name, MatKind::S, idx, idx, Modifier::Default)
            };
            slots.push(slot);
        }

        let exog_latents: Vec<usize> = (obs_names.len()..var_names.len())
            .filter(|idx| !has_incoming.contains(idx))
            .collect();
        add_missing_covariances(&mut slots, &var_names, &exog_latents, false);
        add_missing_covariances(&mut slots, &var_names, &fixed_x, true);
        add_missing_covariances(&mut slots, &var_names, &exog_obs, false);

        let (free, label_map) = assign_free_params(&mut slots);

        let mut model = SemModel {
            var_names,
            obs_names,
            latent_names,
            slots,
            free,
            label_map,
            defined: spec.defined.clone(),
        };
        model.apply_bounds(spec)?;
        model.check_defined()?;
        Ok(model)
    }

    fn apply_bounds(&mut self, spec: &ModelSpec) -> Result<()> {
        for bound in &spec.bounds {
            let idx = *self.label_map.get(&bound.target).ok_or_else(|| {
                spec_err(format!("bound on unknown parameter label {}", bound.target))
            })?;
            let free = &mut self.free[idx - 1];
            match bound.op {
                BoundOp::Gt | BoundOp::Ge => free.lower = Some(bound.value),
                BoundOp::Lt | BoundOp::Le => free.upper = Some(bound.value),
                BoundOp::Eq => {
                    free.lower = Some(bound.value);
                    free.upper = Some(bound.value);
                }
            }
        }
        Ok(())
    }

    fn check_defined(&self) -> Result<()> {
        let mut known: HashSet<&str> = self.label_map.keys().map(String::as_str).collect();
        for def in &self.defined {
            if known.contains(def.name.as_str()) {
                return Err(spec_err(format!("{} is defined more than once", def.name)));
            }
            if let Some(unknown) = def.expr.variables().into_iter().find(|v| !known.contains(v)) {
                return Err(spec_err(format!(
                    "defined parameter {} references unknown label {unknown}",
                    def.name
                )));
            }
            known.insert(def.name.as_str());
        }
        Ok(())
    }

    /// Writes sample (co)variances into the slots that take them from data.
    pub fn bind_sample(&mut self, cov: &DMatrix<f64>) {
        for slot in self.slots.iter_mut().filter(|s| s.sample_fixed) {
            slot.fixed = Some(cov[(slot.row, slot.col)]);
        }
    }

    /// Number of moments reproduced exactly by sample-fixed slots.
    pub fn sample_fixed_count(&self) -> usize {
        self.slots.iter().filter(|s| s.sample_fixed).count()
    }

    /// Observed variables whose variance is taken from the sample.
    pub fn fixed_x(&self) -> Vec<usize> {
        self.slots
            .iter()
            .filter(|s| s.sample_fixed && s.row == s.col)
            .map(|s| s.row)
            .collect()
    }

    pub fn theta_start(&self, cov: &DMatrix<f64>) -> Vec<f64> {
        let k = self.obs_names.len();
        self.free
            .iter()
            .map(|f| {
                let start = f.start.unwrap_or_else(|| {
                    let slot = &self.slots[f.slot];
                    match (slot.op, slot.row == slot.col) {
                        (Operator::Measure, _) => 1.0,
                        (Operator::Regress, _) => 0.0,
                        (Operator::Covary, true) if slot.row < k => 0.5 * cov[(slot.row, slot.row)],
                        (Operator::Covary, true) => 0.05,
                        (Operator::Covary, false) => 0.0,
                    }
                });
                let start = f.lower.map_or(start, |l| start.max(l));
                f.upper.map_or(start, |u| start.min(u))
            })
            .collect()
    }

    pub fn bounds(&self) -> (Option<Vec<f64>>, Option<Vec<f64>>) {
        let lower: Vec<f64> = self
            .free
            .iter()
            .map(|f| f.lower.unwrap_or(f64::NEG_INFINITY))
            .collect();
        let upper: Vec<f64> = self
            .free
            .iter()
            .map(|f| f.upper.unwrap_or(f64::INFINITY))
            .collect();
        let any_lower = self.free.iter().any(|f| f.lower.is_some());
        let any_upper = self.free.iter().any(|f| f.upper.is_some());
        (any_lower.then_some(lower), any_upper.then_some(upper))
    }

    pub fn build_matrices(&self, theta: &[f64]) -> (DMatrix<f64>, DMatrix<f64>) {
        let n = self.var_names.len();
        let mut a = DMatrix::<f64>::zeros(n, n);
        let mut s = DMatrix::<f64>::zeros(n, n);
        for slot in &self.slots {
            let value = slot.value(theta);
            match slot.kind {
                MatKind::A => a[(slot.row, slot.col)] = value,
                MatKind::S => {
                    s[(slot.row, slot.col)] = value;
                    if slot.symmetric {
                        s[(slot.col, slot.row)] = value;
                    }
                }
            }
        }
        (a, s)
    }

    /// Values of every labelled parameter at `theta`.
    pub fn label_values(&self, theta: &[f64]) -> HashMap<String, f64> {
        self.label_map
            .iter()
            .map(|(label, &idx)| (label.clone(), theta.get(idx - 1).copied().unwrap_or(f64::NAN)))
            .collect()
    }

    /// Slot indices in report order: loadings, regressions, then (co)variances.
    pub fn report_order(&self) -> Vec<usize> {
        let k = self.obs_names.len();
        let mut order: Vec<usize> = (0..self.slots.len()).collect();
        order.sort_by_key(|&i| {
            let slot = &self.slots[i];
            match slot.op {
                Operator::Measure => (0, 0, slot.col, slot.row),
                Operator::Regress => (1, 0, slot.row, slot.col),
                Operator::Covary => {
                    let lo = slot.row.min(slot.col);
                    let hi = slot.row.max(slot.col);
                    let group = match (lo >= k, hi >= k) {
                        (true, true) => 0,
                        (false, false) => 1,
                        _ => 2,
                    };
                    (2, group, lo, hi)
                }
            }
        });
        order
    }
}

fn add_missing_covariances(
    slots: &mut Vec<ParamSlot>,
    var_names: &[String],
    members: &[usize],
    from_sample: bool,
) {
    for (i, &row) in members.iter().enumerate() {
        for &col in &members[i + 1..] {
            let has_cov = slots.iter().any(|s| {
                s.kind == MatKind::S
                    && ((s.row == row && s.col == col) || (s.row == col && s.col == row))
            });
            if has_cov {
                continue;
            }
            let slot = ParamSlot::new(
                &var_names[row],
                Operator::Covary,
                &var_names[col],
                MatKind::S,
                row,
                col,
                Modifier::Default,
            )
            .with_symmetric(true);
            slots.push(if from_sample { slot.fixed_to_sample() } else { slot });
        }
    }
}

fn assign_free_params(slots: &mut [ParamSlot]) -> (Vec<FreeParam>, HashMap<String, usize>) {
    let mut free: Vec<FreeParam> = Vec::new();
    let mut label_map: HashMap<String, usize> = HashMap::new();

    for (pos, slot) in slots.iter_mut().enumerate() {
        if slot.fixed.is_some() {
            slot.free_idx = 0;
            continue;
        }
        if let Some(label) = &slot.label
            && let Some(&idx) = label_map.get(label)
        {
            slot.free_idx = idx;
            if free[idx - 1].start.is_none() {
                free[idx - 1].start = slot.start;
            }
            continue;
        }
        free.push(FreeParam {
            label: slot.label.clone(),
            start: slot.start,
            lower: None,
            upper: None,
            slot: pos,
        });
        slot.free_idx = free.len();
        if let Some(label) = &slot.label {
            label_map.insert(label.clone(), slot.free_idx);
        }
    }

    (free, label_map)
}
