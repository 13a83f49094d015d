#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    pub tolerance: f64,
    pub max_evaluations: u32,
    pub std_lv: bool,
    pub fixed_x: bool,
    pub std_est: bool,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_evaluations: 5000,
            std_lv: false,
            fixed_x: true,
            std_est: false,
        }
    }
}

/// One row of the parameter table. Fixed parameters carry no standard error.
#[derive(Debug, Clone)]
pub struct ParamEstimate {
    pub lhs: String,
    pub op: String,
    pub rhs: String,
    pub label: Option<String>,
    pub free: usize,
    pub est: f64,
    pub se: Option<f64>,
    pub z: Option<f64>,
    pub p_value: Option<f64>,
    pub est_std_all: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct DefinedEstimate {
    pub name: String,
    pub expr: String,
    pub est: f64,
    pub se: f64,
}

#[derive(Debug, Clone)]
pub struct FitSummary {
    pub converged: bool,
    pub evaluations: usize,
    pub fmin: f64,
    pub n_obs: usize,
    pub npar: usize,
    pub warnings: Vec<String>,
}

/// Named fit statistics in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitStats {
    entries: Vec<(String, f64)>,
}

impl FitStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: f64) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for FitStats {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        }
    }
}
