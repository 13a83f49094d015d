use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use sem_engine::parser::{Modifier, Operator, parse_expr, parse_model};
use sem_engine::{FitOptions, Model, SemError, calc_stats};

fn one_factor_frame(n: usize, seed: u64) -> DataFrame {
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

fn regression_frame(n: usize, seed: u64) -> DataFrame {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut x = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    for _ in 0..n {
        let xv: f64 = rng.sample(StandardNormal);
        let e: f64 = rng.sample(StandardNormal);
        x.push(xv);
        y.push(0.5 * xv + e);
    }
    df!("x" => x, "y" => y).expect("frame")
}

fn estimate_of(frame: &DataFrame, lval: &str, op: &str, rval: &str) -> f64 {
    let lvals = frame.column("lval").unwrap().str().unwrap().clone();
    let ops = frame.column("op").unwrap().str().unwrap().clone();
    let rvals = frame.column("rval").unwrap().str().unwrap().clone();
    let est = frame.column("Estimate").unwrap().f64().unwrap().clone();
    for i in 0..frame.height() {
        if lvals.get(i) == Some(lval) && ops.get(i) == Some(op) && rvals.get(i) == Some(rval) {
            return est.get(i).unwrap();
        }
    }
    panic!("no row {lval} {op} {rval}");
}

#[test]
fn parse_model_smoke() {
    let spec = parse_model("f1 =~ y1 + 0.5*y2\n y2 ~ f1\n y1 ~~ y2").expect("parse model");
    assert_eq!(spec.relations.len(), 3);
    assert!(spec.bounds.is_empty());
    assert_eq!(spec.relations[0].op, Operator::Measure);
    assert_eq!(spec.relations[0].terms[1].modifier, Modifier::Fixed(0.5));
}

#[test]
fn parse_modifiers_bounds_and_definitions() {
    let desc = "
        # measurement
        f =~ y1 + a*y2 + start(0.7)*y3 + NA*y4   // trailing comment
        y5, y6 ~ -0.25*f; a > 0
        ab := a^2 * 2 + sqrt(a)
    ";
    let spec = parse_model(desc).expect("parse");
    assert_eq!(spec.relations.len(), 3);
    let terms = &spec.relations[0].terms;
    assert_eq!(terms[0].modifier, Modifier::Default);
    assert_eq!(terms[1].modifier, Modifier::Label("a".to_string()));
    assert_eq!(terms[2].modifier, Modifier::Start(0.7));
    assert_eq!(terms[3].modifier, Modifier::Free);
    assert_eq!(spec.relations[1].lhs, "y5");
    assert_eq!(spec.relations[2].lhs, "y6");
    assert_eq!(spec.relations[2].terms[0].modifier, Modifier::Fixed(-0.25));
    assert_eq!(spec.bounds.len(), 1);
    assert_eq!(spec.defined.len(), 1);
    assert_eq!(spec.defined[0].expr.variables(), vec!["a"]);

    let spec = parse_model("y ~ .5*x1 + -.25*x2 + 1e-1*x3\n b > .5").expect("parse");
    let terms = &spec.relations[0].terms;
    assert_eq!(terms[0].modifier, Modifier::Fixed(0.5));
    assert_eq!(terms[1].modifier, Modifier::Fixed(-0.25));
    assert_eq!(terms[2].modifier, Modifier::Fixed(0.1));
    assert_eq!(spec.bounds[0].value, 0.5);

    // fixed slope, free residual variance
    let model = Model::new("y ~ .5*x").expect("model");
    assert_eq!(model.n_free(), 1);
}

#[test]
fn parse_errors_point_at_the_input() {
    let err = parse_model("not a valid spec @@@").expect_err("invalid");
    let message = err.to_string();
    assert!(message.contains("column"), "{message}");
    assert!(!message.contains("None"), "{message}");

    let err = parse_model("f =~").expect_err("truncated");
    assert!(err.to_string().contains("end of input"), "{err}");
}

#[test]
fn expression_precedence() {
    let vars = [("a".to_string(), 2.0), ("b".to_string(), 3.0)]
        .into_iter()
        .collect();
    let cases = [
        ("a + b * 2", 8.0),
        ("(a + b) * 2", 10.0),
        ("2 ^ 3 ^ 2", 512.0),
        ("-a ^ 2", -4.0),
        ("b - a - 1", 0.0),
        ("pow(a, 3) / 4", 2.0),
        ("abs(a - b)", 1.0),
    ];
    for (source, expected) in cases {
        let expr = parse_expr(source).expect(source);
        assert!((expr.eval(&vars) - expected).abs() < 1e-12, "{source}");
    }
}

#[test]
fn invalid_description_is_a_specification_error() {
    for desc in ["not a valid spec @@@", "f =~", "y ~ 1", "", "# only comments\n"] {
        let err = Model::new(desc).expect_err(desc);
        assert!(matches!(err, SemError::Specification(_)), "{desc}: {err}");
    }
}

#[test]
fn inconsistent_description_is_a_specification_error() {
    let cases = [
        "f =~ y1 + y2\n b > 0",
        "f =~ y1 + a*y2\n d := a * c",
        "y ~ x\n y ~ x",
        "f =~ f + y1",
        "y ~ y",
        "f =~ y1 + y2\n ab := exp2(1)",
    ];
    for desc in cases {
        let err = Model::new(desc).expect_err(desc);
        assert!(matches!(err, SemError::Specification(_)), "{desc}: {err}");
    }
}

#[test]
fn default_parameters() {
    let model = Model::new("f =~ y1 + y2 + y3 + y4").expect("model");
    assert_eq!(model.observed(), ["y1", "y2", "y3", "y4"]);
    assert_eq!(model.latent(), ["f"]);
    // three loadings, four residual variances, one factor variance
    assert_eq!(model.n_free(), 8);

    let two = Model::new("f1 =~ y1 + y2 + y3\n f2 =~ y4 + y5 + y6").expect("model");
    // 4 loadings + 6 residuals + 2 factor variances + 1 factor covariance
    assert_eq!(two.n_free(), 13);

    let std_lv = FitOptions {
        std_lv: true,
        ..FitOptions::default()
    };
    let model = Model::with_options("f =~ y1 + y2 + y3 + y4", std_lv).expect("model");
    assert_eq!(model.n_free(), 8);
}

#[test]
fn exogenous_covariates_follow_fixed_x() {
    let fixed = Model::new("y ~ x1 + x2").expect("model");
    assert_eq!(fixed.n_free(), 3);

    let free = FitOptions {
        fixed_x: false,
        ..FitOptions::default()
    };
    let model = Model::with_options("y ~ x1 + x2", free).expect("model");
    assert_eq!(model.n_free(), 6);
}

#[test]
fn explicit_covariance_frees_an_exogenous_covariate() {
    let mut rng = StdRng::seed_from_u64(13);
    let n = 400;
    let (mut x1, mut x2, mut y) = (Vec::new(), Vec::new(), Vec::new());
    for _ in 0..n {
        let a: f64 = rng.sample(StandardNormal);
        let b: f64 = rng.sample(StandardNormal);
        let e: f64 = rng.sample(StandardNormal);
        x1.push(a);
        x2.push(0.3 * a + b);
        y.push(0.4 * a - 0.2 * b + e);
    }
    let data = df!("y" => y, "x1" => x1, "x2" => x2).unwrap();

    // slopes, residual, var(x1) and cov(x1, x2) free; var(x2) from the sample
    let mut model = Model::new("y ~ x1 + x2\n x1 ~~ x1").expect("model");
    assert_eq!(model.n_free(), 5);
    model.fit(&data).expect("fit");
    let table = model.inspect().expect("inspect");
    let se = table.column("Std. Err").unwrap().f64().unwrap().clone();
    let rows: Vec<(Option<&str>, Option<&str>)> = (0..table.height())
        .map(|i| {
            (
                table.column("lval").unwrap().str().unwrap().get(i),
                table.column("rval").unwrap().str().unwrap().get(i),
            )
        })
        .collect();
    let cov_row = rows
        .iter()
        .position(|r| *r == (Some("x1"), Some("x2")) || *r == (Some("x2"), Some("x1")))
        .expect("x1 ~~ x2 row");
    assert!(se.get(cov_row).is_some());

    let stats = calc_stats(&model).expect("stats");
    assert_eq!(stats.get("DoF"), Some(0.0));
    assert_eq!(stats.get("DoF Baseline"), Some(3.0));
    assert!(stats.get("chi2 Baseline").unwrap() > 0.0);
}

#[test]
fn evaluation_cap_reports_non_convergence() {
    let data = one_factor_frame(300, 4);
    let options = FitOptions {
        max_evaluations: 1,
        ..FitOptions::default()
    };
    let mut model = Model::with_options("f =~ y1 + y2 + y3 + y4", options).expect("model");
    let summary = model.fit(&data).expect("fit");
    assert!(!summary.converged);
    assert!(summary.warnings.iter().any(|w| w.contains("not converged")));
}

#[test]
fn results_require_a_fit() {
    let model = Model::new("f =~ y1 + y2 + y3").expect("model");
    assert!(!model.is_fitted());
    assert!(matches!(model.inspect(), Err(SemError::NotFitted)));
    assert!(matches!(calc_stats(&model), Err(SemError::NotFitted)));
}

#[test]
fn missing_column_is_a_fit_error() {
    let data = one_factor_frame(50, 1);
    let mut model = Model::new("f =~ y1 + y2 + z9").expect("model");
    let err = model.fit(&data).expect_err("missing column");
    assert!(matches!(err, SemError::MissingColumn(ref name) if name == "z9"));
    assert!(!model.is_fitted());
}

#[test]
fn non_numeric_column_is_rejected() {
    let data = df!(
        "y1" => [1.0, 2.0, 3.0],
        "y2" => ["a", "b", "c"],
    )
    .unwrap();
    let mut model = Model::new("y1 ~~ y2").expect("model");
    let err = model.fit(&data).expect_err("non-numeric");
    assert!(matches!(err, SemError::NonNumericColumn(ref name) if name == "y2"));
}

#[test]
fn unidentified_model_is_a_fit_error() {
    let data = one_factor_frame(100, 2);
    let desc = "f =~ y1 + y2\n y1 ~~ y2";
    let mut model = Model::new(desc).expect("model");
    let err = model.fit(&data).expect_err("not identified");
    assert!(matches!(err, SemError::Fit(_)), "{err}");
}

#[test]
fn one_factor_recovers_loadings() {
    let data = one_factor_frame(2000, 7);
    let mut model = Model::new("f =~ y1 + y2 + y3 + y4").expect("model");
    let summary = model.fit(&data).expect("fit");
    assert!(summary.converged);
    assert_eq!(summary.n_obs, 2000);
    assert_eq!(summary.npar, 8);

    let table = model.inspect().expect("inspect");
    assert_eq!(table.height(), 9);
    assert_eq!(
        table.get_column_names().iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        ["lval", "op", "rval", "Estimate", "Std. Err", "z-value", "p-value"]
    );
    assert_eq!(estimate_of(&table, "f", "=~", "y1"), 1.0);
    assert!((estimate_of(&table, "f", "=~", "y2") - 0.8).abs() < 0.1);
    assert!((estimate_of(&table, "f", "=~", "y3") - 0.6).abs() < 0.1);
    assert!((estimate_of(&table, "f", "=~", "y4") - 0.7).abs() < 0.1);
    assert!((estimate_of(&table, "f", "~~", "f") - 1.0).abs() < 0.15);

    let se = table.column("Std. Err").unwrap().f64().unwrap().clone();
    assert_eq!(se.get(0), None);
    assert!(se.get(1).is_some_and(|v| v > 0.0 && v < 0.1));

    let stats = calc_stats(&model).expect("stats");
    assert_eq!(
        stats.names(),
        [
            "DoF",
            "DoF Baseline",
            "chi2",
            "chi2 p-value",
            "chi2 Baseline",
            "CFI",
            "GFI",
            "AGFI",
            "NFI",
            "TLI",
            "RMSEA",
            "SRMR",
            "AIC",
            "BIC",
            "LogLik",
        ]
    );
    assert_eq!(stats.get("DoF"), Some(2.0));
    assert_eq!(stats.get("DoF Baseline"), Some(6.0));
    assert!(stats.get("CFI").unwrap() > 0.95);
    assert!(stats.get("chi2 Baseline").unwrap() > stats.get("chi2").unwrap());
    assert!(stats.get("SRMR").unwrap() < 0.05);
}

#[test]
fn saturated_regression_matches_least_squares() {
    let data = regression_frame(500, 11);
    let mut model = Model::new("y ~ x").expect("model");
    model.fit(&data).expect("fit");

    let x = data.column("x").unwrap().f64().unwrap().clone();
    let y = data.column("y").unwrap().f64().unwrap().clone();
    let n = x.len() as f64;
    let mx = x.into_no_null_iter().sum::<f64>() / n;
    let my = y.into_no_null_iter().sum::<f64>() / n;
    let sxy: f64 = x
        .into_no_null_iter()
        .zip(y.into_no_null_iter())
        .map(|(a, b)| (a - mx) * (b - my))
        .sum();
    let sxx: f64 = x.into_no_null_iter().map(|a| (a - mx).powi(2)).sum();

    let table = model.inspect().expect("inspect");
    assert!((estimate_of(&table, "y", "~", "x") - sxy / sxx).abs() < 1e-4);

    let stats = calc_stats(&model).expect("stats");
    assert_eq!(stats.get("DoF"), Some(0.0));
    assert!(stats.get("chi2").unwrap() < 1e-4);
    assert!((stats.get("CFI").unwrap() - 1.0).abs() < 1e-6);
    assert!(stats.get("chi2 p-value").unwrap().is_nan());
}

#[test]
fn labels_bounds_and_defined_parameters() {
    let data = one_factor_frame(1000, 5);
    let desc = "f =~ y1 + a*y2 + b*y3 + y4\n a > 0\n ab := a * b";
    let mut model = Model::new(desc).expect("model");
    model.fit(&data).expect("fit");

    let defined = model.defined_params().expect("defined");
    assert_eq!(defined.len(), 1);
    let table = model.inspect().expect("inspect");
    let a = estimate_of(&table, "f", "=~", "y2");
    let b = estimate_of(&table, "f", "=~", "y3");
    assert!((defined[0].est - a * b).abs() < 1e-9);
    assert!(defined[0].se > 0.0);
    assert!((estimate_of(&table, "ab", ":=", "a * b") - a * b).abs() < 1e-9);
}

#[test]
fn standardized_column_is_optional() {
    let data = one_factor_frame(500, 3);
    let mut model = Model::new("f =~ y1 + y2 + y3 + y4").expect("model");
    model.fit(&data).expect("fit");
    assert!(model.inspect().unwrap().column("Est. Std").is_err());

    let table = model.inspect_std().expect("inspect");
    let std = table.column("Est. Std").unwrap().f64().unwrap().clone();
    // factor variance standardizes to one
    let last_factor_row = (0..table.height())
        .find(|&i| {
            table.column("lval").unwrap().str().unwrap().get(i) == Some("f")
                && table.column("op").unwrap().str().unwrap().get(i) == Some("~~")
        })
        .unwrap();
    assert!((std.get(last_factor_row).unwrap() - 1.0).abs() < 1e-9);
}

#[test]
fn fitting_twice_is_deterministic() {
    let data = one_factor_frame(300, 9);
    let run = || {
        let mut model = Model::new("f =~ y1 + y2 + y3 + y4").expect("model");
        model.fit(&data).expect("fit");
        calc_stats(&model).expect("stats")
    };
    assert_eq!(run(), run());
}

#[test]
fn incomplete_rows_are_dropped() {
    let data = df!(
        "x" => [Some(1.0), Some(2.0), None, Some(4.0), Some(3.0), Some(6.0)],
        "y" => [Some(1.5), Some(1.0), Some(2.0), Some(4.5), Some(2.0), None],
    )
    .unwrap();
    let mut model = Model::new("y ~ x").expect("model");
    let summary = model.fit(&data).expect("fit");
    assert_eq!(summary.n_obs, 4);
}
