use faer::Mat;
use latent_panel_models::{
    ConvergenceStatus, DlmError, DlmModel, DlmOptions, EffectLayout, EmConfig, ErrorKind,
    PanelInput, StoppingRule, TreatmentCoefficients,
};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

fn sample_standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
    let u2 = rng.random::<f64>();
    (-2.0_f64 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Random-walk panel with a lag-one treatment effect and a sprinkling of gaps.
fn simulate_panel(patients: usize, periods: usize, effect: f64, seed: u64) -> PanelInput {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut outcomes = Mat::<f64>::zeros(patients, periods);
    let mut treatments = Vec::with_capacity(patients);
    let covariates = Mat::from_fn(patients, 1, |_, _| 1.0);

    for i in 0..patients {
        let x = Mat::from_fn(periods, 1, |t, _| if (t + i) % 4 == 1 { 1.0 } else { 0.0 });
        let mut z = 0.5f64.mul_add(sample_standard_normal(&mut rng), 2.0);
        for t in 0..periods {
            z += 0.1 * sample_standard_normal(&mut rng);
            let lagged = if t > 0 { effect * x[(t - 1, 0)] } else { 0.0 };
            let y = 0.05f64.mul_add(sample_standard_normal(&mut rng), z + lagged);
            outcomes[(i, t)] = if t > 0 && rng.random::<f64>() < 0.1 { f64::NAN } else { y };
        }
        treatments.push(x);
    }
    PanelInput::new(outcomes, treatments, covariates)
}

#[test]
fn fully_missing_training_window_is_a_validation_error() {
    let outcomes = Mat::from_fn(2, 6, |i, t| if i == 1 && t < 4 { f64::NAN } else { 1.0 });
    let input = PanelInput::new(
        outcomes,
        vec![Mat::<f64>::zeros(6, 1), Mat::<f64>::zeros(6, 1)],
        Mat::from_fn(2, 1, |_, _| 1.0),
    );
    let options = DlmOptions {
        train_fraction: 0.4,
        ..DlmOptions::default()
    };
    let err = DlmModel::new(&input, options).expect_err("empty training window");
    assert_eq!(err, DlmError::EmptyTrainingWindow { patient: 1 });
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn all_missing_patient_is_rejected_before_filtering() {
    let outcomes = Mat::from_fn(3, 4, |i, _| if i == 2 { f64::NAN } else { 0.5 });
    let input = PanelInput::new(
        outcomes,
        (0..3).map(|_| Mat::<f64>::zeros(4, 1)).collect(),
        Mat::from_fn(3, 1, |_, _| 1.0),
    );
    let err = DlmModel::new(&input, DlmOptions::default()).expect_err("no observations");
    assert_eq!(err, DlmError::NoObservations { patient: 2 });
}

#[test]
fn mismatched_treatment_blocks_are_rejected() {
    let input = PanelInput::new(
        Mat::from_fn(2, 4, |_, _| 0.5),
        vec![Mat::<f64>::zeros(4, 1), Mat::<f64>::zeros(3, 1)],
        Mat::from_fn(2, 1, |_, _| 1.0),
    );
    let err = DlmModel::new(&input, DlmOptions::default()).expect_err("bad shape");
    assert!(matches!(err, DlmError::InvalidInput(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn underdetermined_pooled_design_is_rejected_at_construction() {
    let input = PanelInput::new(
        Mat::from_fn(1, 3, |_, t| 1.0 + 0.1 * usize_to_f64(t)),
        vec![Mat::from_fn(3, 2, |t, k| if t == k { 1.0 } else { 0.0 })],
        Mat::from_fn(1, 1, |_, _| 1.0),
    );
    let options = DlmOptions {
        lags: 3,
        ..DlmOptions::default()
    };
    let err = DlmModel::new(&input, options).expect_err("3 rows for 7 coefficients");
    assert_eq!(err, DlmError::InsufficientDesignRows { rows: 3, cols: 7 });
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn em_recovers_positive_treatment_effect() {
    let input = simulate_panel(30, 15, 0.8, 7);
    let mut model = DlmModel::new(&input, DlmOptions::default()).expect("model");
    let report = model
        .run_em(EmConfig {
            max_iterations: 30,
            ..EmConfig::default()
        })
        .expect("fit");

    let coefficient = match &report.final_parameters.treatment {
        TreatmentCoefficients::DistributedLag { coefficients } => coefficients[(0, 0)],
        TreatmentCoefficients::SingleLag { .. } => panic!("layout changed"),
    };
    assert!(coefficient > 0.4, "treatment coefficient {coefficient}");
    assert!(report.log_likelihood.iter().all(|v| v.is_finite()));
}

#[test]
fn single_lag_layout_fits_one_coefficient_per_treatment() {
    let input = simulate_panel(12, 10, 0.5, 11);
    let options = DlmOptions {
        lags: 2,
        layout: EffectLayout::SingleLag,
        ..DlmOptions::default()
    };
    let mut model = DlmModel::new(&input, options).expect("model");
    let report = model
        .run_em(EmConfig {
            max_iterations: 5,
            ..EmConfig::default()
        })
        .expect("fit");
    assert!(matches!(
        report.final_parameters.treatment,
        TreatmentCoefficients::SingleLag { lag: 2, .. }
    ));
    assert_eq!(report.final_parameters.treatment.len(), 1);
    assert_eq!(model.design().ncols(), 2);
}

#[test]
fn log_likelihood_tolerance_reports_status() {
    let input = simulate_panel(10, 10, 0.5, 3);

    let mut loose = DlmModel::new(&input, DlmOptions::default()).expect("model");
    let report = loose
        .run_em(EmConfig {
            max_iterations: 20,
            stopping: StoppingRule::LogLikelihoodTolerance(1.0e9),
        })
        .expect("fit");
    assert_eq!(report.status, ConvergenceStatus::Converged { iteration: 2 });
    assert_eq!(report.log_likelihood.len(), 2);

    let mut strict = DlmModel::new(&input, DlmOptions::default()).expect("model");
    let report = strict
        .run_em(EmConfig {
            max_iterations: 3,
            stopping: StoppingRule::LogLikelihoodTolerance(f64::MIN_POSITIVE),
        })
        .expect("non-convergence is not an error");
    assert_eq!(report.status, ConvergenceStatus::NotConverged);
    assert_eq!(report.iterations_completed, 3);
}

#[test]
fn training_horizons_grow_with_train_fraction() {
    let input = simulate_panel(6, 12, 0.5, 5);
    let mut previous: Option<Vec<usize>> = None;
    for step in 3..=10 {
        let options = DlmOptions {
            train_fraction: usize_to_f64(step) / 10.0,
            ..DlmOptions::default()
        };
        let model = DlmModel::new(&input, options).expect("model");
        let horizons = model.last_training_observations();
        for (cutoff, last) in horizons.iter().zip(model.last_observations()) {
            assert!(*cutoff > 0 && *cutoff <= last && last <= 12);
        }
        if let Some(prev) = &previous {
            assert!(prev.iter().zip(&horizons).all(|(a, b)| a <= b));
        }
        previous = Some(horizons);
    }
}

#[test]
fn smoothed_boundary_matches_filter_after_fit() {
    let input = simulate_panel(5, 8, 0.3, 13);
    let mut model = DlmModel::new(&input, DlmOptions::default()).expect("model");
    model
        .run_em(EmConfig {
            max_iterations: 4,
            ..EmConfig::default()
        })
        .expect("fit");
    model.e_step().expect("e-step");

    for (track, cutoff) in model.tracks().iter().zip(model.last_training_observations()) {
        let last = cutoff - 1;
        assert!((track.sigma_smooth[last] - track.sigma_filter[last]).abs() < 1e-15);
        assert!(track.sigma_filter[..cutoff].iter().all(|&v| v >= 0.0));
    }
}
