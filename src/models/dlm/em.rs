/////////////////////////////////////////////////////////////////////////////////////////////\
//
// Expectation-maximization driver for the latent random-walk panel model.
//
// Created on: 18 Oct 2026
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # EM driver
//!
//! [`DlmModel`] owns the prepared patient series, the pooled design, the current
//! parameters, and one [`LatentTrack`] per patient. Each EM iteration recomputes
//! every track from scratch (filter, smoother, lag-one covariance) and then
//! re-estimates the parameters in closed form.

use faer::Mat;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::input::PanelInput;
use crate::utils::max_abs_diff;

use super::design::PooledDesign;
use super::filter::forward_pass;
use super::mstep::m_step;
use super::smoother::{backward_pass, lag_one_covariance};
use super::state::{LatentTrack, PatientSeries, prepare_series};
use super::types::{
    ConvergenceStatus, DlmError, DlmOptions, DlmParameters, EffectLayout, EmConfig, EmReport,
    MStepSummary, StoppingRule, TreatmentCoefficients,
};

const INIT_JITTER: f64 = 0.01;

/// Latent random-walk model fitted by EM on a panel of patient series.
#[derive(Debug, Clone)]
pub struct DlmModel {
    pub(crate) series: Vec<PatientSeries>,
    pub(crate) design: PooledDesign,
    pub(crate) params: DlmParameters,
    pub(crate) tracks: Vec<LatentTrack>,
    options: DlmOptions,
    log_likelihood: Vec<f64>,
    regression_rss: Vec<f64>,
    iterations_completed: usize,
}

impl DlmModel {
    /// Prepare series, build the pooled design, and draw initial parameters.
    ///
    /// # Errors
    ///
    /// Returns a validation `DlmError` if options or inputs are invalid, a
    /// patient has no observations or no training rows, or the pooled design
    /// is empty or has fewer rows than columns.
    ///
    /// # Examples
    ///
    /// ```
    /// use faer::Mat;
    /// use latent_panel_models::{DlmModel, DlmOptions, EmConfig, PanelInput};
    ///
    /// let outcomes = Mat::from_fn(2, 6, |i, t| 0.1 * (i + t) as f64);
    /// let treatments = vec![Mat::<f64>::zeros(6, 1), Mat::<f64>::zeros(6, 1)];
    /// let covariates = Mat::from_fn(2, 1, |_, _| 1.0);
    /// let input = PanelInput::new(outcomes, treatments, covariates);
    ///
    /// let mut model = DlmModel::new(&input, DlmOptions::default()).expect("model");
    /// let report = model
    ///     .run_em(EmConfig { max_iterations: 3, ..EmConfig::default() })
    ///     .expect("fit");
    /// assert_eq!(report.log_likelihood.len(), 3);
    /// ```
    pub fn new(input: &PanelInput, options: DlmOptions) -> Result<Self, DlmError> {
        options.validate()?;
        let series = prepare_series(input, options.train_fraction, options.interaction_terms)?;
        let n_treatments = input.n_treatments();
        let design = PooledDesign::build(
            &series,
            options.layout,
            options.lags,
            n_treatments,
            input.n_covariates(),
        )?;
        let params = initial_parameters(&options, n_treatments, input.n_covariates());
        let tracks = series
            .iter()
            .map(|s| LatentTrack::zeros(s.n_periods()))
            .collect();

        Ok(Self {
            series,
            design,
            params,
            tracks,
            options,
            log_likelihood: Vec::new(),
            regression_rss: Vec::new(),
            iterations_completed: 0,
        })
    }

    #[must_use]
    pub const fn parameters(&self) -> &DlmParameters {
        &self.params
    }

    #[must_use]
    pub const fn options(&self) -> DlmOptions {
        self.options
    }

    #[must_use]
    pub const fn design(&self) -> &PooledDesign {
        &self.design
    }

    #[must_use]
    pub fn tracks(&self) -> &[LatentTrack] {
        &self.tracks
    }

    #[must_use]
    pub fn n_patients(&self) -> usize {
        self.series.len()
    }

    /// Index just past each patient's last observation.
    #[must_use]
    pub fn last_observations(&self) -> Vec<usize> {
        self.series.iter().map(|s| s.last_obs).collect()
    }

    /// Index just past each patient's last training observation.
    #[must_use]
    pub fn last_training_observations(&self) -> Vec<usize> {
        self.series.iter().map(|s| s.last_train_obs).collect()
    }

    /// Reserved `T x K` interaction block for one patient (zero filled).
    #[must_use]
    pub fn interactions(&self, patient: usize) -> Option<&Mat<f64>> {
        self.series.get(patient).map(|s| &s.interactions)
    }

    /// Monitored log-likelihood, one entry per completed EM iteration.
    #[must_use]
    pub fn log_likelihood_trace(&self) -> &[f64] {
        &self.log_likelihood
    }

    /// Pooled regression residual sum of squares after each M-step.
    #[must_use]
    pub fn regression_rss_trace(&self) -> &[f64] {
        &self.regression_rss
    }

    #[must_use]
    pub const fn iterations_completed(&self) -> usize {
        self.iterations_completed
    }

    /// Smoothed means as a `patients x T` matrix; entries past each training
    /// cutoff are `NaN`.
    #[must_use]
    pub fn smoothed_means(&self) -> Mat<f64> {
        self.smoothed_matrix(|track| &track.mu_smooth)
    }

    /// Smoothed variances as a `patients x T` matrix; entries past each training
    /// cutoff are `NaN`.
    #[must_use]
    pub fn smoothed_variances(&self) -> Mat<f64> {
        self.smoothed_matrix(|track| &track.sigma_smooth)
    }

    fn smoothed_matrix(&self, field: impl Fn(&LatentTrack) -> &Vec<f64>) -> Mat<f64> {
        let periods = self.series.first().map_or(0, PatientSeries::n_periods);
        Mat::from_fn(self.series.len(), periods, |n, t| {
            if t < self.series[n].last_train_obs {
                field(&self.tracks[n])[t]
            } else {
                f64::NAN
            }
        })
    }

    /// Replace the current parameters.
    ///
    /// # Errors
    ///
    /// Returns `DlmError::ParameterShapeMismatch` if the parameters do not match
    /// the model's layout and dimensions.
    pub fn set_parameters(&mut self, params: DlmParameters) -> Result<(), DlmError> {
        let current = &self.params;
        match (&params.treatment, &current.treatment) {
            (
                TreatmentCoefficients::SingleLag { lag, coefficients },
                TreatmentCoefficients::SingleLag {
                    lag: expected_lag,
                    coefficients: expected,
                },
            ) => {
                check_len("treatment lag", *expected_lag, *lag)?;
                check_len("treatment", expected.len(), coefficients.len())?;
            }
            (
                TreatmentCoefficients::DistributedLag { coefficients },
                TreatmentCoefficients::DistributedLag {
                    coefficients: expected,
                },
            ) => {
                check_len("treatment lags", expected.nrows(), coefficients.nrows())?;
                check_len("treatment", expected.ncols(), coefficients.ncols())?;
            }
            _ => {
                return Err(DlmError::ParameterShapeMismatch {
                    parameter: "treatment layout",
                    expected: current.treatment.len(),
                    found: params.treatment.len(),
                });
            }
        }
        check_len("covariate", current.covariate.len(), params.covariate.len())?;
        check_len("interaction", current.interaction.len(), params.interaction.len())?;
        self.params = params;
        Ok(())
    }

    /// Recompute every patient's filter, smoother, and lag-one moments.
    ///
    /// # Errors
    ///
    /// Returns `DlmError::NumericalDegeneracy` naming the failing patient.
    pub fn e_step(&mut self) -> Result<(), DlmError> {
        let iteration = self.iterations_completed;
        for (patient, (track, series)) in self.tracks.iter_mut().zip(&self.series).enumerate() {
            forward_pass(track, series, &self.params, patient, iteration)?;
            backward_pass(track, series, &self.params, patient, iteration)?;
            lag_one_covariance(track, series, patient, iteration)?;
        }
        Ok(())
    }

    /// Re-estimate all parameters from the current smoothed statistics.
    ///
    /// # Errors
    ///
    /// Returns `DlmError::SolveFailed` or `DlmError::NonPositiveVariance`.
    pub fn m_step(&mut self) -> Result<MStepSummary, DlmError> {
        m_step(
            &mut self.params,
            &self.series,
            &self.tracks,
            &self.design,
            self.iterations_completed,
        )
    }

    /// Alternate E- and M-steps according to `config`.
    ///
    /// The monitored log-likelihood is recorded after every M-step. A tolerance
    /// rule that is never met yields [`ConvergenceStatus::NotConverged`], not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns `DlmError` if the configuration is invalid or an iteration fails
    /// numerically; the error carries the failing iteration.
    pub fn run_em(&mut self, config: EmConfig) -> Result<EmReport, DlmError> {
        config.validate()?;

        let start = self.log_likelihood.len();
        let mut status = match config.stopping {
            StoppingRule::FixedIterations => ConvergenceStatus::NotChecked,
            _ => ConvergenceStatus::NotConverged,
        };
        let mut previous_ll = self
            .log_likelihood
            .last()
            .copied()
            .unwrap_or(f64::NEG_INFINITY);
        let mut completed = 0;

        for iteration in 0..config.max_iterations {
            let previous_params = self.params.to_flat();
            self.e_step()?;
            let summary = self.m_step()?;
            let ll = self.observed_log_likelihood()?;
            self.log_likelihood.push(ll);
            self.regression_rss.push(summary.rss_after);
            self.iterations_completed += 1;
            completed = iteration + 1;

            log::debug!(
                "EM iteration {completed}: loglik={ll:.6}, sigma_0={:.6}, sigma_1={:.6}, sigma_2={:.6}, rss={:.6}",
                self.params.sigma_0,
                self.params.sigma_1,
                self.params.sigma_2,
                summary.rss_after
            );

            let converged = match config.stopping {
                StoppingRule::FixedIterations => false,
                StoppingRule::LogLikelihoodTolerance(tol) => (ll - previous_ll).abs() < tol,
                StoppingRule::ParameterTolerance(tol) => {
                    max_abs_diff(&self.params.to_flat(), &previous_params) < tol
                }
            };
            previous_ll = ll;
            if converged {
                status = ConvergenceStatus::Converged {
                    iteration: completed,
                };
                log::info!("EM converged after {completed} iterations");
                break;
            }
        }

        match status {
            ConvergenceStatus::NotChecked => {
                log::info!("EM reached the maximum of {completed} iterations");
            }
            ConvergenceStatus::NotConverged => {
                log::warn!("EM did not meet its stopping rule within {completed} iterations");
            }
            ConvergenceStatus::Converged { .. } => {}
        }

        Ok(EmReport {
            iterations_completed: completed,
            status,
            log_likelihood: self.log_likelihood[start..].to_vec(),
            regression_rss: self.regression_rss[start..].to_vec(),
            final_parameters: self.params.clone(),
        })
    }

    pub(crate) fn series(&self, patient: usize) -> Result<&PatientSeries, DlmError> {
        self.series.get(patient).ok_or(DlmError::PatientOutOfRange {
            patient,
            n_patients: self.series.len(),
        })
    }
}

fn check_len(parameter: &'static str, expected: usize, found: usize) -> Result<(), DlmError> {
    if expected == found {
        Ok(())
    } else {
        Err(DlmError::ParameterShapeMismatch {
            parameter,
            expected,
            found,
        })
    }
}

fn initial_parameters(
    options: &DlmOptions,
    n_treatments: usize,
    n_covariates: usize,
) -> DlmParameters {
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut jittered = |mean: f64| INIT_JITTER.mul_add(sample_standard_normal(&mut rng), mean);

    let treatment = match options.layout {
        EffectLayout::SingleLag => TreatmentCoefficients::SingleLag {
            lag: options.lags,
            coefficients: (0..n_treatments)
                .map(|_| jittered(options.init_treatment_mean))
                .collect(),
        },
        EffectLayout::DistributedLag => {
            let draws: Vec<f64> = (0..options.lags * n_treatments)
                .map(|_| jittered(options.init_treatment_mean))
                .collect();
            TreatmentCoefficients::DistributedLag {
                coefficients: Mat::from_fn(options.lags, n_treatments, |j, k| {
                    draws[j * n_treatments + k]
                }),
            }
        }
    };
    let covariate = (0..n_covariates)
        .map(|_| jittered(options.init_covariate_mean))
        .collect();
    let init_z = options.init_sigma_0.sqrt() * sample_standard_normal(&mut rng);

    DlmParameters {
        treatment,
        covariate,
        interaction: vec![0.0; options.interaction_terms],
        sigma_0: options.init_sigma_0,
        sigma_1: options.init_sigma_1,
        sigma_2: options.init_sigma_2,
        init_z,
    }
}

fn sample_standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
    let u2 = rng.random::<f64>();
    (-2.0_f64 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}
