//! Per-patient series and latent filter/smoother storage.

use faer::Mat;

use crate::input::PanelInput;
use crate::preprocess::{last_observation, last_training_observation};

use super::types::DlmError;

/// One patient's raw series with its training horizon.
#[derive(Debug, Clone)]
pub(crate) struct PatientSeries {
    pub outcomes: Vec<f64>,
    /// `T x N` treatment block.
    pub treatments: Mat<f64>,
    pub covariates: Vec<f64>,
    /// `T x K` interaction block, zero filled and not yet used by the estimator.
    pub interactions: Mat<f64>,
    pub last_obs: usize,
    pub last_train_obs: usize,
    /// Observed outcomes in `[0, last_train_obs)`.
    pub observed_training_rows: usize,
}

impl PatientSeries {
    #[must_use]
    pub(crate) fn is_observed(&self, t: usize) -> bool {
        !self.outcomes[t].is_nan()
    }

    #[must_use]
    pub(crate) fn n_periods(&self) -> usize {
        self.outcomes.len()
    }
}

/// # Errors
///
/// Returns `DlmError` if the panel is malformed, a patient has no observations,
/// or the training fraction leaves a patient without training rows.
pub(crate) fn prepare_series(
    input: &PanelInput,
    train_fraction: f64,
    interaction_terms: usize,
) -> Result<Vec<PatientSeries>, DlmError> {
    input.validate()?;

    let periods = input.n_periods();
    let mut series = Vec::with_capacity(input.n_patients());
    for patient in 0..input.n_patients() {
        let outcomes = input.outcome_row(patient);
        let last_obs =
            last_observation(&outcomes).ok_or(DlmError::NoObservations { patient })?;
        let last_train_obs = last_training_observation(&outcomes, train_fraction)
            .ok_or(DlmError::EmptyTrainingWindow { patient })?;
        let observed_training_rows = outcomes[..last_train_obs]
            .iter()
            .filter(|value| !value.is_nan())
            .count();
        let covariates = (0..input.n_covariates())
            .map(|m| input.covariates[(patient, m)])
            .collect();

        series.push(PatientSeries {
            outcomes,
            treatments: input.treatments[patient].clone(),
            covariates,
            interactions: Mat::<f64>::zeros(periods, interaction_terms),
            last_obs,
            last_train_obs,
            observed_training_rows,
        });
    }
    Ok(series)
}

/// Filter and smoother moments for one patient.
///
/// Entries at or beyond the patient's training cutoff are never written by the
/// E-step and must not be read.
#[derive(Debug, Clone)]
pub struct LatentTrack {
    /// Filtered mean `mu_{t|t}`.
    pub mu_filter: Vec<f64>,
    /// Filtered variance `sigma^2_{t|t}`.
    pub sigma_filter: Vec<f64>,
    /// Kalman gain `K_t`; zero where the outcome is missing.
    pub kalman_gain: Vec<f64>,
    /// Backward smoother gain `J_t`.
    pub backward_gain: Vec<f64>,
    /// Smoothed mean `mu_{t|T}`.
    pub mu_smooth: Vec<f64>,
    /// Smoothed variance `sigma^2_{t|T}`.
    pub sigma_smooth: Vec<f64>,
    /// Smoothed second moment `E[z_t^2 | y]`.
    pub mu_square_smooth: Vec<f64>,
    /// Smoothed cross moment `E[z_t z_{t+1} | y]`.
    pub mu_ahead_smooth: Vec<f64>,
    /// Smoothed lag-one covariance `Cov(z_t, z_{t+1} | y)`.
    pub sigma_ahead_smooth: Vec<f64>,
}

impl LatentTrack {
    #[must_use]
    pub(crate) fn zeros(periods: usize) -> Self {
        Self {
            mu_filter: vec![0.0; periods],
            sigma_filter: vec![0.0; periods],
            kalman_gain: vec![0.0; periods],
            backward_gain: vec![0.0; periods],
            mu_smooth: vec![0.0; periods],
            sigma_smooth: vec![0.0; periods],
            mu_square_smooth: vec![0.0; periods],
            mu_ahead_smooth: vec![0.0; periods],
            sigma_ahead_smooth: vec![0.0; periods],
        }
    }
}
