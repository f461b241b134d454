//! Closed-form parameter updates from smoothed sufficient statistics.

use faer::Mat;

use crate::utils::{column_to_vec, usize_to_f64, vec_to_column};

use super::design::PooledDesign;
use super::effects::added_effect;
use super::state::{LatentTrack, PatientSeries};
use super::types::{DlmError, DlmParameters, MStepSummary, TreatmentCoefficients};

/// Re-estimate every parameter in place.
///
/// Order is `init_z`, `sigma_0`, `sigma_1`, coefficients, `sigma_2`; the
/// observation variance is evaluated with the freshly estimated coefficients.
///
/// # Errors
///
/// Returns `DlmError::SolveFailed` if the pooled regression fails and
/// `DlmError::NonPositiveVariance` if a variance estimate is not positive.
pub(crate) fn m_step(
    params: &mut DlmParameters,
    series: &[PatientSeries],
    tracks: &[LatentTrack],
    design: &PooledDesign,
    iteration: usize,
) -> Result<MStepSummary, DlmError> {
    params.init_z = initial_mean(tracks);
    params.sigma_0 = positive("sigma_0", initial_variance(tracks), iteration)?;
    params.sigma_1 = positive("sigma_1", transition_variance(series, tracks), iteration)?;
    let summary = update_coefficients(params, series, tracks, design)?;
    params.sigma_2 = positive(
        "sigma_2",
        observation_variance(params, series, tracks, iteration)?,
        iteration,
    )?;
    Ok(summary)
}

fn positive(parameter: &'static str, value: f64, iteration: usize) -> Result<f64, DlmError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(DlmError::NonPositiveVariance {
            parameter,
            value,
            iteration,
        })
    }
}

pub(crate) fn initial_mean(tracks: &[LatentTrack]) -> f64 {
    tracks.iter().map(|track| track.mu_smooth[0]).sum::<f64>() / usize_to_f64(tracks.len())
}

pub(crate) fn initial_variance(tracks: &[LatentTrack]) -> f64 {
    tracks
        .iter()
        .map(|track| {
            let mean = track.mu_smooth[0];
            mean.mul_add(-mean, track.mu_square_smooth[0])
        })
        .sum::<f64>()
        / usize_to_f64(tracks.len())
}

/// Mean squared smoothed increment, averaged per patient then across patients.
///
/// Patients with a single training step add nothing but still count in the
/// denominator.
pub(crate) fn transition_variance(series: &[PatientSeries], tracks: &[LatentTrack]) -> f64 {
    let mut total = 0.0;
    for (s, track) in series.iter().zip(tracks) {
        if s.last_train_obs <= 1 {
            continue;
        }
        let steps = s.last_train_obs - 1;
        let sum: f64 = (0..steps)
            .map(|t| {
                2.0f64.mul_add(
                    -track.mu_ahead_smooth[t],
                    track.mu_square_smooth[t + 1] + track.mu_square_smooth[t],
                )
            })
            .sum();
        total += sum / usize_to_f64(steps);
    }
    total / usize_to_f64(series.len())
}

/// Expected squared observation residual over observed training rows.
pub(crate) fn observation_variance(
    params: &DlmParameters,
    series: &[PatientSeries],
    tracks: &[LatentTrack],
    iteration: usize,
) -> Result<f64, DlmError> {
    let mut total = 0.0;
    for (patient, (s, track)) in series.iter().zip(tracks).enumerate() {
        if s.observed_training_rows == 0 {
            return Err(DlmError::NumericalDegeneracy {
                stage: "observation variance",
                patient,
                iteration,
            });
        }
        let mut sum = 0.0;
        for t in (0..s.last_train_obs).filter(|&t| s.is_observed(t)) {
            let net = s.outcomes[t] - added_effect(params, s, t);
            sum += net.mul_add(
                net,
                (-2.0 * net).mul_add(track.mu_smooth[t], track.mu_square_smooth[t]),
            );
        }
        total += sum / usize_to_f64(s.observed_training_rows);
    }
    Ok(total / usize_to_f64(series.len()))
}

/// Pooled least-squares update of the treatment and covariate coefficients.
fn update_coefficients(
    params: &mut DlmParameters,
    series: &[PatientSeries],
    tracks: &[LatentTrack],
    design: &PooledDesign,
) -> Result<MStepSummary, DlmError> {
    let response = design.response(series, tracks);
    let previous = current_coefficients(params);
    let rss_before = design.residual_sum_of_squares(&previous, &response);

    let solution = design.solve(&response)?;
    let rss_after = design.residual_sum_of_squares(&solution, &response);
    apply_coefficients(params, &column_to_vec(&solution));

    Ok(MStepSummary {
        rss_before,
        rss_after,
    })
}

fn current_coefficients(params: &DlmParameters) -> Mat<f64> {
    let mut flat = params.treatment.to_flat();
    flat.extend_from_slice(&params.covariate);
    vec_to_column(&flat)
}

/// Split a pooled solution back into treatment and covariate coefficients.
pub(crate) fn apply_coefficients(params: &mut DlmParameters, flat: &[f64]) {
    let split = params.treatment.len();
    match &mut params.treatment {
        TreatmentCoefficients::SingleLag { coefficients, .. } => {
            coefficients.copy_from_slice(&flat[..split]);
        }
        TreatmentCoefficients::DistributedLag { coefficients } => {
            let n = coefficients.ncols();
            *coefficients = Mat::from_fn(coefficients.nrows(), n, |j, k| flat[j * n + k]);
        }
    }
    let n_covariates = params.covariate.len();
    params
        .covariate
        .copy_from_slice(&flat[split..split + n_covariates]);
}
