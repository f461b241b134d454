//! Forward Kalman filter over one patient's training window.

use super::effects::added_effect;
use super::state::{LatentTrack, PatientSeries};
use super::types::{DlmError, DlmParameters};

/// Run the forward recursion on `[0, last_train_obs)`.
///
/// The state starts at `(init_z, sigma_0)`. A missing outcome only inflates the
/// variance by `sigma_1`; an observed one applies the scalar Kalman update to the
/// outcome net of its added effect.
///
/// # Errors
///
/// Returns `DlmError::NumericalDegeneracy` if the innovation variance is not
/// positive or the filtered moments become non-finite.
pub(crate) fn forward_pass(
    track: &mut LatentTrack,
    series: &PatientSeries,
    params: &DlmParameters,
    patient: usize,
    iteration: usize,
) -> Result<(), DlmError> {
    let degenerate = DlmError::NumericalDegeneracy {
        stage: "forward filter",
        patient,
        iteration,
    };

    track.mu_filter[0] = params.init_z;
    track.sigma_filter[0] = params.sigma_0;
    track.kalman_gain[0] = 0.0;

    for t in 0..series.last_train_obs.saturating_sub(1) {
        let mu_pred = track.mu_filter[t];
        let sigma_pred = track.sigma_filter[t] + params.sigma_1;

        if series.is_observed(t + 1) {
            let innovation_variance = sigma_pred + params.sigma_2;
            if !(innovation_variance > 0.0) {
                return Err(degenerate);
            }
            let gain = sigma_pred / innovation_variance;
            let innovation = series.outcomes[t + 1] - mu_pred - added_effect(params, series, t + 1);
            track.kalman_gain[t + 1] = gain;
            track.mu_filter[t + 1] = gain.mul_add(innovation, mu_pred);
            track.sigma_filter[t + 1] = (1.0 - gain) * sigma_pred;
        } else {
            track.kalman_gain[t + 1] = 0.0;
            track.mu_filter[t + 1] = mu_pred;
            track.sigma_filter[t + 1] = sigma_pred;
        }

        if !track.mu_filter[t + 1].is_finite()
            || !track.sigma_filter[t + 1].is_finite()
            || track.sigma_filter[t + 1] < 0.0
        {
            return Err(degenerate);
        }
    }
    Ok(())
}
