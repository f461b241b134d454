//! Backward smoothing and lag-one covariance recursions.
//!
//! Both passes read the filtered moments and gains left by
//! [`super::filter::forward_pass`] for the same patient and only touch the
//! training window `[0, last_train_obs)`.

use super::state::{LatentTrack, PatientSeries};
use super::types::{DlmError, DlmParameters};

/// Rauch-Tung-Striebel recursion for the scalar random walk.
///
/// # Errors
///
/// Returns `DlmError::NumericalDegeneracy` if a predicted variance is not
/// positive or the smoothed moments become non-finite.
pub(crate) fn backward_pass(
    track: &mut LatentTrack,
    series: &PatientSeries,
    params: &DlmParameters,
    patient: usize,
    iteration: usize,
) -> Result<(), DlmError> {
    let degenerate = DlmError::NumericalDegeneracy {
        stage: "backward smoother",
        patient,
        iteration,
    };

    let last = series.last_train_obs - 1;
    track.mu_smooth[last] = track.mu_filter[last];
    track.sigma_smooth[last] = track.sigma_filter[last];
    track.mu_square_smooth[last] =
        track.mu_smooth[last].mul_add(track.mu_smooth[last], track.sigma_smooth[last]);
    track.backward_gain[last] = 0.0;

    for t in (0..last).rev() {
        let sigma_pred = track.sigma_filter[t] + params.sigma_1;
        if !(sigma_pred > 0.0) {
            return Err(degenerate);
        }
        let gain = track.sigma_filter[t] / sigma_pred;
        track.backward_gain[t] = gain;
        let mean_correction = track.mu_smooth[t + 1] - track.mu_filter[t];
        let variance_correction = track.sigma_smooth[t + 1] - sigma_pred;
        track.mu_smooth[t] = gain.mul_add(mean_correction, track.mu_filter[t]);
        track.sigma_smooth[t] = gain.powi(2).mul_add(variance_correction, track.sigma_filter[t]);
        track.mu_square_smooth[t] =
            track.mu_smooth[t].mul_add(track.mu_smooth[t], track.sigma_smooth[t]);

        if !track.mu_smooth[t].is_finite() || !track.sigma_smooth[t].is_finite() {
            return Err(degenerate);
        }
    }
    Ok(())
}

/// Smoothed covariance between consecutive states and the matching cross moment.
///
/// Patients with a single training step have no consecutive pair and are left
/// untouched.
///
/// # Errors
///
/// Returns `DlmError::NumericalDegeneracy` if a covariance becomes non-finite.
pub(crate) fn lag_one_covariance(
    track: &mut LatentTrack,
    series: &PatientSeries,
    patient: usize,
    iteration: usize,
) -> Result<(), DlmError> {
    if series.last_train_obs < 2 {
        return Ok(());
    }

    let start = series.last_train_obs - 2;
    track.sigma_ahead_smooth[start] =
        (1.0 - track.kalman_gain[start + 1]) * track.sigma_filter[start];
    for t in (0..start).rev() {
        let carried = track.backward_gain[t + 1]
            * (track.sigma_ahead_smooth[t + 1] - track.sigma_filter[t + 1])
            * track.backward_gain[t];
        track.sigma_ahead_smooth[t] =
            track.sigma_filter[t + 1].mul_add(track.backward_gain[t], carried);
    }

    for t in 0..=start {
        track.mu_ahead_smooth[t] =
            track.mu_smooth[t].mul_add(track.mu_smooth[t + 1], track.sigma_ahead_smooth[t]);
        if !track.mu_ahead_smooth[t].is_finite() {
            return Err(DlmError::NumericalDegeneracy {
                stage: "lag-one covariance",
                patient,
                iteration,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use faer::Mat;

    use super::*;
    use crate::models::dlm::filter::forward_pass;
    use crate::models::dlm::types::TreatmentCoefficients;

    fn series(outcomes: Vec<f64>) -> PatientSeries {
        let periods = outcomes.len();
        PatientSeries {
            observed_training_rows: outcomes.iter().filter(|v| !v.is_nan()).count(),
            outcomes,
            treatments: Mat::<f64>::zeros(periods, 1),
            covariates: vec![0.0],
            interactions: Mat::<f64>::zeros(periods, 0),
            last_obs: periods,
            last_train_obs: periods,
        }
    }

    fn params(sigma_1: f64) -> DlmParameters {
        DlmParameters {
            treatment: TreatmentCoefficients::DistributedLag {
                coefficients: Mat::<f64>::zeros(1, 1),
            },
            covariate: vec![0.0],
            interaction: Vec::new(),
            sigma_0: 0.4,
            sigma_1,
            sigma_2: 0.3,
            init_z: 0.5,
        }
    }

    fn smooth(s: &PatientSeries, p: &DlmParameters) -> LatentTrack {
        let mut track = LatentTrack::zeros(s.n_periods());
        forward_pass(&mut track, s, p, 0, 0).expect("filter");
        backward_pass(&mut track, s, p, 0, 0).expect("smoother");
        lag_one_covariance(&mut track, s, 0, 0).expect("lag covariance");
        track
    }

    #[test]
    fn boundary_matches_filtered_moments() {
        let s = series(vec![0.0, 1.0, f64::NAN, 2.0, 1.5]);
        let track = smooth(&s, &params(0.1));
        let last = s.last_train_obs - 1;
        assert_relative_eq!(track.mu_smooth[last], track.mu_filter[last]);
        assert_relative_eq!(track.sigma_smooth[last], track.sigma_filter[last]);
        for t in 0..s.last_train_obs {
            assert!(track.sigma_smooth[t] <= track.sigma_filter[t] + 1e-12);
            assert_relative_eq!(
                track.mu_square_smooth[t],
                track.sigma_smooth[t] + track.mu_smooth[t] * track.mu_smooth[t],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn two_step_smoother_matches_closed_form() {
        let s = series(vec![0.0, 2.0]);
        let p = params(0.1);
        let track = smooth(&s, &p);

        let sigma_pred = 0.4 + 0.1;
        let k = sigma_pred / (sigma_pred + 0.3);
        let mu1 = 0.5 + k * (2.0 - 0.5);
        let s1 = (1.0 - k) * sigma_pred;
        let j0 = 0.4 / sigma_pred;
        assert_relative_eq!(track.backward_gain[0], j0, epsilon = 1e-12);
        assert_relative_eq!(track.mu_smooth[0], 0.5 + j0 * (mu1 - 0.5), epsilon = 1e-12);
        assert_relative_eq!(
            track.sigma_smooth[0],
            0.4 + j0 * j0 * (s1 - sigma_pred),
            epsilon = 1e-12
        );
        // boundary of the lag-one recursion equals J_0 * sigma_{1|1}
        assert_relative_eq!(track.sigma_ahead_smooth[0], (1.0 - k) * 0.4, epsilon = 1e-12);
        assert_relative_eq!(track.sigma_ahead_smooth[0], j0 * s1, epsilon = 1e-12);
        assert_relative_eq!(
            track.mu_ahead_smooth[0],
            track.sigma_ahead_smooth[0] + track.mu_smooth[0] * track.mu_smooth[1],
            epsilon = 1e-12
        );
    }

    #[test]
    fn lag_one_covariance_matches_gain_identity() {
        // Cov(z_t, z_{t+1} | y) = J_t * sigma_{t+1|T} for the scalar random walk
        let s = series(vec![0.0, 1.0, 0.4, f64::NAN, 1.1, 0.9]);
        let track = smooth(&s, &params(0.2));
        for t in 0..s.last_train_obs - 1 {
            assert_relative_eq!(
                track.sigma_ahead_smooth[t],
                track.backward_gain[t] * track.sigma_smooth[t + 1],
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn vanishing_transition_variance_flattens_the_trajectory() {
        let s = series(vec![0.0, 1.0, 3.0, -1.0, 2.0, 0.5]);
        let track = smooth(&s, &params(1e-12));
        for t in 1..s.last_train_obs {
            assert_relative_eq!(track.mu_smooth[t], track.mu_smooth[0], epsilon = 1e-6);
        }
    }

    #[test]
    fn single_step_series_skips_lag_covariance() {
        let mut s = series(vec![1.0, 2.0, 3.0]);
        s.last_train_obs = 1;
        let track = smooth(&s, &params(0.1));
        assert_relative_eq!(track.mu_smooth[0], 0.5);
        assert!(track.sigma_ahead_smooth.iter().all(|v| v.abs() < 1e-15));
    }
}
