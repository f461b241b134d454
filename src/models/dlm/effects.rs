//! Deterministic added effect of lagged treatments and static covariates.

use crate::utils::dot;

use super::state::PatientSeries;
use super::types::{DlmParameters, TreatmentCoefficients};

/// Offset `pi(n, t)` added to the latent state to form the expected outcome.
///
/// Lags reaching before the start of the series contribute nothing, matching
/// the zero-truncated columns of the pooled design.
#[must_use]
pub(crate) fn added_effect(params: &DlmParameters, series: &PatientSeries, t: usize) -> f64 {
    treatment_effect(&params.treatment, series, t) + dot(&params.covariate, &series.covariates)
}

fn treatment_effect(treatment: &TreatmentCoefficients, series: &PatientSeries, t: usize) -> f64 {
    match treatment {
        TreatmentCoefficients::SingleLag { lag, coefficients } => {
            if t < *lag {
                return 0.0;
            }
            (0..coefficients.len())
                .map(|k| coefficients[k] * series.treatments[(t - lag, k)])
                .sum()
        }
        TreatmentCoefficients::DistributedLag { coefficients } => {
            let mut effect = 0.0;
            for j in 0..coefficients.nrows().min(t) {
                let row = t - 1 - j;
                for k in 0..coefficients.ncols() {
                    effect += coefficients[(j, k)] * series.treatments[(row, k)];
                }
            }
            effect
        }
    }
}
