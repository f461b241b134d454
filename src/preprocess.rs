//! Series horizon helpers and panel-level missingness diagnostics.

use faer::Mat;
use num_traits::ToPrimitive;

use crate::utils::usize_to_f64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesDiagnostics {
    pub n_patients: usize,
    pub n_periods: usize,
    pub n_observed: usize,
    pub n_missing: usize,
    pub n_fully_missing: usize,
    pub observed_share: f64,
}

/// Count observed and missing cells of a `patients x T` outcome panel.
#[must_use]
pub fn series_diagnostics(outcomes: &Mat<f64>) -> SeriesDiagnostics {
    let n_patients = outcomes.nrows();
    let n_periods = outcomes.ncols();
    let mut n_observed = 0usize;
    let mut n_fully_missing = 0usize;

    for row in 0..n_patients {
        let observed = (0..n_periods)
            .filter(|&t| !outcomes[(row, t)].is_nan())
            .count();
        if observed == 0 {
            n_fully_missing += 1;
        }
        n_observed += observed;
    }

    let cells = n_patients * n_periods;
    let observed_share = if cells > 0 {
        usize_to_f64(n_observed) / usize_to_f64(cells)
    } else {
        0.0
    };

    SeriesDiagnostics {
        n_patients,
        n_periods,
        n_observed,
        n_missing: cells.saturating_sub(n_observed),
        n_fully_missing,
        observed_share,
    }
}

/// Index just past the last non-missing value, or `None` if every value is missing.
#[must_use]
pub fn last_observation(series: &[f64]) -> Option<usize> {
    series.iter().rposition(|value| !value.is_nan()).map(|idx| idx + 1)
}

/// Index just past the last observation kept for training.
///
/// The first `floor(n_observed * train_fraction)` non-missing values form the
/// training window. Returns `None` when that window is empty.
#[must_use]
pub fn last_training_observation(series: &[f64], train_fraction: f64) -> Option<usize> {
    let observed: Vec<usize> = series
        .iter()
        .enumerate()
        .filter(|(_, value)| !value.is_nan())
        .map(|(idx, _)| idx)
        .collect();
    let kept = (usize_to_f64(observed.len()) * train_fraction)
        .floor()
        .to_usize()
        .unwrap_or(0)
        .min(observed.len());
    if kept == 0 {
        return None;
    }
    Some(observed[kept - 1] + 1)
}
