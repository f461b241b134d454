//! Pooled regression design for the treatment and covariate coefficients.

use faer::Mat;

use crate::models::matrix_ops::{hstack, select_rows, shift_rows_down, vstack};
use crate::utils::{least_squares_min_norm, residual_sum_of_squares};

use super::state::{LatentTrack, PatientSeries};
use super::types::{DlmError, EffectLayout};

/// Stacked design over every patient's observed training rows.
#[derive(Debug, Clone)]
pub struct PooledDesign {
    matrix: Mat<f64>,
    /// `(patient, t)` for each design row.
    rows: Vec<(usize, usize)>,
}

impl PooledDesign {
    /// Build the design from per-patient lagged treatment blocks and covariates.
    ///
    /// # Errors
    ///
    /// Returns `DlmError::EmptyDesign` if the design has no rows or no columns and
    /// `DlmError::InsufficientDesignRows` if it has fewer rows than columns.
    /// Designs with enough rows that are still rank deficient are accepted and
    /// solved for the minimum-norm coefficients.
    pub(crate) fn build(
        series: &[PatientSeries],
        layout: EffectLayout,
        lags: usize,
        n_treatments: usize,
        n_covariates: usize,
    ) -> Result<Self, DlmError> {
        let ncols = match layout {
            EffectLayout::SingleLag => n_treatments,
            EffectLayout::DistributedLag => n_treatments * lags,
        } + n_covariates;

        let mut blocks = Vec::with_capacity(series.len());
        let mut rows = Vec::new();
        for (patient, s) in series.iter().enumerate() {
            let periods = s.n_periods();
            let mut columns = match layout {
                EffectLayout::SingleLag => vec![shift_rows_down(&s.treatments, lags)],
                EffectLayout::DistributedLag => (1..=lags)
                    .map(|lag| shift_rows_down(&s.treatments, lag))
                    .collect(),
            };
            columns.push(Mat::from_fn(periods, s.covariates.len(), |_t, m| {
                s.covariates[m]
            }));
            let full = hstack(&columns, periods);

            let kept: Vec<usize> = (0..s.last_train_obs).filter(|&t| s.is_observed(t)).collect();
            rows.extend(kept.iter().map(|&t| (patient, t)));
            blocks.push(select_rows(&full, &kept));
        }

        let matrix = vstack(&blocks, ncols);
        if matrix.nrows() == 0 || matrix.ncols() == 0 {
            return Err(DlmError::EmptyDesign {
                rows: matrix.nrows(),
                cols: matrix.ncols(),
            });
        }
        if matrix.nrows() < matrix.ncols() {
            return Err(DlmError::InsufficientDesignRows {
                rows: matrix.nrows(),
                cols: matrix.ncols(),
            });
        }
        Ok(Self { matrix, rows })
    }

    #[must_use]
    pub const fn matrix(&self) -> &Mat<f64> {
        &self.matrix
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    #[must_use]
    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    /// Regression target `y - mu_smooth` in design row order.
    #[must_use]
    pub(crate) fn response(&self, series: &[PatientSeries], tracks: &[LatentTrack]) -> Mat<f64> {
        Mat::from_fn(self.rows.len(), 1, |r, _| {
            let (patient, t) = self.rows[r];
            series[patient].outcomes[t] - tracks[patient].mu_smooth[t]
        })
    }

    /// # Errors
    ///
    /// Returns `DlmError::SolveFailed` if the least-squares solve fails.
    pub(crate) fn solve(&self, response: &Mat<f64>) -> Result<Mat<f64>, DlmError> {
        least_squares_min_norm(&self.matrix, response)
    }

    #[must_use]
    pub(crate) fn residual_sum_of_squares(
        &self,
        coefficients: &Mat<f64>,
        response: &Mat<f64>,
    ) -> f64 {
        residual_sum_of_squares(&self.matrix, coefficients, response)
    }
}
