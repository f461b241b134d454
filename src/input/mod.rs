//! # Panel inputs
//!
//! Defines the container for repeated patient measurements, lagged treatment
//! indicators, and static covariates consumed by the latent-trajectory models.
//!
//! Outcomes are stored as a `patients x T` matrix where missing measurements are
//! encoded as `NaN`. Treatments are one `T x N` block per patient and covariates a
//! `patients x M` matrix.
//!
//! # Examples
//!
//! ```
//! use faer::Mat;
//! use latent_panel_models::PanelInput;
//!
//! let outcomes = Mat::from_fn(2, 3, |i, t| if i == 1 && t == 1 { f64::NAN } else { 1.0 });
//! let treatments = vec![Mat::<f64>::zeros(3, 1), Mat::<f64>::zeros(3, 1)];
//! let covariates = Mat::from_fn(2, 1, |_, _| 1.0);
//! let input = PanelInput::new(outcomes, treatments, covariates);
//!
//! assert!(input.validate().is_ok());
//! ```
//!
//! ```
//! use faer::Mat;
//! use latent_panel_models::PanelInput;
//!
//! let outcomes = Mat::from_fn(2, 3, |_, _| 1.0);
//! let treatments = vec![Mat::<f64>::zeros(3, 1)];
//! let covariates = Mat::from_fn(2, 1, |_, _| 1.0);
//! let input = PanelInput::new(outcomes, treatments, covariates);
//!
//! assert!(input.validate().is_err());
//! ```

use faer::Mat;
use thiserror::Error;

use crate::utils::matrix_is_finite;

/// Errors returned when validating panel inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PanelInputError {
    #[error("outcome matrix must have at least one patient and one time step")]
    EmptyOutcomes,
    #[error("treatment blocks ({blocks}) must match the number of patients ({patients})")]
    TreatmentCountMismatch { blocks: usize, patients: usize },
    #[error(
        "treatment block for patient {patient} has shape {rows}x{cols}; expected {expected_rows}x{expected_cols}"
    )]
    TreatmentShapeMismatch {
        patient: usize,
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },
    #[error("covariate rows ({rows}) must match the number of patients ({patients})")]
    CovariateRowMismatch { rows: usize, patients: usize },
    #[error("treatment indicators contain non-finite values")]
    NonFiniteTreatments,
    #[error("covariates contain non-finite values")]
    NonFiniteCovariates,
    #[error("outcomes contain infinite values")]
    InfiniteOutcome,
}

/// Raw panel of patient series.
#[derive(Debug, Clone)]
pub struct PanelInput {
    pub outcomes: Mat<f64>,
    pub treatments: Vec<Mat<f64>>,
    pub covariates: Mat<f64>,
}

impl PanelInput {
    #[must_use]
    pub const fn new(outcomes: Mat<f64>, treatments: Vec<Mat<f64>>, covariates: Mat<f64>) -> Self {
        Self {
            outcomes,
            treatments,
            covariates,
        }
    }

    #[must_use]
    pub fn n_patients(&self) -> usize {
        self.outcomes.nrows()
    }

    #[must_use]
    pub fn n_periods(&self) -> usize {
        self.outcomes.ncols()
    }

    /// Number of treatment types, taken from the first treatment block.
    #[must_use]
    pub fn n_treatments(&self) -> usize {
        self.treatments.first().map_or(0, |block| block.ncols())
    }

    #[must_use]
    pub fn n_covariates(&self) -> usize {
        self.covariates.ncols()
    }

    /// Outcome row for one patient, missing values kept as `NaN`.
    #[must_use]
    pub fn outcome_row(&self, patient: usize) -> Vec<f64> {
        (0..self.n_periods())
            .map(|t| self.outcomes[(patient, t)])
            .collect()
    }

    /// Validate shapes and values of outcomes, treatments, and covariates.
    ///
    /// # Errors
    ///
    /// Returns `PanelInputError` if inputs are malformed.
    pub fn validate(&self) -> Result<(), PanelInputError> {
        let patients = self.n_patients();
        let periods = self.n_periods();
        if patients == 0 || periods == 0 {
            return Err(PanelInputError::EmptyOutcomes);
        }
        if self.treatments.len() != patients {
            return Err(PanelInputError::TreatmentCountMismatch {
                blocks: self.treatments.len(),
                patients,
            });
        }
        let n_treatments = self.n_treatments();
        for (patient, block) in self.treatments.iter().enumerate() {
            if block.nrows() != periods || block.ncols() != n_treatments {
                return Err(PanelInputError::TreatmentShapeMismatch {
                    patient,
                    rows: block.nrows(),
                    cols: block.ncols(),
                    expected_rows: periods,
                    expected_cols: n_treatments,
                });
            }
        }
        if self.covariates.nrows() != patients {
            return Err(PanelInputError::CovariateRowMismatch {
                rows: self.covariates.nrows(),
                patients,
            });
        }
        if !self.treatments.iter().all(matrix_is_finite) {
            return Err(PanelInputError::NonFiniteTreatments);
        }
        if !matrix_is_finite(&self.covariates) {
            return Err(PanelInputError::NonFiniteCovariates);
        }
        for i in 0..patients {
            for t in 0..periods {
                if self.outcomes[(i, t)].is_infinite() {
                    return Err(PanelInputError::InfiniteOutcome);
                }
            }
        }
        Ok(())
    }
}
