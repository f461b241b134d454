//! Core public types for the latent random-walk model.

use faer::Mat;
use thiserror::Error;

use crate::input::PanelInputError;

/// Broad class of a [`DlmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input or configuration precondition violated; the fit cannot start.
    Validation,
    /// Numerical failure during an EM iteration.
    Computation,
}

/// Errors returned by model construction, configuration, and fitting.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DlmError {
    #[error(transparent)]
    InvalidInput(#[from] PanelInputError),
    #[error("number of lag terms must be positive")]
    InvalidLagCount,
    #[error("training fraction must lie in (0, 1]; found {0}")]
    InvalidTrainFraction(f64),
    #[error("initial variance `{parameter}` must be finite and positive; found {value}")]
    InvalidInitialVariance { parameter: &'static str, value: f64 },
    #[error("iterations must be positive")]
    InvalidIterations,
    #[error("convergence tolerance must be finite and positive; found {0}")]
    InvalidTolerance(f64),
    #[error("patient {patient} has no observed outcomes")]
    NoObservations { patient: usize },
    #[error("patient {patient} has an empty training window")]
    EmptyTrainingWindow { patient: usize },
    #[error("pooled design has shape {rows}x{cols}; at least one row and column are required")]
    EmptyDesign { rows: usize, cols: usize },
    #[error(
        "pooled design has {rows} rows for {cols} coefficients; at least as many rows are required"
    )]
    InsufficientDesignRows { rows: usize, cols: usize },
    #[error("parameter `{parameter}` has length {found}; expected {expected}")]
    ParameterShapeMismatch {
        parameter: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("patient index {patient} out of range for {n_patients} patients")]
    PatientOutOfRange { patient: usize, n_patients: usize },
    #[error("pooled least-squares solve failed")]
    SolveFailed,
    #[error("{stage} degenerated for patient {patient} at EM iteration {iteration}")]
    NumericalDegeneracy {
        stage: &'static str,
        patient: usize,
        iteration: usize,
    },
    #[error("variance `{parameter}` estimate {value} is not positive at EM iteration {iteration}")]
    NonPositiveVariance {
        parameter: &'static str,
        value: f64,
        iteration: usize,
    },
}

impl DlmError {
    /// Whether the error is a precondition violation or a numerical failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::SolveFailed
            | Self::NumericalDegeneracy { .. }
            | Self::NonPositiveVariance { .. } => ErrorKind::Computation,
            _ => ErrorKind::Validation,
        }
    }
}

/// How lagged treatments enter the added effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EffectLayout {
    /// Every lag `1..=J` has its own coefficient row.
    #[default]
    DistributedLag,
    /// Only the treatment `J` steps back contributes.
    SingleLag,
}

/// Treatment coefficients, shaped by the effect layout.
#[derive(Debug, Clone)]
pub enum TreatmentCoefficients {
    /// One coefficient per treatment type applied at lag `lag`.
    SingleLag { lag: usize, coefficients: Vec<f64> },
    /// `J x N` matrix: row `j` applies to treatments at lag `j + 1`.
    DistributedLag { coefficients: Mat<f64> },
}

impl TreatmentCoefficients {
    #[must_use]
    pub const fn layout(&self) -> EffectLayout {
        match self {
            Self::SingleLag { .. } => EffectLayout::SingleLag,
            Self::DistributedLag { .. } => EffectLayout::DistributedLag,
        }
    }

    /// Coefficients in pooled-design column order.
    #[must_use]
    pub fn to_flat(&self) -> Vec<f64> {
        match self {
            Self::SingleLag { coefficients, .. } => coefficients.clone(),
            Self::DistributedLag { coefficients } => {
                let mut flat = Vec::with_capacity(coefficients.nrows() * coefficients.ncols());
                for j in 0..coefficients.nrows() {
                    for k in 0..coefficients.ncols() {
                        flat.push(coefficients[(j, k)]);
                    }
                }
                flat
            }
        }
    }

    /// Number of pooled-design columns occupied by treatment terms.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::SingleLag { coefficients, .. } => coefficients.len(),
            Self::DistributedLag { coefficients } => coefficients.nrows() * coefficients.ncols(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parameters of the latent random-walk model.
#[derive(Debug, Clone)]
pub struct DlmParameters {
    /// Lagged treatment coefficients (`A`).
    pub treatment: TreatmentCoefficients,
    /// Static covariate coefficients (`b`).
    pub covariate: Vec<f64>,
    /// Interaction coefficients (`d`). Reserved: no design columns exist for
    /// them and they stay at zero.
    pub interaction: Vec<f64>,
    /// Variance of the initial latent state.
    pub sigma_0: f64,
    /// Random-walk transition variance.
    pub sigma_1: f64,
    /// Observation noise variance.
    pub sigma_2: f64,
    /// Mean of the initial latent state.
    pub init_z: f64,
}

impl DlmParameters {
    /// All parameters as one vector, used for parameter-change stopping rules.
    #[must_use]
    pub fn to_flat(&self) -> Vec<f64> {
        let mut flat = self.treatment.to_flat();
        flat.extend_from_slice(&self.covariate);
        flat.extend_from_slice(&self.interaction);
        flat.extend_from_slice(&[self.sigma_0, self.sigma_1, self.sigma_2, self.init_z]);
        flat
    }
}

/// Construction options for [`super::DlmModel`].
#[derive(Debug, Clone, Copy)]
pub struct DlmOptions {
    /// Number of lag terms `J`.
    pub lags: usize,
    /// Number of reserved interaction terms `K`.
    pub interaction_terms: usize,
    /// Fraction of each patient's observed values used for training.
    pub train_fraction: f64,
    /// Treatment layout.
    pub layout: EffectLayout,
    /// Mean of the initial treatment coefficients.
    pub init_treatment_mean: f64,
    /// Mean of the initial covariate coefficients.
    pub init_covariate_mean: f64,
    /// Initial state variance.
    pub init_sigma_0: f64,
    /// Initial transition variance.
    pub init_sigma_1: f64,
    /// Initial observation variance.
    pub init_sigma_2: f64,
    /// RNG seed for the initial coefficient jitter and initial state mean.
    pub seed: u64,
}

impl Default for DlmOptions {
    fn default() -> Self {
        Self {
            lags: 1,
            interaction_terms: 0,
            train_fraction: 1.0,
            layout: EffectLayout::DistributedLag,
            init_treatment_mean: 0.1,
            init_covariate_mean: -0.1,
            init_sigma_0: 0.05,
            init_sigma_1: 0.05,
            init_sigma_2: 0.005,
            seed: 42,
        }
    }
}

impl DlmOptions {
    /// # Errors
    ///
    /// Returns `DlmError` if options are invalid.
    pub fn validate(self) -> Result<(), DlmError> {
        if self.lags == 0 {
            return Err(DlmError::InvalidLagCount);
        }
        if !(self.train_fraction > 0.0 && self.train_fraction <= 1.0) {
            return Err(DlmError::InvalidTrainFraction(self.train_fraction));
        }
        for (parameter, value) in [
            ("sigma_0", self.init_sigma_0),
            ("sigma_1", self.init_sigma_1),
            ("sigma_2", self.init_sigma_2),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(DlmError::InvalidInitialVariance { parameter, value });
            }
        }
        Ok(())
    }
}

/// Termination rule for the EM driver.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum StoppingRule {
    /// Run exactly `max_iterations` iterations.
    #[default]
    FixedIterations,
    /// Stop once the monitored log-likelihood changes by less than the tolerance.
    LogLikelihoodTolerance(f64),
    /// Stop once every parameter changes by less than the tolerance.
    ParameterTolerance(f64),
}

/// EM schedule.
#[derive(Debug, Clone, Copy)]
pub struct EmConfig {
    pub max_iterations: usize,
    pub stopping: StoppingRule,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            stopping: StoppingRule::FixedIterations,
        }
    }
}

impl EmConfig {
    /// # Errors
    ///
    /// Returns `DlmError` if the schedule is invalid.
    pub fn validate(self) -> Result<(), DlmError> {
        if self.max_iterations == 0 {
            return Err(DlmError::InvalidIterations);
        }
        match self.stopping {
            StoppingRule::FixedIterations => Ok(()),
            StoppingRule::LogLikelihoodTolerance(tol) | StoppingRule::ParameterTolerance(tol) => {
                if tol.is_finite() && tol > 0.0 {
                    Ok(())
                } else {
                    Err(DlmError::InvalidTolerance(tol))
                }
            }
        }
    }
}

/// Outcome of the stopping rule after an EM run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Fixed-iteration run; no criterion was evaluated.
    NotChecked,
    /// Criterion satisfied after `iteration` iterations (1-based).
    Converged { iteration: usize },
    /// Criterion requested but not satisfied within the budget.
    NotConverged,
}

/// Summary of one EM run.
#[derive(Debug, Clone)]
pub struct EmReport {
    pub iterations_completed: usize,
    pub status: ConvergenceStatus,
    /// Monitored log-likelihood, one entry per iteration of this run.
    pub log_likelihood: Vec<f64>,
    /// Pooled regression residual sum of squares after each M-step of this run.
    pub regression_rss: Vec<f64>,
    pub final_parameters: DlmParameters,
}

/// Regression bookkeeping from one M-step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MStepSummary {
    /// Residual sum of squares of the previous coefficients on the new response.
    pub rss_before: f64,
    /// Residual sum of squares of the re-estimated coefficients.
    pub rss_after: f64,
}

/// Deterministic continuation of one patient's series.
#[derive(Debug, Clone, PartialEq)]
pub struct Rollout {
    /// Smoothed latent means on the training window, carried forward afterwards.
    pub latent: Vec<f64>,
    /// Observed outcomes on the training window, expected outcomes afterwards.
    pub observed: Vec<f64>,
    /// Smoothed variances on the training window, accumulated transition variance afterwards.
    pub latent_variance: Vec<f64>,
}
