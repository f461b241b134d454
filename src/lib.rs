#![forbid(unsafe_code)]

//! # `latent_panel_models`
//!
//! Latent random-walk state-space models for panels of patient series with
//! lagged treatment effects and static covariates, fitted by
//! expectation-maximization with a Kalman filter and smoother.
//!
//! The crate was initially developed for longitudinal clinical measurements, but
//! the API only assumes a `patients x time` outcome matrix with `NaN` marking
//! missing values.

pub mod input;
pub mod models;
pub mod preprocess;
pub mod utils;

pub use input::{PanelInput, PanelInputError};
pub use preprocess::{
    SeriesDiagnostics, last_observation, last_training_observation, series_diagnostics,
};
pub mod matrix_ops {
    pub use crate::models::matrix_ops::*;
}

pub use models::dlm::{
    ConvergenceStatus, DlmError, DlmModel, DlmOptions, DlmParameters, EffectLayout, EmConfig,
    EmReport, ErrorKind, LatentTrack, MStepSummary, PooledDesign, Rollout, StoppingRule,
    TreatmentCoefficients, render_parameter_table, render_trace_table,
};
