//! # Latent random-walk panel model
//!
//! Each patient carries a scalar latent trajectory `z_t = z_{t-1} + e_t`,
//! `e_t ~ N(0, sigma_1)`, observed as `y_t = z_t + pi(t) + u_t`,
//! `u_t ~ N(0, sigma_2)`, where `pi(t)` is the added effect of lagged
//! treatments and static covariates. [`DlmModel`] fits the shared parameters
//! by expectation-maximization: a Kalman filter, a Rauch-Tung-Striebel
//! smoother, and the lag-one covariance recursion give the E-step; closed-form
//! moment updates and a pooled least-squares regression give the M-step.

mod design;
mod diagnostics;
mod effects;
mod em;
mod filter;
mod mstep;
mod smoother;
mod state;
mod types;

pub use design::PooledDesign;
pub use diagnostics::{render_parameter_table, render_trace_table};
pub use em::DlmModel;
pub use state::LatentTrack;
pub use types::{
    ConvergenceStatus, DlmError, DlmOptions, DlmParameters, EffectLayout, EmConfig, EmReport,
    ErrorKind, MStepSummary, Rollout, StoppingRule, TreatmentCoefficients,
};
