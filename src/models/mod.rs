//! # Models
//!
//! Latent-trajectory models for longitudinal patient panels. The random-walk
//! state-space model in [`dlm`] is fitted by expectation-maximization.

pub mod dlm;
pub mod matrix_ops;
