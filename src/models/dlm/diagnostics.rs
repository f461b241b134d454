//! Monitoring likelihoods, deterministic rollouts, and held-out error.

use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use statrs::distribution::{Continuous, Normal};

use crate::utils::usize_to_f64;

use super::effects::added_effect;
use super::em::DlmModel;
use super::types::{DlmError, DlmParameters, EmReport, Rollout, TreatmentCoefficients};

impl DlmModel {
    /// Approximate observed-data log-likelihood used to monitor EM.
    ///
    /// Per patient: the first outcome under `N(init_z, sigma_0)`, then for each
    /// later training step the observation density at the filtered mean, the
    /// transition density between consecutive filtered means, and the density of
    /// the previous filtered mean at itself. Missing outcomes drop only the
    /// observation term. This is a cheap surrogate, not the marginal likelihood;
    /// see [`Self::predictive_log_likelihood`].
    ///
    /// # Errors
    ///
    /// Returns `DlmError::NumericalDegeneracy` if a variance is not positive.
    pub fn observed_log_likelihood(&self) -> Result<f64, DlmError> {
        let params = &self.params;
        let iteration = self.iterations_completed();
        let mut total = 0.0;

        for (patient, (series, track)) in self.series.iter().zip(&self.tracks).enumerate() {
            let density = |x: f64, mean: f64, variance: f64| {
                log_density(x, mean, variance).ok_or(DlmError::NumericalDegeneracy {
                    stage: "log-likelihood",
                    patient,
                    iteration,
                })
            };

            if series.is_observed(0) {
                total += density(series.outcomes[0], params.init_z, params.sigma_0)?;
            }
            for t in 1..series.last_train_obs {
                if series.is_observed(t) {
                    let mean = track.mu_filter[t] + added_effect(params, series, t);
                    total += density(series.outcomes[t], mean, params.sigma_2)?;
                }
                total += density(track.mu_filter[t], track.mu_filter[t - 1], params.sigma_1)?;
                total += density(
                    track.mu_filter[t - 1],
                    track.mu_filter[t - 1],
                    track.sigma_filter[t - 1],
                )?;
            }
        }
        Ok(total)
    }

    /// One-step-ahead predictive log-likelihood of the training outcomes.
    ///
    /// Each observed `y_t` with `t >= 1` is scored under
    /// `N(mu_filter[t-1] + pi_t, sigma_filter[t-1] + sigma_1 + sigma_2)`, which
    /// integrates the current and previous latent states out exactly. The first
    /// outcome uses the same `N(init_z, sigma_0)` term as the monitor.
    ///
    /// # Errors
    ///
    /// Returns `DlmError::NumericalDegeneracy` if a variance is not positive.
    pub fn predictive_log_likelihood(&self) -> Result<f64, DlmError> {
        let params = &self.params;
        let iteration = self.iterations_completed();
        let mut total = 0.0;

        for (patient, (series, track)) in self.series.iter().zip(&self.tracks).enumerate() {
            let degenerate = DlmError::NumericalDegeneracy {
                stage: "predictive log-likelihood",
                patient,
                iteration,
            };
            if series.is_observed(0) {
                total += log_density(series.outcomes[0], params.init_z, params.sigma_0)
                    .ok_or_else(|| degenerate.clone())?;
            }
            for t in (1..series.last_train_obs).filter(|&t| series.is_observed(t)) {
                let mean = track.mu_filter[t - 1] + added_effect(params, series, t);
                let variance = track.sigma_filter[t - 1] + params.sigma_1 + params.sigma_2;
                total += log_density(series.outcomes[t], mean, variance)
                    .ok_or_else(|| degenerate.clone())?;
            }
        }
        Ok(total)
    }

    /// Deterministic rollout of one patient over `[0, last_obs)`.
    ///
    /// The training window copies the smoothed means and the observed outcomes.
    /// Past the cutoff the latent mean is carried forward unchanged, its variance
    /// grows by `sigma_1` per step, and the expected outcome adds the treatment
    /// and covariate effect.
    ///
    /// # Errors
    ///
    /// Returns `DlmError::PatientOutOfRange` for an unknown patient index.
    pub fn predict(&self, patient: usize) -> Result<Rollout, DlmError> {
        let series = self.series(patient)?;
        let track = &self.tracks[patient];
        let cutoff = series.last_train_obs;

        let mut latent = track.mu_smooth[..cutoff].to_vec();
        let mut observed = series.outcomes[..cutoff].to_vec();
        let mut latent_variance = track.sigma_smooth[..cutoff].to_vec();

        let z = track.mu_smooth[cutoff - 1];
        let mut variance = track.sigma_smooth[cutoff - 1];
        for t in cutoff..series.last_obs {
            variance += self.params.sigma_1;
            latent.push(z);
            latent_variance.push(variance);
            observed.push(z + added_effect(&self.params, series, t));
        }

        Ok(Rollout {
            latent,
            observed,
            latent_variance,
        })
    }

    /// Mean squared error of the rollout on held-out outcomes.
    ///
    /// Averaged per patient over observed held-out entries, then across patients
    /// that have any held-out data. Returns `0.0` when no patient qualifies.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Self::predict`].
    pub fn held_out_mse(&self) -> Result<f64, DlmError> {
        let mut total = 0.0;
        let mut count = 0usize;

        for (patient, series) in self.series.iter().enumerate() {
            if series.last_train_obs >= series.last_obs {
                continue;
            }
            let rollout = self.predict(patient)?;
            let (sum, observed) = (series.last_train_obs..series.last_obs)
                .filter(|&t| series.is_observed(t))
                .fold((0.0, 0usize), |(sum, n), t| {
                    let error = rollout.observed[t] - series.outcomes[t];
                    (error.mul_add(error, sum), n + 1)
                });
            if observed > 0 {
                total += sum / usize_to_f64(observed);
                count += 1;
            }
        }

        if count == 0 {
            return Ok(0.0);
        }
        Ok(total / usize_to_f64(count))
    }
}

fn log_density(x: f64, mean: f64, variance: f64) -> Option<f64> {
    if !(variance > 0.0) {
        return None;
    }
    let value = Normal::new(mean, variance.sqrt()).ok()?.ln_pdf(x);
    value.is_finite().then_some(value)
}

/// Render fitted parameters as a formatted table using `comfy_table`.
#[must_use]
pub fn render_parameter_table(params: &DlmParameters) -> String {
    let mut table = make_table(&["parameter", "index", "value"]);

    match &params.treatment {
        TreatmentCoefficients::SingleLag { lag, coefficients } => {
            for (k, value) in coefficients.iter().enumerate() {
                table.add_row(vec![
                    Cell::new(format!("A (lag {lag})")),
                    Cell::new(k),
                    value_cell(*value),
                ]);
            }
        }
        TreatmentCoefficients::DistributedLag { coefficients } => {
            for j in 0..coefficients.nrows() {
                for k in 0..coefficients.ncols() {
                    table.add_row(vec![
                        Cell::new(format!("A (lag {})", j + 1)),
                        Cell::new(k),
                        value_cell(coefficients[(j, k)]),
                    ]);
                }
            }
        }
    }
    for (m, value) in params.covariate.iter().enumerate() {
        table.add_row(vec![Cell::new("b"), Cell::new(m), value_cell(*value)]);
    }
    for (k, value) in params.interaction.iter().enumerate() {
        table.add_row(vec![Cell::new("d"), Cell::new(k), value_cell(*value)]);
    }
    for (name, value) in [
        ("sigma_0", params.sigma_0),
        ("sigma_1", params.sigma_1),
        ("sigma_2", params.sigma_2),
        ("init_z", params.init_z),
    ] {
        table.add_row(vec![Cell::new(name), Cell::new("-"), value_cell(value)]);
    }
    table.to_string()
}

/// Render the per-iteration log-likelihood and regression RSS of an EM run.
#[must_use]
pub fn render_trace_table(report: &EmReport) -> String {
    let mut table = make_table(&["iteration", "loglik", "rss"]);
    for (i, (ll, rss)) in report
        .log_likelihood
        .iter()
        .zip(&report.regression_rss)
        .enumerate()
    {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(format!("{ll:.4}")),
            Cell::new(format!("{rss:.6}")),
        ]);
    }
    table.to_string()
}

fn value_cell(value: f64) -> Cell {
    Cell::new(format!("{value:.6}"))
}

fn make_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(*h)).collect::<Vec<_>>());
    table
}
