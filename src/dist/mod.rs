pub mod diagonal_gaussian;
pub mod discrete;
pub mod gamma;
pub mod gaussian;
pub mod laplace;
pub mod regression;

pub use diagonal_gaussian::DiagonalGaussianDistribution;
pub use discrete::DiscreteDistribution;
pub use gamma::GammaDistribution;
pub use gaussian::GaussianDistribution;
pub use laplace::LaplaceDistribution;
pub use regression::{LinearRegression, RegressionDistribution};

use crate::error::Result;
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::RngCore;

/// Capability set shared by every distribution kind.
///
/// Observation matrices are column-major in the statistical sense: a
/// `(d, n)` matrix holds `n` samples of dimensionality `d`, one per column.
/// Weight vectors are per-column responsibilities; they must be non-negative
/// but need not sum to one.
///
/// Evaluating an observation whose length differs from
/// [`dimensionality`](Distribution::dimensionality) is a caller error and
/// panics; training-input shape problems are reported as [`crate::Error`].
pub trait Distribution {
    /// Dimensionality of one observation.
    fn dimensionality(&self) -> usize;

    /// Log-density (or log-mass) of a single observation. May be
    /// `f64::NEG_INFINITY` for zero-probability points.
    fn log_probability(&self, observation: ArrayView1<'_, f64>) -> f64;

    /// Density of a single observation, computed from the log form so the
    /// two can never disagree.
    fn probability(&self, observation: ArrayView1<'_, f64>) -> f64 {
        self.log_probability(observation).exp()
    }

    /// Draw one observation.
    fn random(&self, rng: &mut dyn RngCore) -> Array1<f64>;

    /// Maximum-likelihood fit to the observation columns, replacing all
    /// prior parameters.
    fn train(&mut self, observations: ArrayView2<'_, f64>) -> Result<()>;

    /// Responsibility-weighted maximum-likelihood fit.
    fn train_weighted(
        &mut self,
        observations: ArrayView2<'_, f64>,
        weights: ArrayView1<'_, f64>,
    ) -> Result<()>;

    /// Densities of every observation column, filled positionally.
    fn probability_batch(&self, observations: ArrayView2<'_, f64>) -> Array1<f64> {
        observations
            .columns()
            .into_iter()
            .map(|col| self.probability(col))
            .collect()
    }

    /// Log-densities of every observation column, filled positionally.
    fn log_probability_batch(&self, observations: ArrayView2<'_, f64>) -> Array1<f64> {
        observations
            .columns()
            .into_iter()
            .map(|col| self.log_probability(col))
            .collect()
    }
}

/// Check a weight vector against the number of observation columns.
pub(crate) fn check_weights(num_columns: usize, weights: &ArrayView1<'_, f64>) -> Result<()> {
    if weights.len() != num_columns {
        return Err(crate::Error::DimensionMismatch {
            expected: num_columns,
            actual: weights.len(),
        });
    }
    Ok(())
}
