use crate::dist::{check_weights, Distribution};
use crate::error::{Error, Result};
use crate::linalg;
use crate::serial::{Archive, BinReader, BinWriter, XmlNode, XmlWriter};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::debug;

const LOG_2PI: f64 = 1.8378770664093454;

/// A full-covariance multivariate normal distribution.
///
/// The lower Cholesky factor and log-determinant of the covariance are
/// cached and recomputed eagerly whenever the covariance changes, so
/// repeated density evaluation costs one triangular solve. The
/// zero-dimensional default state is valid and represents an untrained
/// distribution.
///
/// Singular or non-positive-definite covariances are not trapped: the
/// cached factor becomes NaN and evaluation yields NaN. This is a
/// documented limitation, not a recoverable error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "GaussianParams", into = "GaussianParams")]
pub struct GaussianDistribution {
    mean: Array1<f64>,
    covariance: Array2<f64>,
    // Caches derived from `covariance`.
    chol_lower: Array2<f64>,
    log_det_cov: f64,
}

/// Parameter-only shadow for serde; caches are rebuilt on load.
#[derive(Serialize, Deserialize, Clone)]
struct GaussianParams {
    mean: Array1<f64>,
    covariance: Array2<f64>,
}

impl From<GaussianParams> for GaussianDistribution {
    fn from(p: GaussianParams) -> Self {
        GaussianDistribution::from_parameters(p.mean, p.covariance)
    }
}

impl From<GaussianDistribution> for GaussianParams {
    fn from(g: GaussianDistribution) -> Self {
        GaussianParams {
            mean: g.mean,
            covariance: g.covariance,
        }
    }
}

impl Default for GaussianDistribution {
    fn default() -> Self {
        GaussianDistribution::from_parameters(Array1::zeros(0), Array2::zeros((0, 0)))
    }
}

impl GaussianDistribution {
    /// An empty (zero-dimensional) distribution.
    pub fn new() -> Self {
        Self::default()
    }

    /// A `dimensionality`-dimensional standard normal (zero mean, identity
    /// covariance).
    pub fn with_dimensionality(dimensionality: usize) -> Self {
        Self::from_parameters(Array1::zeros(dimensionality), Array2::eye(dimensionality))
    }

    /// Construct from an explicit mean and covariance. The covariance must
    /// be square and match the mean's length.
    pub fn from_parameters(mean: Array1<f64>, covariance: Array2<f64>) -> Self {
        assert_eq!(covariance.nrows(), covariance.ncols());
        assert_eq!(mean.len(), covariance.nrows());
        let mut g = GaussianDistribution {
            mean,
            covariance,
            chol_lower: Array2::zeros((0, 0)),
            log_det_cov: 0.0,
        };
        g.refresh_caches();
        g
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Mutable access to the mean; the mean has no derived caches.
    pub fn mean_mut(&mut self) -> &mut Array1<f64> {
        &mut self.mean
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    /// Replace the covariance, taking ownership, and recompute the cached
    /// factorization before returning. No state with stale caches is ever
    /// observable.
    pub fn set_covariance(&mut self, covariance: Array2<f64>) {
        assert_eq!(covariance.nrows(), covariance.ncols());
        assert_eq!(self.mean.len(), covariance.nrows());
        self.covariance = covariance;
        self.refresh_caches();
    }

    fn refresh_caches(&mut self) {
        match linalg::cholesky_lower(&self.covariance.view()) {
            Some(l) => {
                self.log_det_cov = 2.0 * l.diag().mapv(f64::ln).sum();
                self.chol_lower = l;
            }
            None => {
                self.chol_lower = Array2::from_elem(self.covariance.raw_dim(), f64::NAN);
                self.log_det_cov = f64::NAN;
            }
        }
    }
}

impl Distribution for GaussianDistribution {
    fn dimensionality(&self) -> usize {
        self.mean.len()
    }

    /// `-0.5 * (d*ln(2π) + ln|Σ| + (x-μ)ᵀ Σ⁻¹ (x-μ))`, with the Mahalanobis
    /// term computed through the cached Cholesky factor.
    fn log_probability(&self, observation: ArrayView1<'_, f64>) -> f64 {
        let d = self.mean.len();
        assert_eq!(
            observation.len(),
            d,
            "observation dimensionality must match the distribution"
        );
        let diff = &observation - &self.mean;
        let w = linalg::solve_lower(&self.chol_lower.view(), &diff.view());
        let mahalanobis = w.dot(&w);
        -0.5 * (d as f64 * LOG_2PI + self.log_det_cov + mahalanobis)
    }

    /// `mean + L z` for standard-normal `z`, `L` the lower Cholesky factor.
    fn random(&self, rng: &mut dyn RngCore) -> Array1<f64> {
        let d = self.mean.len();
        let z: Array1<f64> = (0..d).map(|_| rng.sample(StandardNormal)).collect();
        &self.mean + &self.chol_lower.dot(&z)
    }

    /// Empirical mean and bias-corrected (n-1) sample covariance.
    fn train(&mut self, observations: ArrayView2<'_, f64>) -> Result<()> {
        let (d, n) = (observations.nrows(), observations.ncols());
        if n == 0 {
            return Err(Error::InvalidParameter(
                "cannot fit a Gaussian to zero observations".into(),
            ));
        }

        let mut mean = Array1::zeros(d);
        for col in observations.columns() {
            mean += &col;
        }
        mean /= n as f64;

        let mut covariance = Array2::zeros((d, d));
        for col in observations.columns() {
            let diff = &col - &mean;
            for i in 0..d {
                for j in 0..d {
                    covariance[[i, j]] += diff[i] * diff[j];
                }
            }
        }
        covariance /= (n - 1).max(1) as f64;

        self.mean = mean;
        self.covariance = covariance;
        self.refresh_caches();
        debug!(dimensionality = d, samples = n, "gaussian fit complete");
        Ok(())
    }

    /// Responsibility-weighted fit: `μ = Σ wᵢxᵢ / Σ wᵢ`, covariance
    /// `Σ wᵢ (xᵢ-μ)(xᵢ-μ)ᵀ / Σ wᵢ`.
    ///
    /// Note the population normalization: unlike the unweighted path, no
    /// n-1 correction is applied. This asymmetry is calibrated behavior
    /// inherited from the reference estimator.
    fn train_weighted(
        &mut self,
        observations: ArrayView2<'_, f64>,
        weights: ArrayView1<'_, f64>,
    ) -> Result<()> {
        let (d, n) = (observations.nrows(), observations.ncols());
        check_weights(n, &weights)?;
        let total_weight = weights.sum();
        if total_weight <= 0.0 {
            return Err(Error::InvalidParameter(
                "weight vector has no positive mass".into(),
            ));
        }

        let mut mean = Array1::zeros(d);
        for (i, col) in observations.columns().into_iter().enumerate() {
            mean += &(&col * weights[i]);
        }
        mean /= total_weight;

        let mut covariance = Array2::zeros((d, d));
        for (i, col) in observations.columns().into_iter().enumerate() {
            let diff = &col - &mean;
            let w = weights[i];
            for r in 0..d {
                for c in 0..d {
                    covariance[[r, c]] += w * diff[r] * diff[c];
                }
            }
        }
        covariance /= total_weight;

        self.mean = mean;
        self.covariance = covariance;
        self.refresh_caches();
        debug!(dimensionality = d, samples = n, "weighted gaussian fit complete");
        Ok(())
    }
}

impl Archive for GaussianDistribution {
    const XML_ROOT: &'static str = "gaussian";
    const BIN_TAG: u8 = b'G';

    fn write_xml(&self, w: &mut XmlWriter) {
        w.vector("mean", &self.mean.view());
        w.matrix("covariance", &self.covariance.view());
    }

    fn read_xml(node: &XmlNode) -> Result<Self> {
        let mean = node.child("mean")?.vector()?;
        let covariance = node.child("covariance")?.matrix()?;
        if covariance.nrows() != covariance.ncols() || covariance.nrows() != mean.len() {
            return Err(Error::xml("mean and covariance shapes disagree"));
        }
        Ok(GaussianDistribution::from_parameters(mean, covariance))
    }

    fn write_bin(&self, w: &mut BinWriter) {
        w.write_vec(&self.mean.view());
        w.write_mat(&self.covariance.view());
    }

    fn read_bin(r: &mut BinReader<'_>) -> Result<Self> {
        let mean = r.read_vec()?;
        let covariance = r.read_mat()?;
        if covariance.nrows() != covariance.ncols() || covariance.nrows() != mean.len() {
            return Err(Error::binary("mean and covariance shapes disagree"));
        }
        Ok(GaussianDistribution::from_parameters(mean, covariance))
    }
}
