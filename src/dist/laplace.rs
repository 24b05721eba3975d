use crate::dist::{check_weights, Distribution};
use crate::error::{Error, Result};
use crate::serial::{Archive, BinReader, BinWriter, XmlNode, XmlWriter};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;

const LOG_2: f64 = std::f64::consts::LN_2;

/// A multivariate Laplace (double exponential) distribution with a shared
/// scale across dimensions:
///
/// `p(x) = (2b)^-d * exp(-Σ |x_i - μ_i| / b)`
///
/// The density factorizes per dimension, so evaluation is a single pass
/// over the observation. The scale must be strictly positive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaplaceDistribution {
    mean: Array1<f64>,
    scale: f64,
}

impl Default for LaplaceDistribution {
    fn default() -> Self {
        LaplaceDistribution {
            mean: Array1::zeros(0),
            scale: 1.0,
        }
    }
}

impl LaplaceDistribution {
    /// An empty (zero-dimensional) distribution with unit scale.
    pub fn new() -> Self {
        Self::default()
    }

    /// A `dimensionality`-dimensional distribution with zero mean.
    pub fn with_dimensionality(dimensionality: usize, scale: f64) -> Result<Self> {
        Self::from_parameters(Array1::zeros(dimensionality), scale)
    }

    /// Construct from an explicit mean and scale. Fails if the scale is
    /// not strictly positive.
    pub fn from_parameters(mean: Array1<f64>, scale: f64) -> Result<Self> {
        if !(scale > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "laplace scale must be positive, got {scale}"
            )));
        }
        Ok(LaplaceDistribution { mean, scale })
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn mean_mut(&mut self) -> &mut Array1<f64> {
        &mut self.mean
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f64) -> Result<()> {
        if !(scale > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "laplace scale must be positive, got {scale}"
            )));
        }
        self.scale = scale;
        Ok(())
    }
}

impl Distribution for LaplaceDistribution {
    fn dimensionality(&self) -> usize {
        self.mean.len()
    }

    fn log_probability(&self, observation: ArrayView1<'_, f64>) -> f64 {
        let d = self.mean.len();
        assert_eq!(
            observation.len(),
            d,
            "observation dimensionality must match the distribution"
        );
        let mut deviation = 0.0;
        for i in 0..d {
            deviation += (observation[i] - self.mean[i]).abs();
        }
        -(d as f64) * (LOG_2 + self.scale.ln()) - deviation / self.scale
    }

    /// Inverse-CDF sampling, per dimension:
    /// `x = μ - b * sgn(u - 1/2) * ln(1 - 2|u - 1/2|)` for uniform `u`.
    fn random(&self, rng: &mut dyn RngCore) -> Array1<f64> {
        let d = self.mean.len();
        let mut out = Array1::zeros(d);
        for i in 0..d {
            let u: f64 = rng.random::<f64>() - 0.5;
            out[i] = self.mean[i] - self.scale * u.signum() * (1.0 - 2.0 * u.abs()).ln();
        }
        out
    }

    /// Maximum-likelihood fit: the mean is the sample mean and the scale
    /// is the mean absolute deviation over all coordinates.
    fn train(&mut self, observations: ArrayView2<'_, f64>) -> Result<()> {
        let (d, n) = (observations.nrows(), observations.ncols());
        if n == 0 {
            return Err(Error::InvalidParameter(
                "cannot fit a Laplace distribution to zero observations".into(),
            ));
        }

        let mut mean = Array1::zeros(d);
        for col in observations.columns() {
            mean += &col;
        }
        mean /= n as f64;

        let mut deviation = 0.0;
        for col in observations.columns() {
            for i in 0..d {
                deviation += (col[i] - mean[i]).abs();
            }
        }
        let scale = deviation / (n * d.max(1)) as f64;
        if !(scale > 0.0) {
            return Err(Error::InvalidParameter(
                "observations have zero absolute deviation".into(),
            ));
        }

        self.mean = mean;
        self.scale = scale;
        debug!(dimensionality = d, samples = n, scale, "laplace fit complete");
        Ok(())
    }

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

        let mut deviation = 0.0;
        for (i, col) in observations.columns().into_iter().enumerate() {
            for k in 0..d {
                deviation += weights[i] * (col[k] - mean[k]).abs();
            }
        }
        let scale = deviation / (total_weight * d.max(1) as f64);
        if !(scale > 0.0) {
            return Err(Error::InvalidParameter(
                "observations have zero weighted absolute deviation".into(),
            ));
        }

        self.mean = mean;
        self.scale = scale;
        debug!(dimensionality = d, samples = n, scale, "weighted laplace fit complete");
        Ok(())
    }
}

impl Archive for LaplaceDistribution {
    const XML_ROOT: &'static str = "laplace";
    const BIN_TAG: u8 = b'L';

    fn write_xml(&self, w: &mut XmlWriter) {
        w.vector("mean", &self.mean.view());
        w.scalar("scale", self.scale);
    }

    fn read_xml(node: &XmlNode) -> Result<Self> {
        let mean = node.child("mean")?.vector()?;
        let scale = node.child("scale")?.scalar()?;
        LaplaceDistribution::from_parameters(mean, scale)
            .map_err(|_| Error::xml("laplace scale must be positive"))
    }

    fn write_bin(&self, w: &mut BinWriter) {
        w.write_vec(&self.mean.view());
        w.write_f64(self.scale);
    }

    fn read_bin(r: &mut BinReader<'_>) -> Result<Self> {
        let mean = r.read_vec()?;
        let scale = r.read_f64()?;
        LaplaceDistribution::from_parameters(mean, scale)
            .map_err(|_| Error::binary("laplace scale must be positive"))
    }
}
