use crate::dist::{check_weights, Distribution};
use crate::error::{Error, Result};
use crate::serial::{Archive, BinReader, BinWriter, XmlNode, XmlWriter};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::debug;

const LOG_2PI: f64 = 1.8378770664093454;

/// A multivariate normal distribution with axis-aligned (diagonal)
/// covariance, stored as the vector of per-dimension variances.
///
/// Density evaluation costs O(d) instead of the full-covariance O(d^2)
/// triangular solve, and sampling needs no matrix factor. The reciprocal
/// variances and log-determinant are cached and refreshed whenever the
/// covariance vector changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "DiagonalGaussianParams", into = "DiagonalGaussianParams")]
pub struct DiagonalGaussianDistribution {
    mean: Array1<f64>,
    covariance: Array1<f64>,
    // Caches derived from `covariance`.
    inv_cov: Array1<f64>,
    log_det_cov: f64,
}

/// Parameter-only shadow for serde; caches are rebuilt on load.
#[derive(Serialize, Deserialize, Clone)]
struct DiagonalGaussianParams {
    mean: Array1<f64>,
    covariance: Array1<f64>,
}

impl From<DiagonalGaussianParams> for DiagonalGaussianDistribution {
    fn from(p: DiagonalGaussianParams) -> Self {
        DiagonalGaussianDistribution::from_parameters(p.mean, p.covariance)
    }
}

impl From<DiagonalGaussianDistribution> for DiagonalGaussianParams {
    fn from(d: DiagonalGaussianDistribution) -> Self {
        DiagonalGaussianParams {
            mean: d.mean,
            covariance: d.covariance,
        }
    }
}

impl Default for DiagonalGaussianDistribution {
    fn default() -> Self {
        DiagonalGaussianDistribution::from_parameters(Array1::zeros(0), Array1::zeros(0))
    }
}

impl DiagonalGaussianDistribution {
    /// An empty (zero-dimensional) distribution.
    pub fn new() -> Self {
        Self::default()
    }

    /// A `dimensionality`-dimensional standard normal.
    pub fn with_dimensionality(dimensionality: usize) -> Self {
        Self::from_parameters(
            Array1::zeros(dimensionality),
            Array1::ones(dimensionality),
        )
    }

    /// Construct from a mean and a vector of per-dimension variances.
    pub fn from_parameters(mean: Array1<f64>, covariance: Array1<f64>) -> Self {
        assert_eq!(mean.len(), covariance.len());
        let mut d = DiagonalGaussianDistribution {
            mean,
            covariance,
            inv_cov: Array1::zeros(0),
            log_det_cov: 0.0,
        };
        d.refresh_caches();
        d
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn mean_mut(&mut self) -> &mut Array1<f64> {
        &mut self.mean
    }

    pub fn covariance(&self) -> &Array1<f64> {
        &self.covariance
    }

    /// Replace the variance vector and recompute the caches.
    pub fn set_covariance(&mut self, covariance: Array1<f64>) {
        assert_eq!(self.mean.len(), covariance.len());
        self.covariance = covariance;
        self.refresh_caches();
    }

    fn refresh_caches(&mut self) {
        self.inv_cov = self.covariance.mapv(|v| 1.0 / v);
        self.log_det_cov = self.covariance.mapv(f64::ln).sum();
    }
}

impl Distribution for DiagonalGaussianDistribution {
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
        let mut quadratic = 0.0;
        for i in 0..d {
            let diff = observation[i] - self.mean[i];
            quadratic += diff * diff * self.inv_cov[i];
        }
        -0.5 * (d as f64 * LOG_2PI + self.log_det_cov + quadratic)
    }

    fn random(&self, rng: &mut dyn RngCore) -> Array1<f64> {
        let d = self.mean.len();
        let mut out = Array1::zeros(d);
        for i in 0..d {
            let z: f64 = rng.sample(StandardNormal);
            out[i] = self.mean[i] + self.covariance[i].sqrt() * z;
        }
        out
    }

    /// Empirical mean and bias-corrected (n-1) per-dimension variances.
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

        let mut covariance = Array1::zeros(d);
        for col in observations.columns() {
            for i in 0..d {
                let diff = col[i] - mean[i];
                covariance[i] += diff * diff;
            }
        }
        covariance /= (n - 1).max(1) as f64;

        self.mean = mean;
        self.covariance = covariance;
        self.refresh_caches();
        debug!(dimensionality = d, samples = n, "diagonal gaussian fit complete");
        Ok(())
    }

    /// Weighted fit with the unbiased frequency-weight correction: for
    /// normalized weights `w̄ᵢ = wᵢ / Σwⱼ`,
    /// `σ²ₖ = Σ w̄ᵢ (xᵢₖ - μₖ)² / (1 - Σ w̄ᵢ²)`.
    ///
    /// With uniform weights this reduces exactly to the unweighted n-1
    /// estimate, unlike the full-covariance distribution's weighted path.
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
        let normalized = weights.mapv(|w| w / total_weight);
        let sum_squared: f64 = normalized.iter().map(|w| w * w).sum();
        if (1.0 - sum_squared).abs() < 1e-300 {
            return Err(Error::InvalidParameter(
                "all weight mass concentrated on a single observation".into(),
            ));
        }

        let mut mean = Array1::zeros(d);
        for (i, col) in observations.columns().into_iter().enumerate() {
            mean += &(&col * normalized[i]);
        }

        let mut covariance = Array1::zeros(d);
        for (i, col) in observations.columns().into_iter().enumerate() {
            for k in 0..d {
                let diff = col[k] - mean[k];
                covariance[k] += normalized[i] * diff * diff;
            }
        }
        covariance /= 1.0 - sum_squared;

        self.mean = mean;
        self.covariance = covariance;
        self.refresh_caches();
        debug!(dimensionality = d, samples = n, "weighted diagonal gaussian fit complete");
        Ok(())
    }
}

impl Archive for DiagonalGaussianDistribution {
    const XML_ROOT: &'static str = "diagonal_gaussian";
    const BIN_TAG: u8 = b'd';

    fn write_xml(&self, w: &mut XmlWriter) {
        w.vector("mean", &self.mean.view());
        w.vector("covariance", &self.covariance.view());
    }

    fn read_xml(node: &XmlNode) -> Result<Self> {
        let mean = node.child("mean")?.vector()?;
        let covariance = node.child("covariance")?.vector()?;
        if mean.len() != covariance.len() {
            return Err(Error::xml("mean and covariance lengths disagree"));
        }
        Ok(DiagonalGaussianDistribution::from_parameters(mean, covariance))
    }

    fn write_bin(&self, w: &mut BinWriter) {
        w.write_vec(&self.mean.view());
        w.write_vec(&self.covariance.view());
    }

    fn read_bin(r: &mut BinReader<'_>) -> Result<Self> {
        let mean = r.read_vec()?;
        let covariance = r.read_vec()?;
        if mean.len() != covariance.len() {
            return Err(Error::binary("mean and covariance lengths disagree"));
        }
        Ok(DiagonalGaussianDistribution::from_parameters(mean, covariance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn empty_constructor() {
        let d = DiagonalGaussianDistribution::new();
        assert_eq!(d.mean().len(), 0);
        assert_eq!(d.covariance().len(), 0);
    }

    #[test]
    fn dimensionality_constructor() {
        let d = DiagonalGaussianDistribution::with_dimensionality(4);
        assert_eq!(d.mean().len(), 4);
        assert_eq!(d.covariance().len(), 4);
        assert_eq!(d.dimensionality(), 4);
    }

    #[test]
    fn log_probability_matches_dmvnorm() {
        let d = DiagonalGaussianDistribution::from_parameters(
            array![2.0, 5.0, 3.0, 4.0, 1.0],
            array![3.0, 1.0, 5.0, 3.0, 2.0],
        );

        assert_relative_eq!(
            d.log_probability(array![3.0, 5.0, 2.0, 7.0, 8.0].view()),
            -20.861264167855161,
            epsilon = 1e-7
        );
        assert_relative_eq!(
            d.log_probability(array![7.0, 8.0, 4.0, 0.0, 5.0].view()),
            -22.277930834521829,
            epsilon = 1e-7
        );
        assert_relative_eq!(
            d.log_probability(array![6.0, 8.0, 7.0, 7.0, 5.0].view()),
            -21.111264167855161,
            epsilon = 1e-7
        );
        assert_relative_eq!(
            d.log_probability(array![2.0, 9.0, 5.0, 6.0, 3.0].view()),
            -16.9112641678551621,
            epsilon = 1e-7
        );
        assert_relative_eq!(
            d.log_probability(array![5.0, 8.0, 2.0, 9.0, 7.0].view()),
            -26.111264167855161,
            epsilon = 1e-7
        );
    }

    #[test]
    fn univariate_probability() {
        let mut d = DiagonalGaussianDistribution::from_parameters(array![0.0], array![1.0]);

        assert_relative_eq!(
            d.probability(array![0.0].view()),
            0.3989422804014327,
            epsilon = 1e-7
        );
        assert_relative_eq!(
            d.probability(array![1.0].view()),
            0.24197072451914337,
            epsilon = 1e-7
        );
        assert_relative_eq!(
            d.probability(array![-1.0].view()),
            0.24197072451914337,
            epsilon = 1e-7
        );

        d.set_covariance(array![2.0]);
        assert_relative_eq!(
            d.probability(array![0.0].view()),
            0.28209479177387814,
            epsilon = 1e-7
        );
        assert_relative_eq!(
            d.probability(array![1.0].view()),
            0.21969564473386122,
            epsilon = 1e-7
        );

        d.mean_mut().fill(1.0);
        d.set_covariance(array![1.0]);
        assert_relative_eq!(
            d.probability(array![0.0].view()),
            0.24197072451914337,
            epsilon = 1e-7
        );
        assert_relative_eq!(
            d.probability(array![-1.0].view()),
            0.053990966513188056,
            epsilon = 1e-7
        );

        d.set_covariance(array![2.0]);
        assert_relative_eq!(
            d.probability(array![-1.0].view()),
            0.10377687435514872,
            epsilon = 1e-7
        );
    }

    #[test]
    fn multivariate_probability() {
        let mut d = DiagonalGaussianDistribution::from_parameters(
            array![0.0, 0.0],
            array![2.0, 2.0],
        );
        assert_relative_eq!(
            d.probability(array![0.0, 0.0].view()),
            0.079577471545947673,
            epsilon = 1e-7
        );
        assert_relative_eq!(
            d.probability(array![1.0, 1.0].view()),
            0.048266176315026957,
            epsilon = 1e-7
        );

        *d.mean_mut() = array![1.0, 3.0];
        assert_relative_eq!(
            d.probability(array![1.0, 1.0].view()),
            0.029274915762159581,
            epsilon = 1e-7
        );
        assert_relative_eq!(
            d.probability(array![-1.0, -1.0].view()),
            0.00053618878559782773,
            max_relative = 1e-7
        );

        let d = DiagonalGaussianDistribution::from_parameters(
            array![1.0, 3.0, 6.0, 2.0, 7.0],
            array![3.0, 1.0, 5.0, 3.0, 2.0],
        );
        assert_relative_eq!(
            d.probability(array![2.0, 5.0, 7.0, 3.0, 8.0].view()),
            7.2790083003378082e-05,
            max_relative = 1e-7
        );
    }

    #[test]
    fn batch_log_probability() {
        let d = DiagonalGaussianDistribution::from_parameters(
            array![2.0, 5.0, 3.0, 7.0, 2.0],
            array![9.0, 2.0, 1.0, 4.0, 8.0],
        );
        let points = array![
            [3.0, 5.0, 2.0, 7.0, 5.0, 8.0],
            [2.0, 6.0, 8.0, 3.0, 4.0, 6.0],
            [1.0, 4.0, 2.0, 7.0, 8.0, 2.0],
            [6.0, 8.0, 4.0, 7.0, 9.0, 2.0],
            [4.0, 6.0, 7.0, 7.0, 3.0, 2.0]
        ];
        let phis = d.log_probability_batch(points.view());

        assert_eq!(phis.len(), 6);
        assert_relative_eq!(phis[0], -12.453302051926864, epsilon = 1e-7);
        assert_relative_eq!(phis[1], -10.147746496371308, epsilon = 1e-7);
        assert_relative_eq!(phis[2], -13.210246496371308, epsilon = 1e-7);
        assert_relative_eq!(phis[3], -19.724135385260197, epsilon = 1e-7);
        assert_relative_eq!(phis[4], -21.585246496371308, epsilon = 1e-7);
        assert_relative_eq!(phis[5], -13.647746496371308, epsilon = 1e-7);
    }

    #[test]
    fn random_recovers_parameters() {
        let mean = array![2.5, 1.25];
        let cov = array![0.50, 0.25];
        let d = DiagonalGaussianDistribution::from_parameters(mean.clone(), cov.clone());

        let mut rng = StdRng::seed_from_u64(17);
        let n = 5000;
        let mut obs = Array2::zeros((2, n));
        for i in 0..n {
            obs.column_mut(i).assign(&d.random(&mut rng));
        }

        let mut fitted = DiagonalGaussianDistribution::new();
        fitted.train(obs.view()).unwrap();

        // 10% tolerance; sampling is noisy.
        for i in 0..2 {
            assert_relative_eq!(fitted.mean()[i], mean[i], max_relative = 0.1);
            assert_relative_eq!(fitted.covariance()[i], cov[i], max_relative = 0.1);
        }
    }

    #[test]
    fn train_recovers_sample_statistics() {
        let mean = array![2.5, 1.5, 8.2, 3.1];
        let cov = array![1.2, 3.1, 8.3, 4.3];
        let gen = DiagonalGaussianDistribution::from_parameters(mean, cov);

        let mut rng = StdRng::seed_from_u64(23);
        let n = 10000;
        let mut obs = Array2::zeros((4, n));
        for i in 0..n {
            obs.column_mut(i).assign(&gen.random(&mut rng));
        }

        // Reference sample statistics computed directly.
        let mut sample_mean = Array1::zeros(4);
        for col in obs.columns() {
            sample_mean += &col;
        }
        sample_mean /= n as f64;
        let mut sample_var = Array1::<f64>::zeros(4);
        for col in obs.columns() {
            for k in 0..4 {
                let diff = col[k] - sample_mean[k];
                sample_var[k] += diff * diff;
            }
        }
        sample_var /= (n - 1) as f64;

        let mut d = DiagonalGaussianDistribution::new();
        d.train(obs.view()).unwrap();
        for k in 0..4 {
            assert_relative_eq!(d.mean()[k], sample_mean[k], epsilon = 1e-5);
            assert_relative_eq!(d.covariance()[k], sample_var[k], epsilon = 1e-5);
        }
    }

    #[test]
    fn weighted_estimator_matches_cov_wt() {
        let observations = array![
            [3.0, 5.0, 2.0, 7.0],
            [2.0, 6.0, 8.0, 3.0],
            [1.0, 4.0, 2.0, 7.0],
            [6.0, 8.0, 4.0, 7.0]
        ];
        let weights = array![0.3, 0.4, 0.1, 0.2];

        let mut d = DiagonalGaussianDistribution::new();
        d.train_weighted(observations.view(), weights.view()).unwrap();

        assert_relative_eq!(d.mean()[0], 4.5, epsilon = 1e-7);
        assert_relative_eq!(d.mean()[1], 4.4, epsilon = 1e-7);
        assert_relative_eq!(d.mean()[2], 3.5, epsilon = 1e-7);
        assert_relative_eq!(d.mean()[3], 6.8, epsilon = 1e-7);

        assert_relative_eq!(d.covariance()[0], 3.78571428571428603, epsilon = 1e-7);
        assert_relative_eq!(d.covariance()[1], 6.34285714285714253, epsilon = 1e-7);
        assert_relative_eq!(d.covariance()[2], 6.64285714285714235, epsilon = 1e-7);
        assert_relative_eq!(d.covariance()[3], 2.22857142857142865, epsilon = 1e-7);
    }

    #[test]
    fn uniform_weights_reduce_to_unweighted() {
        let gen = DiagonalGaussianDistribution::from_parameters(
            array![2.5, 1.5, 8.2, 3.1],
            array![1.2, 3.1, 8.3, 4.3],
        );
        let mut rng = StdRng::seed_from_u64(29);
        let n = 5;
        let mut obs = Array2::zeros((4, n));
        for i in 0..n {
            obs.column_mut(i).assign(&gen.random(&mut rng));
        }
        let weights = Array1::from_elem(n, 0.2);

        let mut unweighted = DiagonalGaussianDistribution::new();
        let mut weighted = DiagonalGaussianDistribution::new();
        unweighted.train(obs.view()).unwrap();
        weighted.train_weighted(obs.view(), weights.view()).unwrap();

        for k in 0..4 {
            assert_relative_eq!(weighted.mean()[k], unweighted.mean()[k], epsilon = 1e-7);
            assert_relative_eq!(
                weighted.covariance()[k],
                unweighted.covariance()[k],
                epsilon = 1e-7
            );
        }
    }
}
