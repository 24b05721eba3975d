use crate::dist::{check_weights, Distribution};
use crate::error::{Error, Result};
use crate::serial::{Archive, BinReader, BinWriter, XmlNode, XmlWriter};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::RngCore;
use rand_distr::Distribution as _;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::{digamma, ln_gamma};
use tracing::debug;

/// Convergence tolerance for the Newton iteration on the shape parameter.
const SHAPE_TOL: f64 = 1e-8;
/// Iteration cap for the Newton solve.
const SHAPE_MAX_ITER: usize = 50;

/// A product of independent gamma distributions, one per dimension, in the
/// shape/scale parameterization:
///
/// `p(x) = Π x_i^(α_i - 1) exp(-x_i / β_i) / (Γ(α_i) β_i^α_i)`
///
/// Fitting maximizes the likelihood with the Newton iteration of Minka,
/// "Estimating a Gamma distribution" (2002), which converges in a handful
/// of steps from a closed-form starting point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GammaDistribution {
    alpha: Array1<f64>,
    beta: Array1<f64>,
}

impl GammaDistribution {
    /// An empty (zero-dimensional) distribution.
    pub fn new() -> Self {
        Self::default()
    }

    /// A `dimensionality`-dimensional distribution with unit shape and
    /// scale in every dimension.
    pub fn with_dimensionality(dimensionality: usize) -> Self {
        GammaDistribution {
            alpha: Array1::ones(dimensionality),
            beta: Array1::ones(dimensionality),
        }
    }

    /// Construct from explicit shape (`alpha`) and scale (`beta`) vectors.
    /// Every entry of both must be strictly positive.
    pub fn from_parameters(alpha: Array1<f64>, beta: Array1<f64>) -> Result<Self> {
        if alpha.len() != beta.len() {
            return Err(Error::InvalidParameter(
                "alpha and beta must have the same length".into(),
            ));
        }
        if alpha.iter().chain(beta.iter()).any(|&v| !(v > 0.0)) {
            return Err(Error::InvalidParameter(
                "gamma shape and scale parameters must be positive".into(),
            ));
        }
        Ok(GammaDistribution { alpha, beta })
    }

    /// Construct by fitting to the given column-major observations.
    pub fn from_data(observations: ArrayView2<'_, f64>) -> Result<Self> {
        let mut d = GammaDistribution::new();
        d.train(observations)?;
        Ok(d)
    }

    /// Shape parameter of dimension `dim`.
    pub fn alpha(&self, dim: usize) -> f64 {
        self.alpha[dim]
    }

    /// Scale parameter of dimension `dim`.
    pub fn beta(&self, dim: usize) -> f64 {
        self.beta[dim]
    }

    /// Log density of a single value in a single dimension. Values outside
    /// the positive support have zero density.
    pub fn log_probability_single(&self, x: f64, dim: usize) -> f64 {
        if x <= 0.0 {
            return f64::NEG_INFINITY;
        }
        let (a, b) = (self.alpha[dim], self.beta[dim]);
        (a - 1.0) * x.ln() - x / b - ln_gamma(a) - a * b.ln()
    }

    /// Density of a single value in a single dimension.
    pub fn probability_single(&self, x: f64, dim: usize) -> f64 {
        self.log_probability_single(x, dim).exp()
    }

    /// Fit from sufficient statistics instead of raw data: `log_meanx` is
    /// `ln(mean(x))`, `mean_logx` is `mean(ln x)` and `meanx` is `mean(x)`,
    /// each per dimension. `train` funnels through this, so results are
    /// bit-identical between the two paths.
    pub fn train_statistics(
        &mut self,
        log_meanx: ArrayView1<'_, f64>,
        mean_logx: ArrayView1<'_, f64>,
        meanx: ArrayView1<'_, f64>,
    ) -> Result<()> {
        let d = log_meanx.len();
        if mean_logx.len() != d || meanx.len() != d {
            return Err(Error::DimensionMismatch {
                expected: d,
                actual: mean_logx.len().max(meanx.len()),
            });
        }

        let mut alpha = Array1::zeros(d);
        let mut beta = Array1::zeros(d);
        for i in 0..d {
            let a = solve_shape(log_meanx[i] - mean_logx[i])?;
            alpha[i] = a;
            beta[i] = meanx[i] / a;
        }
        self.alpha = alpha;
        self.beta = beta;
        debug!(dimensionality = d, "gamma fit complete");
        Ok(())
    }
}

/// Solve `ln(a) - ψ(a) = s` for the shape `a` by Newton iteration, starting
/// from Minka's closed-form approximation.
fn solve_shape(s: f64) -> Result<f64> {
    if !(s > 1e-15) {
        return Err(Error::InvalidParameter(format!(
            "gamma fitting statistic ln(mean(x)) - mean(ln(x)) must be positive, got {s}"
        )));
    }

    let mut a = (3.0 - s + ((s - 3.0) * (s - 3.0) + 24.0 * s).sqrt()) / (12.0 * s);
    for _ in 0..SHAPE_MAX_ITER {
        let f = a.ln() - digamma(a) - s;
        let df = 1.0 / a - trigamma(a);
        let next = a - f / df;
        if (next - a).abs() / a.abs() < SHAPE_TOL {
            return Ok(next);
        }
        a = next;
    }
    Err(Error::NoConvergence {
        what: "gamma shape estimate",
        iterations: SHAPE_MAX_ITER,
    })
}

/// ψ'(x) via the recurrence `ψ'(x) = ψ'(x+1) + 1/x²` and the asymptotic
/// series for large argument.
fn trigamma(mut x: f64) -> f64 {
    let mut acc = 0.0;
    while x < 6.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    acc + inv
        + inv2
            * (0.5
                + inv * (1.0 / 6.0 - inv2 * (1.0 / 30.0 - inv2 * (1.0 / 42.0 - inv2 / 30.0))))
}

impl Distribution for GammaDistribution {
    fn dimensionality(&self) -> usize {
        self.alpha.len()
    }

    /// Log density of a full observation, summed over the independent
    /// per-dimension factors.
    fn log_probability(&self, observation: ArrayView1<'_, f64>) -> f64 {
        let d = self.alpha.len();
        assert_eq!(
            observation.len(),
            d,
            "observation dimensionality must match the distribution"
        );
        (0..d)
            .map(|i| self.log_probability_single(observation[i], i))
            .sum()
    }

    fn random(&self, rng: &mut dyn RngCore) -> Array1<f64> {
        let d = self.alpha.len();
        let mut out = Array1::zeros(d);
        for i in 0..d {
            if let Ok(g) = rand_distr::Gamma::new(self.alpha[i], self.beta[i]) {
                out[i] = g.sample(rng);
            }
        }
        out
    }

    /// Maximum-likelihood fit via per-dimension sufficient statistics.
    /// All observations must be strictly positive.
    fn train(&mut self, observations: ArrayView2<'_, f64>) -> Result<()> {
        let (d, n) = (observations.nrows(), observations.ncols());
        if n == 0 {
            return Err(Error::InvalidParameter(
                "cannot fit a gamma distribution to zero observations".into(),
            ));
        }
        if observations.iter().any(|&v| !(v > 0.0)) {
            return Err(Error::InvalidParameter(
                "gamma observations must be strictly positive".into(),
            ));
        }

        let mut meanx = Array1::zeros(d);
        let mut mean_logx = Array1::zeros(d);
        for col in observations.columns() {
            for i in 0..d {
                meanx[i] += col[i];
                mean_logx[i] += col[i].ln();
            }
        }
        meanx /= n as f64;
        mean_logx /= n as f64;
        let log_meanx = meanx.mapv(f64::ln);

        self.train_statistics(log_meanx.view(), mean_logx.view(), meanx.view())
    }

    /// Weighted maximum-likelihood fit: the sufficient statistics become
    /// weighted averages, normalized by the total weight.
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
        if observations.iter().any(|&v| !(v > 0.0)) {
            return Err(Error::InvalidParameter(
                "gamma observations must be strictly positive".into(),
            ));
        }

        let mut meanx = Array1::zeros(d);
        let mut mean_logx = Array1::zeros(d);
        for (i, col) in observations.columns().into_iter().enumerate() {
            let w = weights[i];
            for k in 0..d {
                meanx[k] += w * col[k];
                mean_logx[k] += w * col[k].ln();
            }
        }
        meanx /= total_weight;
        mean_logx /= total_weight;
        let log_meanx = meanx.mapv(f64::ln);

        self.train_statistics(log_meanx.view(), mean_logx.view(), meanx.view())
    }
}

impl Archive for GammaDistribution {
    const XML_ROOT: &'static str = "gamma";
    const BIN_TAG: u8 = b'g';

    fn write_xml(&self, w: &mut XmlWriter) {
        w.vector("alpha", &self.alpha.view());
        w.vector("beta", &self.beta.view());
    }

    fn read_xml(node: &XmlNode) -> Result<Self> {
        let alpha = node.child("alpha")?.vector()?;
        let beta = node.child("beta")?.vector()?;
        GammaDistribution::from_parameters(alpha, beta)
            .map_err(|_| Error::xml("gamma parameters must be positive vectors of equal length"))
    }

    fn write_bin(&self, w: &mut BinWriter) {
        w.write_vec(&self.alpha.view());
        w.write_vec(&self.beta.view());
    }

    fn read_bin(r: &mut BinReader<'_>) -> Result<Self> {
        let alpha = r.read_vec()?;
        let beta = r.read_vec()?;
        GammaDistribution::from_parameters(alpha, beta)
            .map_err(|_| Error::binary("gamma parameters must be positive vectors of equal length"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sample_matrix(gen: &GammaDistribution, n: usize, rng: &mut StdRng) -> Array2<f64> {
        let mut data = Array2::zeros((gen.dimensionality(), n));
        for i in 0..n {
            data.column_mut(i).assign(&gen.random(rng));
        }
        data
    }

    #[test]
    fn probability_single_dimension() {
        let d1 = GammaDistribution::from_parameters(array![2.0], array![0.9]).unwrap();
        assert_relative_eq!(d1.probability_single(2.0, 0), 0.267575, max_relative = 1e-5);

        let d2 = GammaDistribution::from_parameters(array![3.1], array![1.4]).unwrap();
        assert_relative_eq!(d2.probability_single(2.94, 0), 0.189043, max_relative = 1e-5);
        assert_relative_eq!(
            d2.probability(array![2.94].view()),
            d2.probability_single(2.94, 0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn probability_is_product_over_dimensions() {
        let d = GammaDistribution::from_parameters(array![2.0, 3.1], array![0.9, 1.4]).unwrap();
        let points = array![[2.0, 2.94], [2.0, 2.94]];
        let probs = d.probability_batch(points.view());
        assert_relative_eq!(probs[0], 0.04408, max_relative = 1e-3);
        assert_relative_eq!(probs[1], 0.026165, max_relative = 1e-3);
    }

    #[test]
    fn log_probability_matches_probability() {
        let d = GammaDistribution::from_parameters(array![2.0, 3.1], array![0.9, 1.4]).unwrap();
        let points = array![[2.0, 2.94], [2.0, 2.94]];
        let logs = d.log_probability_batch(points.view());
        assert_relative_eq!(logs[0], 0.04408_f64.ln(), max_relative = 1e-3);
        assert_relative_eq!(logs[1], 0.026165_f64.ln(), max_relative = 1e-3);
    }

    #[test]
    fn out_of_support_has_zero_density() {
        let d = GammaDistribution::from_parameters(array![2.0], array![0.9]).unwrap();
        assert_eq!(d.log_probability_single(0.0, 0), f64::NEG_INFINITY);
        assert_eq!(d.log_probability_single(-3.0, 0), f64::NEG_INFINITY);
        assert_eq!(d.probability_single(-3.0, 0), 0.0);
    }

    #[test]
    fn fitting_recovers_parameters() {
        let mut rng = StdRng::seed_from_u64(41);

        let gen = GammaDistribution::from_parameters(array![5.3], array![1.5]).unwrap();
        let data = sample_matrix(&gen, 5000, &mut rng);
        let fitted = GammaDistribution::from_data(data.view()).unwrap();
        assert_relative_eq!(fitted.alpha(0), 5.3, max_relative = 0.1);
        assert_relative_eq!(fitted.beta(0), 1.5, max_relative = 0.1);

        // Different parameter set, to catch a solver stuck at one point.
        let gen2 = GammaDistribution::from_parameters(array![7.2], array![0.9]).unwrap();
        let data2 = sample_matrix(&gen2, 5000, &mut rng);
        let fitted2 = GammaDistribution::from_data(data2.view()).unwrap();
        assert_relative_eq!(fitted2.alpha(0), 7.2, max_relative = 0.1);
        assert_relative_eq!(fitted2.beta(0), 0.9, max_relative = 0.1);
    }

    #[test]
    fn train_resizes_across_calls() {
        let mut rng = StdRng::seed_from_u64(43);
        let gen = GammaDistribution::from_parameters(array![5.3, 5.3], array![1.5, 1.5]).unwrap();
        let data = sample_matrix(&gen, 200, &mut rng);

        let mut d = GammaDistribution::new();
        d.train(data.view()).unwrap();
        assert_eq!(d.dimensionality(), 2);

        let gen4 = GammaDistribution::from_parameters(
            array![5.3, 5.3, 5.3, 5.3],
            array![1.5, 1.5, 1.5, 1.5],
        )
        .unwrap();
        let data4 = sample_matrix(&gen4, 350, &mut rng);
        d.train(data4.view()).unwrap();
        assert_eq!(d.dimensionality(), 4);
    }

    #[test]
    fn train_constructor_matches_train() {
        let mut rng = StdRng::seed_from_u64(47);
        let mut data = Array2::zeros((10, 500));
        for v in data.iter_mut() {
            *v = rng.random::<f64>() + 1e-6;
        }

        let d1 = GammaDistribution::from_data(data.view()).unwrap();
        let mut d2 = GammaDistribution::new();
        d2.train(data.view()).unwrap();

        for i in 0..10 {
            assert_relative_eq!(d1.alpha(i), d2.alpha(i), epsilon = 1e-12);
            assert_relative_eq!(d1.beta(i), d2.beta(i), epsilon = 1e-12);
        }
    }

    #[test]
    fn statistics_path_matches_data_path() {
        let mut rng = StdRng::seed_from_u64(53);
        let n = 500;
        let mut data = Array2::zeros((1, n));
        for v in data.iter_mut() {
            *v = rng.random::<f64>() + 1e-6;
        }

        let d1 = GammaDistribution::from_data(data.view()).unwrap();

        let meanx = array![data.row(0).sum() / n as f64];
        let mean_logx = array![data.row(0).mapv(f64::ln).sum() / n as f64];
        let log_meanx = meanx.mapv(f64::ln);

        let mut d2 = GammaDistribution::new();
        d2.train_statistics(log_meanx.view(), mean_logx.view(), meanx.view())
            .unwrap();

        assert_relative_eq!(d1.alpha(0), d2.alpha(0), epsilon = 1e-7);
        assert_relative_eq!(d1.beta(0), d2.beta(0), epsilon = 1e-7);
    }

    #[test]
    fn unit_weights_match_unweighted() {
        let mut rng = StdRng::seed_from_u64(59);
        let gen = GammaDistribution::from_parameters(array![5.4, 5.4], array![6.7, 6.7]).unwrap();
        let data = sample_matrix(&gen, 1000, &mut rng);
        let weights = Array1::ones(1000);

        let mut d1 = GammaDistribution::new();
        d1.train(data.view()).unwrap();
        let mut d2 = GammaDistribution::new();
        d2.train_weighted(data.view(), weights.view()).unwrap();

        for i in 0..2 {
            assert_relative_eq!(d1.alpha(i), d2.alpha(i), epsilon = 1e-7);
            assert_relative_eq!(d1.beta(i), d2.beta(i), epsilon = 1e-7);
        }
    }

    #[test]
    fn random_weights_approximate_unweighted() {
        let mut rng = StdRng::seed_from_u64(61);
        let gen = GammaDistribution::from_parameters(array![5.4, 5.4], array![6.7, 6.7]).unwrap();
        let n = 50000;
        let data = sample_matrix(&gen, n, &mut rng);
        let weights: Array1<f64> = (0..n).map(|_| rng.random::<f64>()).collect();

        let mut weighted = GammaDistribution::new();
        weighted.train_weighted(data.view(), weights.view()).unwrap();
        let mut unweighted = GammaDistribution::new();
        unweighted.train(data.view()).unwrap();

        for i in 0..2 {
            assert_relative_eq!(weighted.alpha(i), unweighted.alpha(i), max_relative = 0.015);
            assert_relative_eq!(weighted.beta(i), unweighted.beta(i), max_relative = 0.015);
            assert_relative_eq!(weighted.alpha(i), 5.4, max_relative = 0.03);
            assert_relative_eq!(weighted.beta(i), 6.7, max_relative = 0.03);
        }
    }

    #[test]
    fn weighted_fit_prefers_high_weight_component() {
        let mut rng = StdRng::seed_from_u64(67);
        let gen1 = GammaDistribution::from_parameters(array![5.4, 5.4], array![6.7, 6.7]).unwrap();
        let gen2 = GammaDistribution::from_parameters(array![1.9, 1.9], array![8.4, 8.4]).unwrap();

        let n = 50000;
        let mut data = Array2::zeros((2, n));
        let mut weights = Array1::zeros(n);
        for i in 0..n {
            if i % 2 == 0 {
                data.column_mut(i).assign(&gen1.random(&mut rng));
                weights[i] = 0.02 * rng.random::<f64>();
            } else {
                data.column_mut(i).assign(&gen2.random(&mut rng));
                weights[i] = 0.98 + 0.02 * rng.random::<f64>();
            }
        }

        let mut fitted = GammaDistribution::new();
        fitted.train_weighted(data.view(), weights.view()).unwrap();
        for i in 0..2 {
            assert_relative_eq!(fitted.alpha(i), 1.9, max_relative = 0.075);
            assert_relative_eq!(fitted.beta(i), 8.4, max_relative = 0.075);
        }
    }

    #[test]
    fn random_points_refit_close() {
        let mut rng = StdRng::seed_from_u64(71);
        let gen = GammaDistribution::from_parameters(
            array![2.0, 2.5, 3.0],
            array![0.4, 0.6, 1.3],
        )
        .unwrap();
        let data = sample_matrix(&gen, 4000, &mut rng);

        let fitted = GammaDistribution::from_data(data.view()).unwrap();
        for i in 0..3 {
            assert_relative_eq!(fitted.alpha(i), gen.alpha(i), max_relative = 0.15);
            assert_relative_eq!(fitted.beta(i), gen.beta(i), max_relative = 0.15);
        }
    }

    #[test]
    fn degenerate_data_is_rejected() {
        // Constant data has zero spread and no ML solution.
        let data = Array2::from_elem((1, 10), 3.5);
        let mut d = GammaDistribution::new();
        assert!(d.train(data.view()).is_err());

        let with_zero = array![[1.0, 2.0, 0.0]];
        assert!(d.train(with_zero.view()).is_err());
    }
}
