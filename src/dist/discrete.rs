use crate::dist::{check_weights, Distribution};
use crate::error::{Error, Result};
use crate::serial::{Archive, BinReader, BinWriter, XmlNode, XmlWriter};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// A categorical distribution over one or more independent dimensions, each
/// with its own finite support.
///
/// An observation is a vector of non-negative integer-valued indices, one
/// per dimension; the joint probability is the product of the per-dimension
/// probabilities at those indices. Observation values are rounded to the
/// nearest index, so integer data stored as floats is handled exactly.
/// Out-of-range indices are a caller error and panic; there is no clamping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscreteDistribution {
    /// One probability vector per dimension, each summing to 1.
    probabilities: Vec<Array1<f64>>,
}

impl DiscreteDistribution {
    /// A single-dimension uniform distribution over `num_observations`
    /// possible values.
    pub fn new(num_observations: usize) -> Self {
        Self::with_dimensions(&[num_observations])
    }

    /// A multi-dimensional uniform distribution; `sizes[k]` is the support
    /// size of dimension `k`.
    pub fn with_dimensions(sizes: &[usize]) -> Self {
        let probabilities = sizes
            .iter()
            .map(|&m| Array1::from_elem(m, 1.0 / m as f64))
            .collect();
        DiscreteDistribution { probabilities }
    }

    /// Construct from explicit per-dimension probability vectors, normalized
    /// so each sums to 1.
    pub fn from_probabilities(probabilities: Vec<Array1<f64>>) -> Self {
        let probabilities = probabilities
            .into_iter()
            .map(|p| {
                let total = p.sum();
                if total > 0.0 {
                    p / total
                } else {
                    Array1::from_elem(p.len(), 1.0 / p.len() as f64)
                }
            })
            .collect();
        DiscreteDistribution { probabilities }
    }

    /// Probability vector of dimension `dim`.
    pub fn probabilities(&self, dim: usize) -> &Array1<f64> {
        &self.probabilities[dim]
    }

    /// Replace the probability vector of dimension `dim` (normalized). The
    /// support size of the dimension must not change.
    pub fn set_probabilities(&mut self, dim: usize, probabilities: Array1<f64>) {
        assert_eq!(
            probabilities.len(),
            self.probabilities[dim].len(),
            "support size of a dimension is fixed at construction"
        );
        let total = probabilities.sum();
        self.probabilities[dim] = if total > 0.0 {
            probabilities / total
        } else {
            Array1::from_elem(probabilities.len(), 1.0 / probabilities.len() as f64)
        };
    }

    fn index_of(value: f64) -> usize {
        (value + 0.5) as usize
    }

    fn accumulate(
        &mut self,
        observations: ArrayView2<'_, f64>,
        weight_of: impl Fn(usize) -> f64,
    ) {
        for (dim, probs) in self.probabilities.iter_mut().enumerate() {
            probs.fill(0.0);
            for (i, col) in observations.columns().into_iter().enumerate() {
                probs[Self::index_of(col[dim])] += weight_of(i);
            }
            let total = probs.sum();
            if total > 0.0 {
                *probs /= total;
            } else {
                // No observed mass in this dimension; fall back to uniform.
                probs.fill(1.0 / probs.len() as f64);
            }
        }
        trace!(dimensions = self.probabilities.len(), "discrete fit complete");
    }
}

impl Distribution for DiscreteDistribution {
    fn dimensionality(&self) -> usize {
        self.probabilities.len()
    }

    fn log_probability(&self, observation: ArrayView1<'_, f64>) -> f64 {
        self.probability(observation).ln()
    }

    /// Product of per-dimension probabilities, computed directly so exact
    /// stored values (and exact zeros) pass through untouched.
    fn probability(&self, observation: ArrayView1<'_, f64>) -> f64 {
        assert_eq!(
            observation.len(),
            self.probabilities.len(),
            "observation dimensionality must match the distribution"
        );
        self.probabilities
            .iter()
            .zip(observation.iter())
            .map(|(probs, &value)| probs[Self::index_of(value)])
            .product()
    }

    /// Draw one observation by per-dimension inverse-CDF sampling.
    fn random(&self, rng: &mut dyn RngCore) -> Array1<f64> {
        let mut observation = Array1::zeros(self.probabilities.len());
        for (dim, probs) in self.probabilities.iter().enumerate() {
            let target: f64 = rng.random();
            let mut cumulative = 0.0;
            let mut drawn = probs.len() - 1;
            for (index, &p) in probs.iter().enumerate() {
                cumulative += p;
                if target <= cumulative {
                    drawn = index;
                    break;
                }
            }
            observation[dim] = drawn as f64;
        }
        observation
    }

    /// Empirical frequency estimate per dimension.
    fn train(&mut self, observations: ArrayView2<'_, f64>) -> Result<()> {
        if observations.nrows() != self.probabilities.len() {
            return Err(Error::DimensionMismatch {
                expected: self.probabilities.len(),
                actual: observations.nrows(),
            });
        }
        self.accumulate(observations, |_| 1.0);
        Ok(())
    }

    /// Weighted frequency estimate: each column contributes its weight to
    /// the count of its index. Indices with no (weighted) mass keep
    /// probability zero.
    fn train_weighted(
        &mut self,
        observations: ArrayView2<'_, f64>,
        weights: ArrayView1<'_, f64>,
    ) -> Result<()> {
        if observations.nrows() != self.probabilities.len() {
            return Err(Error::DimensionMismatch {
                expected: self.probabilities.len(),
                actual: observations.nrows(),
            });
        }
        check_weights(observations.ncols(), &weights)?;
        self.accumulate(observations, |i| weights[i]);
        Ok(())
    }
}

impl Archive for DiscreteDistribution {
    const XML_ROOT: &'static str = "discrete";
    const BIN_TAG: u8 = b'D';

    fn write_xml(&self, w: &mut XmlWriter) {
        for probs in &self.probabilities {
            w.vector("dimension", &probs.view());
        }
    }

    fn read_xml(node: &XmlNode) -> Result<Self> {
        let probabilities: Result<Vec<Array1<f64>>> = node
            .children_named("dimension")
            .map(|c| c.vector())
            .collect();
        let probabilities = probabilities?;
        if probabilities.is_empty() {
            return Err(Error::xml("discrete distribution has no dimensions"));
        }
        Ok(DiscreteDistribution { probabilities })
    }

    fn write_bin(&self, w: &mut BinWriter) {
        w.write_u64(self.probabilities.len() as u64);
        for probs in &self.probabilities {
            w.write_vec(&probs.view());
        }
    }

    fn read_bin(r: &mut BinReader<'_>) -> Result<Self> {
        let dims = r.read_u64()? as usize;
        let mut probabilities = Vec::with_capacity(dims.min(1 << 20));
        for _ in 0..dims {
            probabilities.push(r.read_vec()?);
        }
        Ok(DiscreteDistribution { probabilities })
    }
}
