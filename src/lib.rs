//! Parametric probability distributions with maximum-likelihood fitting.
//!
//! Every distribution implements the [`Distribution`] trait: log-space
//! density evaluation, sampling through a caller-supplied RNG, and both
//! unweighted and responsibility-weighted training over column-major
//! observation matrices. The [`Archive`] trait adds three interchangeable
//! persistence encodings (XML, JSON, binary) on top of serde.
//!
//! ```no_run
//! use distfit::{Distribution, GaussianDistribution};
//! use ndarray::array;
//!
//! let mut g = GaussianDistribution::new();
//! let data = array![[1.0, 2.0, 1.5], [0.2, 0.3, 0.1]];
//! g.train(data.view())?;
//! let density = g.probability(array![1.5, 0.2].view());
//! # Ok::<(), distfit::Error>(())
//! ```

pub mod dist;
pub mod error;
pub mod linalg;
pub mod serial;

pub use dist::{
    DiagonalGaussianDistribution, DiscreteDistribution, Distribution, GammaDistribution,
    GaussianDistribution, LaplaceDistribution, LinearRegression, RegressionDistribution,
};
pub use error::{Error, Result};
pub use serial::Archive;
