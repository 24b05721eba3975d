use crate::dist::{check_weights, Distribution, GaussianDistribution};
use crate::error::{Error, Result};
use crate::linalg;
use crate::serial::{Archive, BinReader, BinWriter, XmlNode, XmlWriter};
use ndarray::{array, Array1, Array2, ArrayView1, ArrayView2};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ridge-regularized linear regression with an intercept term.
///
/// Parameters are stored with the intercept first, so `parameters[0]` is
/// the intercept and `parameters[1..]` are the predictor coefficients. The
/// ridge penalty `lambda` is not applied to the intercept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearRegression {
    parameters: Array1<f64>,
    lambda: f64,
}

impl LinearRegression {
    pub fn new(lambda: f64) -> Self {
        LinearRegression {
            parameters: Array1::zeros(0),
            lambda,
        }
    }

    pub fn parameters(&self) -> &Array1<f64> {
        &self.parameters
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Fit by solving the normal equations of the intercept-augmented
    /// design: `(X' W X'^T + λ I') p = X' W y`, with `I'` zeroed in the
    /// intercept entry. `weights` of `None` means an unweighted fit.
    pub fn train(
        &mut self,
        predictors: ArrayView2<'_, f64>,
        responses: ArrayView1<'_, f64>,
        weights: Option<ArrayView1<'_, f64>>,
    ) -> Result<()> {
        let (d, n) = (predictors.nrows(), predictors.ncols());
        if responses.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: responses.len(),
            });
        }
        if let Some(w) = &weights {
            check_weights(n, w)?;
        }

        let p = d + 1;
        let mut gram = Array2::zeros((p, p));
        let mut moment = Array1::zeros(p);
        let mut augmented = Array1::zeros(p);
        for i in 0..n {
            augmented[0] = 1.0;
            for k in 0..d {
                augmented[k + 1] = predictors[[k, i]];
            }
            let w = weights.as_ref().map_or(1.0, |w| w[i]);
            for r in 0..p {
                for c in 0..p {
                    gram[[r, c]] += w * augmented[r] * augmented[c];
                }
                moment[r] += w * augmented[r] * responses[i];
            }
        }
        for r in 1..p {
            gram[[r, r]] += self.lambda;
        }

        self.parameters = linalg::solve_spd(&gram.view(), &moment.view()).ok_or_else(|| {
            Error::InvalidParameter(
                "regression normal equations are singular; increase lambda or add data".into(),
            )
        })?;
        Ok(())
    }

    /// Predicted response for a single predictor point.
    pub fn predict(&self, point: ArrayView1<'_, f64>) -> f64 {
        assert_eq!(
            point.len() + 1,
            self.parameters.len(),
            "predictor dimensionality must match the fitted model"
        );
        let mut y = self.parameters[0];
        for k in 0..point.len() {
            y += self.parameters[k + 1] * point[k];
        }
        y
    }
}

/// A conditional distribution over responses: a linear regression function
/// plus a univariate Gaussian over its residuals.
///
/// Observations are laid out with the response in the first coordinate and
/// the predictors in the rest, so the distribution plugs into code that
/// handles unconditional distributions over column vectors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegressionDistribution {
    rf: LinearRegression,
    err: GaussianDistribution,
}

impl RegressionDistribution {
    /// Fit a new distribution to predictor columns and their responses.
    pub fn new(
        predictors: ArrayView2<'_, f64>,
        responses: ArrayView1<'_, f64>,
        lambda: f64,
    ) -> Result<Self> {
        let mut rd = RegressionDistribution {
            rf: LinearRegression::new(lambda),
            err: GaussianDistribution::new(),
        };
        rd.fit(predictors, responses, None)?;
        Ok(rd)
    }

    /// The fitted regression function.
    pub fn rf(&self) -> &LinearRegression {
        &self.rf
    }

    /// The fitted residual distribution.
    pub fn err(&self) -> &GaussianDistribution {
        &self.err
    }

    /// Predicted response for a single predictor point.
    pub fn predict(&self, point: ArrayView1<'_, f64>) -> f64 {
        self.rf.predict(point)
    }

    fn fit(
        &mut self,
        predictors: ArrayView2<'_, f64>,
        responses: ArrayView1<'_, f64>,
        weights: Option<ArrayView1<'_, f64>>,
    ) -> Result<()> {
        self.rf.train(predictors, responses, weights)?;

        let n = predictors.ncols();
        let mut residuals = Array2::zeros((1, n));
        for i in 0..n {
            residuals[[0, i]] = responses[i] - self.rf.predict(predictors.column(i));
        }
        match weights {
            Some(w) => self.err.train_weighted(residuals.view(), w)?,
            None => self.err.train(residuals.view())?,
        }
        debug!(
            predictors = predictors.nrows(),
            samples = n,
            "regression distribution fit complete"
        );
        Ok(())
    }
}

impl Distribution for RegressionDistribution {
    /// Length of a full observation vector, response included.
    fn dimensionality(&self) -> usize {
        self.rf.parameters().len()
    }

    /// Density of the residual `y - f(x)` under the error distribution,
    /// where the observation is `[y, x...]`.
    fn log_probability(&self, observation: ArrayView1<'_, f64>) -> f64 {
        let residual = observation[0] - self.rf.predict(observation.slice(ndarray::s![1..]));
        self.err.log_probability(array![residual].view())
    }

    /// Sample an observation at the origin of predictor space: all
    /// predictors zero, response drawn as intercept plus residual noise.
    fn random(&self, rng: &mut dyn RngCore) -> Array1<f64> {
        let mut out = Array1::zeros(self.dimensionality());
        out[0] = self.rf.parameters()[0] + self.err.random(rng)[0];
        out
    }

    fn train(&mut self, observations: ArrayView2<'_, f64>) -> Result<()> {
        if observations.nrows() == 0 {
            return Err(Error::InvalidParameter(
                "regression observations need a response row".into(),
            ));
        }
        let responses = observations.row(0);
        let predictors = observations.slice(ndarray::s![1.., ..]);
        self.fit(predictors, responses, None)
    }

    fn train_weighted(
        &mut self,
        observations: ArrayView2<'_, f64>,
        weights: ArrayView1<'_, f64>,
    ) -> Result<()> {
        if observations.nrows() == 0 {
            return Err(Error::InvalidParameter(
                "regression observations need a response row".into(),
            ));
        }
        let responses = observations.row(0);
        let predictors = observations.slice(ndarray::s![1.., ..]);
        self.fit(predictors, responses, Some(weights))
    }
}

impl Archive for RegressionDistribution {
    const XML_ROOT: &'static str = "regression";
    const BIN_TAG: u8 = b'R';

    fn write_xml(&self, w: &mut XmlWriter) {
        w.vector("parameters", &self.rf.parameters.view());
        w.scalar("lambda", self.rf.lambda);
        w.vector("error_mean", &self.err.mean().view());
        w.matrix("error_covariance", &self.err.covariance().view());
    }

    fn read_xml(node: &XmlNode) -> Result<Self> {
        let parameters = node.child("parameters")?.vector()?;
        let lambda = node.child("lambda")?.scalar()?;
        let error_mean = node.child("error_mean")?.vector()?;
        let error_covariance = node.child("error_covariance")?.matrix()?;
        if error_covariance.nrows() != error_covariance.ncols()
            || error_covariance.nrows() != error_mean.len()
        {
            return Err(Error::xml("error distribution shapes disagree"));
        }
        Ok(RegressionDistribution {
            rf: LinearRegression { parameters, lambda },
            err: GaussianDistribution::from_parameters(error_mean, error_covariance),
        })
    }

    fn write_bin(&self, w: &mut BinWriter) {
        w.write_vec(&self.rf.parameters.view());
        w.write_f64(self.rf.lambda);
        w.write_vec(&self.err.mean().view());
        w.write_mat(&self.err.covariance().view());
    }

    fn read_bin(r: &mut BinReader<'_>) -> Result<Self> {
        let parameters = r.read_vec()?;
        let lambda = r.read_f64()?;
        let error_mean = r.read_vec()?;
        let error_covariance = r.read_mat()?;
        if error_covariance.nrows() != error_covariance.ncols()
            || error_covariance.nrows() != error_mean.len()
        {
            return Err(Error::binary("error distribution shapes disagree"));
        }
        Ok(RegressionDistribution {
            rf: LinearRegression { parameters, lambda },
            err: GaussianDistribution::from_parameters(error_mean, error_covariance),
        })
    }
}
