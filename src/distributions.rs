//! The distribution capability consumed by statements, plus a small set
//! of reference distributions.

use std::{fmt::Debug, sync::Arc};

use itertools::izip;
use rand::RngCore;
use rand_distr::Distribution as _;

use crate::{
    error::{PplError, Result},
    math::{ln_beta, ln_gamma},
    transform::Support,
    value::{Shape, Value},
};

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// A probability distribution over model values.
pub trait Distribution: Debug + Send + Sync {
    /// Log density (or mass) of `value`. Values outside the support give
    /// negative infinity, values of the wrong shape are an error.
    fn logpdf(&self, value: &Value) -> Result<f64>;

    fn sample(&self, rng: &mut dyn RngCore) -> Value;

    /// Shape of the values this distribution produces.
    fn shape(&self) -> Shape {
        Shape::Scalar
    }

    fn support(&self) -> Support {
        Support::Real
    }
}

fn expect_scalar(value: &Value) -> Result<f64> {
    value.as_scalar().ok_or(PplError::ShapeMismatch {
        expected: Shape::Scalar,
        got: value.shape(),
    })
}

fn expect_vector(value: &Value, len: usize) -> Result<&[f64]> {
    match value {
        Value::Vector(vals) if vals.len() == len => Ok(vals),
        _ => Err(PplError::ShapeMismatch {
            expected: Shape::Vector(len),
            got: value.shape(),
        }),
    }
}

fn invalid(dist: &str, err: impl std::fmt::Display) -> PplError {
    PplError::InvalidParameter(format!("{dist}: {err}"))
}

#[inline]
fn normal_logpdf(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma;
    -0.5 * z * z - sigma.ln() - LN_SQRT_2PI
}

#[derive(Debug, Clone)]
pub struct Normal {
    mu: f64,
    sigma: f64,
    inner: rand_distr::Normal<f64>,
}

impl Normal {
    pub fn new(mu: f64, sigma: f64) -> Result<Normal> {
        if !(sigma > 0.) {
            return Err(invalid("normal", format!("sigma must be positive, got {sigma}")));
        }
        let inner = rand_distr::Normal::new(mu, sigma).map_err(|e| invalid("normal", e))?;
        Ok(Normal { mu, sigma, inner })
    }
}

impl Distribution for Normal {
    fn logpdf(&self, value: &Value) -> Result<f64> {
        Ok(normal_logpdf(expect_scalar(value)?, self.mu, self.sigma))
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Value {
        Value::Scalar(self.inner.sample(rng))
    }
}

#[derive(Debug, Clone)]
pub struct HalfNormal {
    sigma: f64,
    inner: rand_distr::Normal<f64>,
}

impl HalfNormal {
    pub fn new(sigma: f64) -> Result<HalfNormal> {
        if !(sigma > 0.) {
            return Err(invalid("half normal", format!("sigma must be positive, got {sigma}")));
        }
        let inner = rand_distr::Normal::new(0., sigma).map_err(|e| invalid("half normal", e))?;
        Ok(HalfNormal { sigma, inner })
    }
}

impl Distribution for HalfNormal {
    fn logpdf(&self, value: &Value) -> Result<f64> {
        let x = expect_scalar(value)?;
        if x < 0. {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(std::f64::consts::LN_2 + normal_logpdf(x, 0., self.sigma))
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Value {
        Value::Scalar(self.inner.sample(rng).abs())
    }

    fn support(&self) -> Support {
        Support::POSITIVE
    }
}

#[derive(Debug, Clone)]
pub struct Exponential {
    rate: f64,
    inner: rand_distr::Exp<f64>,
}

impl Exponential {
    pub fn new(rate: f64) -> Result<Exponential> {
        if !(rate > 0.) {
            return Err(invalid("exponential", format!("rate must be positive, got {rate}")));
        }
        let inner = rand_distr::Exp::new(rate).map_err(|e| invalid("exponential", e))?;
        Ok(Exponential { rate, inner })
    }
}

impl Distribution for Exponential {
    fn logpdf(&self, value: &Value) -> Result<f64> {
        let x = expect_scalar(value)?;
        if x < 0. {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(self.rate.ln() - self.rate * x)
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Value {
        Value::Scalar(self.inner.sample(rng))
    }

    fn support(&self) -> Support {
        Support::POSITIVE
    }
}

#[derive(Debug, Clone)]
pub struct Uniform {
    low: f64,
    high: f64,
    inner: rand_distr::Uniform<f64>,
}

impl Uniform {
    pub fn new(low: f64, high: f64) -> Result<Uniform> {
        if !(low < high) {
            return Err(invalid("uniform", format!("empty interval ({low}, {high})")));
        }
        let inner = rand_distr::Uniform::new(low, high).map_err(|e| invalid("uniform", e))?;
        Ok(Uniform { low, high, inner })
    }
}

impl Distribution for Uniform {
    fn logpdf(&self, value: &Value) -> Result<f64> {
        let x = expect_scalar(value)?;
        if x < self.low || x > self.high {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(-(self.high - self.low).ln())
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Value {
        Value::Scalar(self.inner.sample(rng))
    }

    fn support(&self) -> Support {
        Support::Interval(self.low, self.high)
    }
}

#[derive(Debug, Clone)]
pub struct Beta {
    alpha: f64,
    beta: f64,
    inner: rand_distr::Beta<f64>,
}

impl Beta {
    pub fn new(alpha: f64, beta: f64) -> Result<Beta> {
        if !(alpha > 0. && beta > 0.) {
            return Err(invalid("beta", format!("parameters must be positive, got ({alpha}, {beta})")));
        }
        let inner = rand_distr::Beta::new(alpha, beta).map_err(|e| invalid("beta", e))?;
        Ok(Beta { alpha, beta, inner })
    }
}

impl Distribution for Beta {
    fn logpdf(&self, value: &Value) -> Result<f64> {
        let x = expect_scalar(value)?;
        if !(0. ..=1.).contains(&x) {
            return Ok(f64::NEG_INFINITY);
        }
        Ok((self.alpha - 1.) * x.ln() + (self.beta - 1.) * (-x).ln_1p()
            - ln_beta(self.alpha, self.beta))
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Value {
        Value::Scalar(self.inner.sample(rng))
    }

    fn support(&self) -> Support {
        Support::Interval(0., 1.)
    }
}

#[derive(Debug, Clone)]
pub struct Dirichlet {
    alpha: Vec<f64>,
    gammas: Vec<rand_distr::Gamma<f64>>,
    log_norm: f64,
}

impl Dirichlet {
    pub fn new(alpha: Vec<f64>) -> Result<Dirichlet> {
        if alpha.is_empty() || alpha.iter().any(|&a| !(a > 0.)) {
            return Err(invalid("dirichlet", "concentrations must be positive and non-empty"));
        }
        let gammas = alpha
            .iter()
            .map(|&a| rand_distr::Gamma::new(a, 1.).map_err(|e| invalid("dirichlet", e)))
            .collect::<Result<Vec<_>>>()?;
        let log_norm =
            ln_gamma(alpha.iter().sum()) - alpha.iter().map(|&a| ln_gamma(a)).sum::<f64>();
        Ok(Dirichlet {
            alpha,
            gammas,
            log_norm,
        })
    }
}

impl Distribution for Dirichlet {
    fn logpdf(&self, value: &Value) -> Result<f64> {
        let x = expect_vector(value, self.alpha.len())?;
        let total: f64 = x.iter().sum();
        if x.iter().any(|&xi| xi < 0.) || (total - 1.).abs() > 1e-8 {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(self.log_norm
            + izip!(&self.alpha, x)
                .map(|(&a, &xi)| (a - 1.) * xi.ln())
                .sum::<f64>())
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Value {
        let mut draws: Vec<f64> = self.gammas.iter().map(|g| g.sample(rng)).collect();
        let total: f64 = draws.iter().sum();
        draws.iter_mut().for_each(|d| *d /= total);
        Value::Vector(draws)
    }

    fn shape(&self) -> Shape {
        Shape::Vector(self.alpha.len())
    }

    fn support(&self) -> Support {
        Support::Simplex
    }
}

/// Multivariate normal with diagonal covariance.
#[derive(Debug, Clone)]
pub struct MvNormalDiag {
    components: Vec<Normal>,
}

impl MvNormalDiag {
    pub fn new(mu: Vec<f64>, sigma: Vec<f64>) -> Result<MvNormalDiag> {
        if mu.len() != sigma.len() {
            return Err(PplError::DimensionMismatch {
                expected: mu.len(),
                got: sigma.len(),
            });
        }
        let components = izip!(mu, sigma)
            .map(|(mu, sigma)| Normal::new(mu, sigma))
            .collect::<Result<Vec<_>>>()?;
        Ok(MvNormalDiag { components })
    }
}

impl Distribution for MvNormalDiag {
    fn logpdf(&self, value: &Value) -> Result<f64> {
        let x = expect_vector(value, self.components.len())?;
        Ok(izip!(&self.components, x)
            .map(|(c, &xi)| normal_logpdf(xi, c.mu, c.sigma))
            .sum())
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Value {
        Value::Vector(self.components.iter().map(|c| c.inner.sample(rng)).collect())
    }

    fn shape(&self) -> Shape {
        Shape::Vector(self.components.len())
    }
}

/// Independent copies of a scalar distribution filling a shape.
#[derive(Debug, Clone)]
pub struct Iid {
    base: Arc<dyn Distribution>,
    shape: Shape,
}

impl Iid {
    pub fn new(base: impl Distribution + 'static, shape: Shape) -> Result<Iid> {
        if base.shape() != Shape::Scalar {
            return Err(invalid("iid", format!("base distribution must be scalar, got {}", base.shape())));
        }
        Ok(Iid {
            base: Arc::new(base),
            shape,
        })
    }
}

impl Distribution for Iid {
    fn logpdf(&self, value: &Value) -> Result<f64> {
        if value.shape() != self.shape {
            return Err(PplError::ShapeMismatch {
                expected: self.shape,
                got: value.shape(),
            });
        }
        value
            .flatten()
            .into_iter()
            .map(|x| self.base.logpdf(&Value::Scalar(x)))
            .sum()
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Value {
        let flat: Vec<f64> = (0..self.shape.len())
            .map(|_| self.base.sample(rng).as_scalar().unwrap_or(f64::NAN))
            .collect();
        match self.shape {
            Shape::Scalar => Value::Scalar(flat[0]),
            Shape::Vector(_) => Value::Vector(flat),
            Shape::Matrix(rows, cols) => {
                Value::Matrix(faer::Mat::from_fn(rows, cols, |i, j| flat[i + j * rows]))
            }
        }
    }

    fn shape(&self) -> Shape {
        self.shape
    }

    fn support(&self) -> Support {
        self.base.support()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    #[test]
    fn normal_logpdf_at_mode() {
        let dist = Normal::new(1., 2.).unwrap();
        assert_abs_diff_eq!(
            dist.logpdf(&Value::Scalar(1.)).unwrap(),
            -(2f64).ln() - LN_SQRT_2PI,
            epsilon = 1e-12
        );
        assert!(dist.logpdf(&Value::Vector(vec![1.])).is_err());
    }

    #[test]
    fn invalid_parameters() {
        assert!(matches!(Normal::new(0., -1.), Err(PplError::InvalidParameter(_))));
        assert!(matches!(Uniform::new(1., 0.), Err(PplError::InvalidParameter(_))));
        assert!(matches!(Dirichlet::new(vec![]), Err(PplError::InvalidParameter(_))));
        assert!(Iid::new(Dirichlet::new(vec![1., 1.]).unwrap(), Shape::Vector(2)).is_err());
    }

    #[test]
    fn outside_support() {
        assert_eq!(
            Exponential::new(1.).unwrap().logpdf(&Value::Scalar(-1.)).unwrap(),
            f64::NEG_INFINITY
        );
        assert_eq!(
            Beta::new(2., 2.).unwrap().logpdf(&Value::Scalar(1.5)).unwrap(),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn beta_and_dirichlet_agree() {
        // Dirichlet(a, b) on (x, 1 - x) is Beta(a, b) on x
        let beta = Beta::new(2.5, 1.5).unwrap();
        let dirichlet = Dirichlet::new(vec![2.5, 1.5]).unwrap();
        let lb = beta.logpdf(&Value::Scalar(0.3)).unwrap();
        let ld = dirichlet.logpdf(&Value::Vector(vec![0.3, 0.7])).unwrap();
        assert_abs_diff_eq!(lb, ld, epsilon = 1e-9);
    }

    #[test]
    fn samples_lie_in_support() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(3);
        let dirichlet = Dirichlet::new(vec![1., 2., 3.]).unwrap();
        for _ in 0..20 {
            let draw = dirichlet.sample(&mut rng);
            assert!(dirichlet.logpdf(&draw).unwrap().is_finite());
        }
        let iid = Iid::new(HalfNormal::new(1.).unwrap(), Shape::Matrix(2, 2)).unwrap();
        let draw = iid.sample(&mut rng);
        assert_eq!(draw.shape(), Shape::Matrix(2, 2));
        assert!(iid.logpdf(&draw).unwrap().is_finite());
    }
}
