use crate::{
    error::{PplError, Result},
    math::{log1pexp, logistic, logit},
    value::{Shape, Value},
};

/// The set of values a distribution assigns positive density to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Support {
    Real,
    GreaterThan(f64),
    Interval(f64, f64),
    /// Non-negative vectors summing to one.
    Simplex,
}

impl Support {
    pub const POSITIVE: Support = Support::GreaterThan(0.);
}

/// Bijection between a constrained support and unconstrained reals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bijector {
    Identity,
    /// `x = lower + exp(y)`, elementwise.
    LowerBound(f64),
    /// `x = lower + (upper - lower) * logistic(y)`, elementwise.
    Interval(f64, f64),
    /// Stick breaking map from `K - 1` reals onto the `K`-simplex.
    StickBreaking,
}

impl Bijector {
    pub fn for_support(support: Support, shape: Shape) -> Result<Bijector> {
        match support {
            Support::Real => Ok(Bijector::Identity),
            Support::GreaterThan(lower) => Ok(Bijector::LowerBound(lower)),
            Support::Interval(lower, upper) => {
                if !(lower < upper) {
                    return Err(PplError::UnsupportedTransform(format!(
                        "empty interval ({lower}, {upper})"
                    )));
                }
                Ok(Bijector::Interval(lower, upper))
            }
            Support::Simplex => match shape {
                Shape::Vector(k) if k > 0 => Ok(Bijector::StickBreaking),
                _ => Err(PplError::UnsupportedTransform(format!(
                    "simplex support on a {shape}"
                ))),
            },
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Bijector::Identity)
    }

    /// Length of the unconstrained representation of a value of `shape`.
    pub fn unconstrained_len(&self, shape: Shape) -> usize {
        match self {
            Bijector::StickBreaking => shape.len().saturating_sub(1),
            _ => shape.len(),
        }
    }

    /// Map constrained `x` into `y`, returning `log|det dx/dy|`.
    fn link(&self, x: &[f64], y: &mut Vec<f64>) -> f64 {
        match *self {
            Bijector::Identity => {
                y.extend_from_slice(x);
                0.
            }
            Bijector::LowerBound(lower) => x.iter().fold(0., |logjac, &x| {
                let u = (x - lower).ln();
                y.push(u);
                logjac + u
            }),
            Bijector::Interval(lower, upper) => {
                let width = upper - lower;
                x.iter().fold(0., |logjac, &x| {
                    let u = logit((x - lower) / width);
                    y.push(u);
                    logjac + width.ln() - log1pexp(-u) - log1pexp(u)
                })
            }
            Bijector::StickBreaking => {
                let k = x.len();
                let mut stick = 1.;
                let mut logjac = 0.;
                for (i, &xi) in x.iter().enumerate().take(k.saturating_sub(1)) {
                    let u = logit(xi / stick);
                    y.push(u + ((k - 1 - i) as f64).ln());
                    logjac += stick_logjac(u, stick);
                    stick -= xi;
                }
                logjac
            }
        }
    }

    /// Map unconstrained `y` into `x`, returning `log|det dx/dy|`.
    fn invlink(&self, y: &[f64], x: &mut Vec<f64>) -> f64 {
        match *self {
            Bijector::Identity => {
                x.extend_from_slice(y);
                0.
            }
            Bijector::LowerBound(lower) => y.iter().fold(0., |logjac, &u| {
                x.push(lower + u.exp());
                logjac + u
            }),
            Bijector::Interval(lower, upper) => {
                let width = upper - lower;
                y.iter().fold(0., |logjac, &u| {
                    x.push(lower + width * logistic(u));
                    logjac + width.ln() - log1pexp(-u) - log1pexp(u)
                })
            }
            Bijector::StickBreaking => {
                let k = y.len() + 1;
                let mut stick = 1.;
                let mut logjac = 0.;
                for (i, &u) in y.iter().enumerate() {
                    let u = u - ((k - 1 - i) as f64).ln();
                    let xi = stick * logistic(u);
                    logjac += stick_logjac(u, stick);
                    x.push(xi);
                    stick -= xi;
                }
                x.push(stick);
                logjac
            }
        }
    }
}

/// `log(z (1 - z) stick)` for `z = logistic(u)`.
#[inline]
fn stick_logjac(u: f64, stick: f64) -> f64 {
    -log1pexp(-u) - log1pexp(u) + stick.ln()
}

/// Reconstructs a variable of a fixed shape from its flat scalars.
///
/// A linked transform stores the unconstrained image under its bijector
/// and maps it back to the support on reconstruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    shape: Shape,
    bijector: Bijector,
    linked: bool,
}

impl Transform {
    pub fn new(shape: Shape, bijector: Bijector) -> Transform {
        Transform {
            shape,
            bijector,
            linked: false,
        }
    }

    pub fn identity(shape: Shape) -> Transform {
        Transform::new(shape, Bijector::Identity)
    }

    pub fn for_support(shape: Shape, support: Support) -> Result<Transform> {
        Ok(Transform::new(shape, Bijector::for_support(support, shape)?))
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn bijector(&self) -> Bijector {
        self.bijector
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub fn linked(self) -> Transform {
        Transform {
            linked: true,
            ..self
        }
    }

    pub fn unlinked(self) -> Transform {
        Transform {
            linked: false,
            ..self
        }
    }

    pub fn with_shape(self, shape: Shape) -> Transform {
        Transform { shape, ..self }
    }

    /// Number of scalars stored for a value under this transform.
    pub fn flat_len(&self) -> usize {
        if self.linked {
            self.bijector.unconstrained_len(self.shape)
        } else {
            self.shape.len()
        }
    }

    /// Flat scalars to value, together with `log|det dx/dy|` of the
    /// map (zero unless linked).
    pub fn reconstruct(&self, flat: &[f64]) -> Result<(Value, f64)> {
        if flat.len() != self.flat_len() {
            return Err(PplError::DimensionMismatch {
                expected: self.flat_len(),
                got: flat.len(),
            });
        }
        if !self.linked {
            return Ok((Value::from_flat(self.shape, flat)?, 0.));
        }
        let mut x = Vec::with_capacity(self.shape.len());
        let logjac = self.bijector.invlink(flat, &mut x);
        Ok((Value::from_flat(self.shape, &x)?, logjac))
    }

    /// Value to flat scalars, the inverse of `reconstruct`. The returned
    /// log Jacobian is the one `reconstruct` reports for the result.
    pub fn flatten(&self, value: &Value) -> Result<(Vec<f64>, f64)> {
        if value.shape() != self.shape {
            return Err(PplError::ShapeMismatch {
                expected: self.shape,
                got: value.shape(),
            });
        }
        let x = value.flatten();
        if !self.linked {
            return Ok((x, 0.));
        }
        let mut y = Vec::with_capacity(self.flat_len());
        let logjac = self.bijector.link(&x, &mut y);
        Ok((y, logjac))
    }
}
