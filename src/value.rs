use std::fmt;

use faer::Mat;

use crate::{
    error::{PplError, Result},
    varname::{Accessor, VarName},
};

/// The shape of a model value. Matrices are flattened column-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Scalar,
    Vector(usize),
    Matrix(usize, usize),
}

impl Shape {
    pub fn len(&self) -> usize {
        match *self {
            Shape::Scalar => 1,
            Shape::Vector(n) => n,
            Shape::Matrix(rows, cols) => rows * cols,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat offset of the element at a multi-index.
    pub fn offset(&self, index: &[usize]) -> Option<usize> {
        match (*self, index) {
            (Shape::Vector(n), &[i]) if i < n => Some(i),
            (Shape::Matrix(rows, cols), &[i, j]) if i < rows && j < cols => Some(i + j * rows),
            _ => None,
        }
    }

    /// Multi-index of the element at a flat offset.
    pub fn element_index(&self, offset: usize) -> Vec<usize> {
        match *self {
            Shape::Scalar => vec![],
            Shape::Vector(_) => vec![offset],
            Shape::Matrix(rows, _) => vec![offset % rows, offset / rows],
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Scalar => write!(f, "scalar"),
            Shape::Vector(n) => write!(f, "vector({n})"),
            Shape::Matrix(rows, cols) => write!(f, "matrix({rows}x{cols})"),
        }
    }
}

/// A realized value of a model variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Vector(Vec<f64>),
    Matrix(Mat<f64>),
}

impl Value {
    pub fn shape(&self) -> Shape {
        match self {
            Value::Scalar(_) => Shape::Scalar,
            Value::Vector(vals) => Shape::Vector(vals.len()),
            Value::Matrix(mat) => Shape::Matrix(mat.nrows(), mat.ncols()),
        }
    }

    pub fn flat_len(&self) -> usize {
        self.shape().len()
    }

    pub fn extend_flat(&self, out: &mut Vec<f64>) {
        match self {
            Value::Scalar(val) => out.push(*val),
            Value::Vector(vals) => out.extend_from_slice(vals),
            Value::Matrix(mat) => {
                for j in 0..mat.ncols() {
                    out.extend((0..mat.nrows()).map(|i| mat[(i, j)]));
                }
            }
        }
    }

    pub fn flatten(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.flat_len());
        self.extend_flat(&mut out);
        out
    }

    pub fn from_flat(shape: Shape, flat: &[f64]) -> Result<Value> {
        if flat.len() != shape.len() {
            return Err(PplError::DimensionMismatch {
                expected: shape.len(),
                got: flat.len(),
            });
        }
        Ok(match shape {
            Shape::Scalar => Value::Scalar(flat[0]),
            Shape::Vector(_) => Value::Vector(flat.to_vec()),
            Shape::Matrix(rows, cols) => Value::Matrix(Mat::from_fn(rows, cols, |i, j| flat[i + j * rows])),
        })
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(val) => Some(*val),
            _ => None,
        }
    }

    /// Element at a flat offset; `offset` must be smaller than `flat_len`.
    pub fn element(&self, offset: usize) -> f64 {
        match self {
            Value::Scalar(val) => *val,
            Value::Vector(vals) => vals[offset],
            Value::Matrix(mat) => mat[(offset % mat.nrows(), offset / mat.nrows())],
        }
    }

    /// Follow a sub-path into this value.
    pub fn at(&self, path: &[Accessor]) -> Option<Value> {
        match path {
            [] => Some(self.clone()),
            [Accessor::Index(idx)] => {
                let offset = self.shape().offset(idx)?;
                Some(Value::Scalar(self.element(offset)))
            }
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Scalar(value)
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::Vector(value)
    }
}

impl From<Mat<f64>> for Value {
    fn from(value: Mat<f64>) -> Self {
        Value::Matrix(value)
    }
}

/// A model input. Missing inputs turn the statements that mention them
/// into assumptions.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Missing,
    Value(Value),
    /// An array where individual elements may be missing.
    Partial {
        shape: Shape,
        values: Vec<Option<f64>>,
    },
}

impl Data {
    /// The observed value at `name`, whose symbol is bound to this input.
    ///
    /// Returns `None` if the addressed value is missing.
    pub fn observed(&self, name: &VarName) -> Result<Option<Value>> {
        let path = name.path();
        match self {
            Data::Missing => Ok(None),
            Data::Value(value) => value.at(path).map(Some).ok_or_else(|| {
                PplError::MissingClassification {
                    name: name.to_string(),
                    reason: format!("path does not address an element of a {}", value.shape()),
                }
            }),
            Data::Partial { shape, values } => {
                if values.len() != shape.len() {
                    return Err(PplError::MissingClassification {
                        name: name.to_string(),
                        reason: format!(
                            "partially missing data has {} entries but shape {shape}",
                            values.len()
                        ),
                    });
                }
                let offset = match path {
                    [Accessor::Index(idx)] => shape.offset(idx),
                    _ => None,
                };
                let Some(offset) = offset else {
                    return Err(PplError::MissingClassification {
                        name: name.to_string(),
                        reason: "partially missing data must be addressed element-wise".into(),
                    });
                };
                Ok(values[offset].map(Value::Scalar))
            }
        }
    }
}

impl From<Value> for Data {
    fn from(value: Value) -> Self {
        Data::Value(value)
    }
}

impl From<f64> for Data {
    fn from(value: f64) -> Self {
        Data::Value(Value::Scalar(value))
    }
}

impl From<Vec<f64>> for Data {
    fn from(value: Vec<f64>) -> Self {
        Data::Value(Value::Vector(value))
    }
}

impl From<Option<f64>> for Data {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Data::Missing, Data::from)
    }
}

impl From<Vec<Option<f64>>> for Data {
    fn from(values: Vec<Option<f64>>) -> Self {
        Data::Partial {
            shape: Shape::Vector(values.len()),
            values,
        }
    }
}
