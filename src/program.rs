//! Models as explicit statement lists.
//!
//! A `Program` is the pre-compiled form of a model body: an ordered list
//! of statements whose right hand sides are closures over the variables
//! bound so far. It implements `Evaluator` by running the statements in
//! order against an `Evaluation`.

use std::{fmt, sync::Arc};

use crate::{
    distributions::Distribution,
    error::{PplError, Result},
    model::{Env, Evaluation, Evaluator, Model},
    value::{Shape, Value},
    varname::VarName,
};

/// The right hand side of a `~` statement.
#[derive(Debug, Clone)]
pub enum Rhs {
    Dist(Arc<dyn Distribution>),
    /// One scalar distribution per element, for `.~` statements.
    Product(Vec<Arc<dyn Distribution>>),
    /// A plain value, which is not a valid right hand side.
    Value(Value),
}

impl Rhs {
    pub fn dist(dist: impl Distribution + 'static) -> Rhs {
        Rhs::Dist(Arc::new(dist))
    }

    /// The distribution of a whole-variable statement.
    pub(crate) fn single(&self, lhs: &VarName) -> Result<&dyn Distribution> {
        match self {
            Rhs::Dist(dist) => Ok(dist.as_ref()),
            Rhs::Product(_) => Err(unsupported(lhs, "a product of distributions needs `.~`")),
            Rhs::Value(value) => Err(unsupported(
                lhs,
                &format!("a {} value is not a distribution", value.shape()),
            )),
        }
    }

    /// The distribution of element `k` of a `.~` statement over `shape`.
    pub(crate) fn element(&self, lhs: &VarName, shape: Shape, k: usize) -> Result<&dyn Distribution> {
        match self {
            Rhs::Dist(dist) if dist.shape() == Shape::Scalar => Ok(dist.as_ref()),
            Rhs::Dist(dist) => Err(unsupported(
                lhs,
                &format!("cannot broadcast a {} distribution", dist.shape()),
            )),
            Rhs::Product(dists) if dists.len() != shape.len() => Err(unsupported(
                lhs,
                &format!("{} distributions for a {shape}", dists.len()),
            )),
            Rhs::Product(dists) => {
                let dist = &dists[k];
                if dist.shape() != Shape::Scalar {
                    return Err(unsupported(lhs, "product elements must be scalar"));
                }
                Ok(dist.as_ref())
            }
            Rhs::Value(value) => Err(unsupported(
                lhs,
                &format!("a {} value is not a distribution", value.shape()),
            )),
        }
    }
}

fn unsupported(lhs: &VarName, reason: &str) -> PplError {
    PplError::UnsupportedStatementRhs {
        lhs: lhs.to_string(),
        reason: reason.to_string(),
    }
}

pub type RhsFn = Arc<dyn Fn(&Env<'_>) -> Result<Rhs> + Send + Sync>;
pub type ExprFn = Arc<dyn Fn(&Env<'_>) -> Result<Value> + Send + Sync>;

/// The left hand side of a `~` statement.
#[derive(Debug, Clone)]
pub enum Lhs {
    Var(VarName),
    /// Always observed.
    Literal(Value),
}

#[derive(Clone)]
pub enum Statement {
    Tilde { lhs: Lhs, rhs: RhsFn },
    DotTilde { lhs: VarName, shape: Shape, rhs: RhsFn },
    Let { name: VarName, expr: ExprFn },
    AddLogp(Arc<dyn Fn(&Env<'_>) -> Result<f64> + Send + Sync>),
    Submodel { prefix: String, model: Arc<Model> },
    Return(ExprFn),
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Tilde { lhs: Lhs::Var(name), .. } => write!(f, "{name} ~ <rhs>"),
            Statement::Tilde { lhs: Lhs::Literal(value), .. } => write!(f, "{value:?} ~ <rhs>"),
            Statement::DotTilde { lhs, shape, .. } => write!(f, "{lhs} .~ <rhs> over {shape}"),
            Statement::Let { name, .. } => write!(f, "{name} = <expr>"),
            Statement::AddLogp(_) => write!(f, "add_logp(<expr>)"),
            Statement::Submodel { prefix, model } => {
                write!(f, "{prefix} = submodel({})", model.name())
            }
            Statement::Return(_) => write!(f, "return <expr>"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    statements: Vec<Statement>,
}

impl Program {
    pub fn new() -> Program {
        Program::default()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn push(mut self, statement: Statement) -> Program {
        self.statements.push(statement);
        self
    }

    pub fn tilde<F>(self, name: impl Into<VarName>, rhs: F) -> Program
    where
        F: Fn(&Env<'_>) -> Result<Rhs> + Send + Sync + 'static,
    {
        self.push(Statement::Tilde {
            lhs: Lhs::Var(name.into()),
            rhs: Arc::new(rhs),
        })
    }

    /// Observe a literal value.
    pub fn observe<F>(self, value: impl Into<Value>, rhs: F) -> Program
    where
        F: Fn(&Env<'_>) -> Result<Rhs> + Send + Sync + 'static,
    {
        self.push(Statement::Tilde {
            lhs: Lhs::Literal(value.into()),
            rhs: Arc::new(rhs),
        })
    }

    pub fn dot_tilde<F>(self, name: impl Into<VarName>, shape: Shape, rhs: F) -> Program
    where
        F: Fn(&Env<'_>) -> Result<Rhs> + Send + Sync + 'static,
    {
        self.push(Statement::DotTilde {
            lhs: name.into(),
            shape,
            rhs: Arc::new(rhs),
        })
    }

    pub fn let_<F>(self, name: impl Into<VarName>, expr: F) -> Program
    where
        F: Fn(&Env<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.push(Statement::Let {
            name: name.into(),
            expr: Arc::new(expr),
        })
    }

    pub fn add_logp<F>(self, expr: F) -> Program
    where
        F: Fn(&Env<'_>) -> Result<f64> + Send + Sync + 'static,
    {
        self.push(Statement::AddLogp(Arc::new(expr)))
    }

    pub fn submodel(self, prefix: impl Into<String>, model: Model) -> Program {
        self.push(Statement::Submodel {
            prefix: prefix.into(),
            model: Arc::new(model),
        })
    }

    pub fn returns<F>(self, expr: F) -> Program
    where
        F: Fn(&Env<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.push(Statement::Return(Arc::new(expr)))
    }
}

impl Evaluator for Program {
    fn evaluate(&self, eval: &mut Evaluation<'_>) -> Result<Option<Value>> {
        for statement in &self.statements {
            match statement {
                Statement::Tilde { lhs, rhs } => {
                    let rhs = rhs(&eval.env())?;
                    match lhs {
                        Lhs::Var(name) => {
                            eval.tilde(name, &rhs)?;
                        }
                        Lhs::Literal(value) => {
                            eval.observe(value, &rhs)?;
                        }
                    }
                }
                Statement::DotTilde { lhs, shape, rhs } => {
                    let rhs = rhs(&eval.env())?;
                    eval.dot_tilde(lhs, *shape, &rhs)?;
                }
                Statement::Let { name, expr } => {
                    let value = expr(&eval.env())?;
                    eval.bind(name, value);
                }
                Statement::AddLogp(expr) => {
                    let logp = expr(&eval.env())?;
                    eval.add_logp(logp);
                }
                Statement::Submodel { prefix, model } => {
                    if let Some(value) = eval.submodel(prefix, model)? {
                        eval.bind(prefix.as_str(), value);
                    }
                }
                Statement::Return(expr) => return Ok(Some(expr(&eval.env())?)),
            }
        }
        Ok(None)
    }
}
