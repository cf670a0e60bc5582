//! Models and the state of one model evaluation.
//!
//! A `Model` binds input data to an `Evaluator`. The evaluator issues
//! statements against an `Evaluation`, which classifies every variable as
//! assumed or observed, routes it through the context chain and
//! accumulates the log density in the trace.

use std::{
    collections::{BTreeMap, HashSet},
    fmt, mem,
    sync::Arc,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace, Level};

use crate::{
    context::Context,
    distributions::Distribution,
    error::{PplError, Result},
    program::Rhs,
    trace::VarTrace,
    value::{Data, Shape, Value},
    varname::VarName,
};

/// Executes the statements of a model, in program order.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, eval: &mut Evaluation<'_>) -> Result<Option<Value>>;
}

impl<F> Evaluator for F
where
    F: Fn(&mut Evaluation<'_>) -> Result<Option<Value>> + Send + Sync,
{
    fn evaluate(&self, eval: &mut Evaluation<'_>) -> Result<Option<Value>> {
        self(eval)
    }
}

#[derive(Clone)]
pub struct Model {
    name: String,
    args: BTreeMap<String, Data>,
    defaults: BTreeMap<String, Data>,
    conditioned: BTreeMap<VarName, Option<Value>>,
    evaluator: Arc<dyn Evaluator>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("defaults", &self.defaults)
            .field("conditioned", &self.conditioned)
            .finish_non_exhaustive()
    }
}

impl Model {
    pub fn new(name: impl Into<String>, evaluator: impl Evaluator + 'static) -> Model {
        Model {
            name: name.into(),
            args: BTreeMap::new(),
            defaults: BTreeMap::new(),
            conditioned: BTreeMap::new(),
            evaluator: Arc::new(evaluator),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind an input argument.
    pub fn with_arg(mut self, name: impl Into<String>, data: impl Into<Data>) -> Model {
        self.args.insert(name.into(), data.into());
        self
    }

    /// Value of an optional argument used when it is not bound.
    pub fn with_default(mut self, name: impl Into<String>, data: impl Into<Data>) -> Model {
        self.defaults.insert(name.into(), data.into());
        self
    }

    pub fn arg(&self, name: &str) -> Option<&Data> {
        self.args.get(name).or_else(|| self.defaults.get(name))
    }

    /// The input data at `name`, if its symbol is an argument and the
    /// addressed value is not missing.
    pub fn observed_value(&self, name: &VarName) -> Result<Option<Value>> {
        match self.arg(name.symbol()) {
            Some(data) => data.observed(name),
            None => Ok(None),
        }
    }

    /// A model that treats the given names as observed.
    pub fn condition<I, N>(&self, values: I) -> Model
    where
        I: IntoIterator<Item = (N, Value)>,
        N: Into<VarName>,
    {
        let mut model = self.clone();
        model
            .conditioned
            .extend(values.into_iter().map(|(name, value)| (name.into(), Some(value))));
        model
    }

    /// A model without the conditioning on any name subsumed by `names`.
    /// An empty slice removes all conditioning.
    pub fn decondition(&self, names: &[VarName]) -> Model {
        let mut model = self.clone();
        if names.is_empty() {
            model.conditioned.clear();
        } else {
            model
                .conditioned
                .retain(|key, _| !names.iter().any(|name| name.subsumes(key)));
        }
        model
    }

    pub fn conditioned(&self) -> &BTreeMap<VarName, Option<Value>> {
        &self.conditioned
    }

    fn wrap(&self, context: &Context) -> Context {
        if self.conditioned.is_empty() {
            context.clone()
        } else {
            context.condition(self.conditioned.clone())
        }
    }

    /// Run the model on `trace`, returning the model's return value and
    /// the updated trace. The log density of the trace is reset first.
    pub fn evaluate(
        &self,
        trace: VarTrace,
        context: &Context,
        rng: &mut dyn RngCore,
    ) -> Result<(Option<Value>, VarTrace)> {
        let (retval, trace, _) = self.evaluate_with(trace, context, rng, Bookkeeping::default())?;
        Ok((retval, trace))
    }

    fn evaluate_with(
        &self,
        mut trace: VarTrace,
        context: &Context,
        rng: &mut dyn RngCore,
        books: Bookkeeping,
    ) -> Result<(Option<Value>, VarTrace, Bookkeeping)> {
        let span = tracing::span!(Level::DEBUG, "evaluate", model = %self.name);
        let _enter = span.enter();

        trace.set_logp(0.);
        let mut eval = Evaluation {
            model: self,
            context: self.wrap(context),
            trace,
            rng,
            locals: BTreeMap::new(),
            books,
        };
        let retval = self.evaluator.evaluate(&mut eval)?;
        debug!(logp = eval.trace.logp(), vars = eval.trace.num_vars(), "evaluated model");
        Ok((retval, eval.trace, eval.books))
    }

    /// Draw every assumption from its prior.
    pub fn sample(&self, rng: &mut dyn RngCore) -> Result<VarTrace> {
        Ok(self.evaluate(VarTrace::new(), &Context::Default, rng)?.1)
    }

    fn density(&self, trace: &VarTrace, context: &Context) -> Result<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        Ok(self.evaluate(trace.clone(), context, &mut rng)?.1.logp())
    }

    /// Joint log density of the values in `trace`.
    ///
    /// For a linked trace this includes the log Jacobian of the link.
    pub fn logjoint(&self, trace: &VarTrace) -> Result<f64> {
        self.density(trace, &Context::Default)
    }

    pub fn logprior(&self, trace: &VarTrace) -> Result<f64> {
        self.density(trace, &Context::Default.prior())
    }

    pub fn loglikelihood(&self, trace: &VarTrace) -> Result<f64> {
        self.density(trace, &Context::Default.likelihood())
    }

    /// Log likelihood of every named observation, in program order.
    pub fn pointwise_loglikelihoods(&self, trace: &VarTrace) -> Result<Vec<(VarName, f64)>> {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let books = Bookkeeping {
            seen: None,
            pointwise: Some(Vec::new()),
        };
        let (_, _, books) =
            self.evaluate_with(trace.clone(), &Context::Default.likelihood(), &mut rng, books)?;
        Ok(books.pointwise.unwrap_or_default())
    }

    /// Evaluate once from scratch, failing if a name is assumed or
    /// observed more than once.
    pub fn check(&self, rng: &mut dyn RngCore) -> Result<()> {
        let books = Bookkeeping {
            seen: Some(HashSet::new()),
            pointwise: None,
        };
        self.evaluate_with(VarTrace::new(), &Context::Default, rng, books)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Bookkeeping {
    seen: Option<HashSet<VarName>>,
    pointwise: Option<Vec<(VarName, f64)>>,
}

/// State of one running model evaluation.
pub struct Evaluation<'a> {
    model: &'a Model,
    context: Context,
    trace: VarTrace,
    rng: &'a mut dyn RngCore,
    locals: BTreeMap<VarName, Value>,
    books: Bookkeeping,
}

impl<'a> Evaluation<'a> {
    pub fn model(&self) -> &Model {
        self.model
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn trace(&self) -> &VarTrace {
        &self.trace
    }

    pub fn rng(&mut self) -> &mut dyn RngCore {
        &mut *self.rng
    }

    /// Read access to local variables and model inputs.
    pub fn env(&self) -> Env<'_> {
        Env {
            model: self.model,
            locals: &self.locals,
        }
    }

    /// Bind a deterministic local variable.
    pub fn bind(&mut self, name: impl Into<VarName>, value: Value) {
        self.locals.insert(name.into(), value);
    }

    /// `name ~ rhs`. Returns the value of the variable.
    pub fn tilde(&mut self, name: impl Into<VarName>, rhs: &Rhs) -> Result<Value> {
        let name = name.into();
        let dist = rhs.single(&name)?;
        let value = self.statement(&name, dist)?;
        self.locals.insert(name, value.clone());
        Ok(value)
    }

    /// `value ~ rhs` for a literal value. Returns the log density
    /// contribution.
    pub fn observe(&mut self, value: &Value, rhs: &Rhs) -> Result<f64> {
        let dist = rhs.single(&VarName::new("<literal>"))?;
        let logp = self.context.tilde_observe(dist, value)?;
        trace!(logp, "observed literal");
        self.trace.acc_logp(logp);
        Ok(logp)
    }

    /// `base .~ rhs` over the elements of `shape`. Every element is
    /// classified on its own, so partially missing data mixes observed
    /// and assumed elements.
    pub fn dot_tilde(
        &mut self,
        base: impl Into<VarName>,
        shape: Shape,
        rhs: &Rhs,
    ) -> Result<Value> {
        let base = base.into();
        if shape == Shape::Scalar {
            return self.tilde(base, rhs);
        }
        let mut flat = Vec::with_capacity(shape.len());
        for k in 0..shape.len() {
            let name = base.clone().index(shape.element_index(k));
            let dist = rhs.element(&base, shape, k)?;
            let value = self.statement(&name, dist)?;
            let Some(scalar) = value.as_scalar() else {
                return Err(PplError::ShapeMismatch {
                    expected: Shape::Scalar,
                    got: value.shape(),
                });
            };
            flat.push(scalar);
        }
        let value = Value::from_flat(shape, &flat)?;
        self.locals.insert(base, value.clone());
        Ok(value)
    }

    /// Add a raw term to the log likelihood.
    pub fn add_logp(&mut self, logp: f64) {
        self.trace.acc_logp(logp * self.context.observe_weight());
    }

    /// Evaluate `model` inside this evaluation, with all its names moved
    /// into the namespace `prefix`.
    pub fn submodel(&mut self, prefix: &str, model: &Model) -> Result<Option<Value>> {
        let mut inner = Evaluation {
            model,
            context: model.wrap(&self.context.prefix(prefix)),
            trace: mem::take(&mut self.trace),
            rng: &mut *self.rng,
            locals: BTreeMap::new(),
            books: mem::take(&mut self.books),
        };
        let span = tracing::span!(Level::DEBUG, "submodel", prefix, model = %model.name);
        let retval = span.in_scope(|| model.evaluator.evaluate(&mut inner));
        self.trace = inner.trace;
        self.books = inner.books;
        retval
    }

    pub fn into_trace(self) -> VarTrace {
        self.trace
    }

    fn observed(&self, name: &VarName) -> Result<Option<Value>> {
        if let Some(value) = self.context.conditioned_value(name)? {
            return Ok(Some(value));
        }
        self.model.observed_value(name)
    }

    fn statement(&mut self, name: &VarName, dist: &dyn Distribution) -> Result<Value> {
        let full = self.context.prefixed_name(name);
        if let Some(seen) = self.books.seen.as_mut() {
            if !seen.insert(full.clone()) {
                return Err(PplError::DuplicateName(full));
            }
        }
        match self.observed(name)? {
            Some(value) => {
                let logp = self.context.tilde_observe(dist, &value)?;
                trace!(var = %full, logp, "observe");
                self.trace.acc_logp(logp);
                if let Some(pointwise) = self.books.pointwise.as_mut() {
                    pointwise.push((full, logp));
                }
                Ok(value)
            }
            None => {
                let (value, logp) =
                    self.context
                        .tilde_assume(dist, name, &mut self.trace, &mut *self.rng, None)?;
                trace!(var = %full, logp, "assume");
                self.trace.acc_logp(logp);
                Ok(value)
            }
        }
    }
}

/// Variables visible to the right hand side of a statement.
#[derive(Debug, Clone, Copy)]
pub struct Env<'a> {
    model: &'a Model,
    locals: &'a BTreeMap<VarName, Value>,
}

impl Env<'_> {
    /// Look up a local variable, falling back to model inputs.
    pub fn get(&self, name: &VarName) -> Option<Value> {
        if let Some(value) = self.locals.get(name) {
            return Some(value.clone());
        }
        let local = self
            .locals
            .iter()
            .find_map(|(key, value)| Some((key.remainder(name)?, value)));
        if let Some((rest, value)) = local {
            return value.at(rest);
        }
        match self.model.arg(name.symbol())? {
            Data::Value(value) => value.at(name.path()),
            _ => None,
        }
    }

    pub fn data(&self, name: &str) -> Option<&Data> {
        self.model.arg(name)
    }

    fn require(&self, name: &str) -> Result<Value> {
        let name = VarName::new(name);
        self.get(&name).ok_or(PplError::UnknownName(name))
    }

    pub fn scalar(&self, name: &str) -> Result<f64> {
        let value = self.require(name)?;
        value.as_scalar().ok_or(PplError::ShapeMismatch {
            expected: Shape::Scalar,
            got: value.shape(),
        })
    }

    pub fn vector(&self, name: &str) -> Result<Vec<f64>> {
        match self.require(name)? {
            Value::Vector(vals) => Ok(vals),
            value => Err(PplError::ShapeMismatch {
                expected: Shape::Vector(value.flat_len()),
                got: value.shape(),
            }),
        }
    }
}
