//! The chain of interpretation policies every statement is routed through.
//!
//! A context is a leaf (`Context::Default`) or a parent node wrapping an
//! inner context. Parent nodes apply their local effect and delegate
//! inward, so a statement always travels from the outermost node to the
//! leaf. Contexts are immutable and cheap to clone; wrapping shares the
//! inner chain.

use std::{collections::BTreeMap, sync::Arc};

use rand::{Rng, RngCore};
use tracing::trace;

use crate::{
    distributions::Distribution,
    error::{PplError, Result},
    trace::VarTrace,
    transform::Transform,
    value::Value,
    varname::{VarName, VarSelection},
};

/// How the leaf initializes a variable it has to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sampler {
    /// Draw from the variable's distribution.
    #[default]
    Prior,
    /// Draw uniformly from `[-2, 2]` in unconstrained space.
    Uniform,
}

#[derive(Debug, Clone, Default)]
pub enum Context {
    /// Draw or reuse assumptions and score everything.
    #[default]
    Default,
    /// Treat the given names as observed at the given values. A `None`
    /// value defers to the inner classification.
    Condition {
        values: Arc<BTreeMap<VarName, Option<Value>>>,
        child: Arc<Context>,
    },
    /// Move every name into a namespace.
    Prefix { prefix: String, child: Arc<Context> },
    /// Only score observations.
    Likelihood(Arc<Context>),
    /// Only score assumptions.
    Prior(Arc<Context>),
    /// Scale observation scores, e.g. to correct for subsampled data.
    Minibatch { scale: f64, child: Arc<Context> },
    /// Restrict which variables are free parameters and may be redrawn.
    Sampling {
        selection: VarSelection,
        sampler: Sampler,
        child: Arc<Context>,
    },
}

/// Selection and sampler in effect at the leaf.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SamplingPolicy<'a> {
    pub selection: &'a VarSelection,
    pub sampler: Sampler,
}

static SELECT_ALL: VarSelection = VarSelection::All;

impl Context {
    pub fn condition<I, N>(&self, values: I) -> Context
    where
        I: IntoIterator<Item = (N, Option<Value>)>,
        N: Into<VarName>,
    {
        let values = values
            .into_iter()
            .map(|(name, value)| (name.into(), value))
            .collect();
        Context::Condition {
            values: Arc::new(values),
            child: Arc::new(self.clone()),
        }
    }

    pub fn prefix(&self, prefix: impl Into<String>) -> Context {
        Context::Prefix {
            prefix: prefix.into(),
            child: Arc::new(self.clone()),
        }
    }

    pub fn likelihood(&self) -> Context {
        Context::Likelihood(Arc::new(self.clone()))
    }

    pub fn prior(&self) -> Context {
        Context::Prior(Arc::new(self.clone()))
    }

    pub fn minibatch(&self, scale: f64) -> Context {
        Context::Minibatch {
            scale,
            child: Arc::new(self.clone()),
        }
    }

    pub fn sampling(&self, selection: VarSelection, sampler: Sampler) -> Context {
        Context::Sampling {
            selection,
            sampler,
            child: Arc::new(self.clone()),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Context::Default)
    }

    /// The inner context of a parent node.
    pub fn child(&self) -> Option<&Context> {
        match self {
            Context::Default => None,
            Context::Condition { child, .. }
            | Context::Prefix { child, .. }
            | Context::Likelihood(child)
            | Context::Prior(child)
            | Context::Minibatch { child, .. }
            | Context::Sampling { child, .. } => Some(child),
        }
    }

    /// Number of parent nodes above the leaf.
    pub fn depth(&self) -> usize {
        std::iter::successors(self.child(), |ctx| ctx.child()).count()
    }

    /// Selection of the outermost sampling node, or all variables.
    pub fn selection(&self) -> &VarSelection {
        let mut ctx = self;
        loop {
            match ctx {
                Context::Sampling { selection, .. } => return selection,
                Context::Default => return &SELECT_ALL,
                _ => {}
            }
            match ctx.child() {
                Some(child) => ctx = child,
                None => return &SELECT_ALL,
            }
        }
    }

    /// The value `name` is conditioned on, if any.
    ///
    /// `name` is given in the namespace of the statement; prefixes are
    /// applied on the way to the leaf.
    pub fn conditioned_value(&self, name: &VarName) -> Result<Option<Value>> {
        match self {
            Context::Default => Ok(None),
            Context::Condition { values, child } => {
                if let Some(value) = values.get(name) {
                    if let Some(value) = value {
                        return Ok(Some(value.clone()));
                    }
                    return child.conditioned_value(name);
                }
                for (key, value) in values.iter() {
                    let (Some(rest), Some(value)) = (key.remainder(name), value) else {
                        continue;
                    };
                    return match value.at(rest) {
                        Some(value) => Ok(Some(value)),
                        None => Err(PplError::MissingClassification {
                            name: name.to_string(),
                            reason: format!("conditioned on {key} of shape {}", value.shape()),
                        }),
                    };
                }
                child.conditioned_value(name)
            }
            Context::Prefix { prefix, child } => child.conditioned_value(&name.prefixed(prefix)),
            Context::Likelihood(child)
            | Context::Prior(child)
            | Context::Minibatch { child, .. }
            | Context::Sampling { child, .. } => child.conditioned_value(name),
        }
    }

    /// The name under which `name` is stored in the trace.
    pub fn prefixed_name(&self, name: &VarName) -> VarName {
        match self {
            Context::Default => name.clone(),
            Context::Prefix { prefix, child } => child.prefixed_name(&name.prefixed(prefix)),
            ctx => ctx
                .child()
                .map_or_else(|| name.clone(), |child| child.prefixed_name(name)),
        }
    }

    /// Factor applied to raw log likelihood terms.
    pub fn observe_weight(&self) -> f64 {
        match self {
            Context::Default => 1.,
            Context::Prior(_) => 0.,
            Context::Minibatch { scale, child } => scale * child.observe_weight(),
            ctx => ctx.child().map_or(1., Context::observe_weight),
        }
    }

    /// Route an assumption to the leaf.
    ///
    /// Returns the value of the variable and its log density contribution.
    pub(crate) fn tilde_assume(
        &self,
        dist: &dyn Distribution,
        name: &VarName,
        trace: &mut VarTrace,
        rng: &mut dyn RngCore,
        policy: Option<SamplingPolicy<'_>>,
    ) -> Result<(Value, f64)> {
        match self {
            Context::Default => assume_leaf(dist, name, trace, rng, policy),
            Context::Likelihood(child) => {
                let (value, _) = child.tilde_assume(dist, name, trace, rng, policy)?;
                Ok((value, 0.))
            }
            Context::Prefix { prefix, child } => {
                child.tilde_assume(dist, &name.prefixed(prefix), trace, rng, policy)
            }
            Context::Sampling {
                selection,
                sampler,
                child,
            } => {
                let policy = policy.or(Some(SamplingPolicy {
                    selection,
                    sampler: *sampler,
                }));
                child.tilde_assume(dist, name, trace, rng, policy)
            }
            Context::Condition { child, .. }
            | Context::Prior(child)
            | Context::Minibatch { child, .. } => child.tilde_assume(dist, name, trace, rng, policy),
        }
    }

    /// Route an observation to the leaf, returning its weighted log
    /// density contribution.
    pub(crate) fn tilde_observe(&self, dist: &dyn Distribution, value: &Value) -> Result<f64> {
        match self {
            Context::Default => dist.logpdf(value),
            Context::Prior(child) => {
                child.tilde_observe(dist, value)?;
                Ok(0.)
            }
            Context::Minibatch { scale, child } => Ok(scale * child.tilde_observe(dist, value)?),
            Context::Condition { child, .. }
            | Context::Prefix { child, .. }
            | Context::Likelihood(child)
            | Context::Sampling { child, .. } => child.tilde_observe(dist, value),
        }
    }
}

fn assume_leaf(
    dist: &dyn Distribution,
    name: &VarName,
    trace: &mut VarTrace,
    rng: &mut dyn RngCore,
    policy: Option<SamplingPolicy<'_>>,
) -> Result<(Value, f64)> {
    let (selection, sampler) = match policy {
        Some(policy) => (policy.selection, policy.sampler),
        None => (&SELECT_ALL, Sampler::Prior),
    };
    let redraw = !trace.contains(name) || (trace.is_flagged(name) && selection.selects(name));

    if !redraw {
        let stored = trace.transform(name)?;
        if stored.shape() != dist.shape() {
            return Err(PplError::ShapeMismatch {
                expected: dist.shape(),
                got: stored.shape(),
            });
        }
        // Stored scalars are read through the bijector of the current
        // distribution, whose bounds may depend on other variables.
        let current = Transform::for_support(dist.shape(), dist.support())?;
        let current = if stored.is_linked() {
            current.linked()
        } else {
            current
        };
        if current != stored {
            trace!(var = %name, "refreshing transform");
            trace.set_transform(name, current)?;
        }
        let (value, logjac) = trace.get_with_logjac(name)?;
        trace!(var = %name, "reusing value");
        let logp = dist.logpdf(&value)? + logjac;
        return Ok((value, logp));
    }

    let transform = Transform::for_support(dist.shape(), dist.support())?;
    let value = match sampler {
        Sampler::Prior => dist.sample(rng),
        Sampler::Uniform => {
            let linked = transform.linked();
            let flat: Vec<f64> = (0..linked.flat_len())
                .map(|_| rng.random_range(-2f64..2f64))
                .collect();
            linked.reconstruct(&flat)?.0
        }
    };
    let transform = if trace.is_linked() {
        transform.linked()
    } else {
        transform
    };
    trace!(var = %name, ?sampler, "drawing value");
    trace.update(name, value, Some(transform))?;
    trace.unflag(name);
    let (value, logjac) = trace.get_with_logjac(name)?;
    let logp = dist.logpdf(&value)? + logjac;
    Ok((value, logp))
}
