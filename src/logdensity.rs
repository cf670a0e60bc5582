use std::{
    fmt::Debug,
    sync::{Arc, OnceLock},
};

use anyhow::Context as _;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::{
    context::Context,
    error::{LogpError, PplError, Result},
    model::Model,
    settings::EvalSettings,
    trace::VarTrace,
    varname::VarSelection,
};

/// Highest derivative order a log density provides itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifferentiationOrder {
    Zero,
    One,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub order: DifferentiationOrder,
}

/// The calling convention samplers use for a log density.
pub trait LogDensity {
    type Err: Debug + Send + Sync + LogpError + 'static;

    /// The dimensionality of the parameter space.
    fn dim(&self) -> usize;

    /// Compute the unnormalized log probability density at `position`.
    fn logp(&self, position: &[f64]) -> std::result::Result<f64, Self::Err>;

    fn capabilities(&self) -> Capabilities;
}

/// A model, a trace and a context, seen as a function of the flat vector
/// of free variables.
///
/// The free variables are those the context's selection picks out of the
/// trace, in trace order.
#[derive(Debug, Clone)]
pub struct LogDensityFunction {
    model: Arc<Model>,
    trace: VarTrace,
    context: Context,
    settings: EvalSettings,
    // Built on the first batch and shared by clones with the same settings.
    pool: Arc<OnceLock<ThreadPool>>,
}

impl LogDensityFunction {
    pub fn new(model: impl Into<Arc<Model>>, trace: VarTrace, context: Context) -> Self {
        LogDensityFunction {
            model: model.into(),
            trace,
            context,
            settings: EvalSettings::default(),
            pool: Arc::default(),
        }
    }

    /// Populate a trace by running the model once.
    pub fn from_model(model: impl Into<Arc<Model>>, settings: &EvalSettings) -> Result<Self> {
        let model = model.into();
        let context = Context::Default.sampling(VarSelection::All, settings.sampler);
        let trace = if settings.link {
            VarTrace::new().link()?
        } else {
            VarTrace::new()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
        let (_, trace) = model.evaluate(trace, &context, &mut rng)?;
        debug!(
            model = model.name(),
            dim = trace.len(),
            linked = settings.link,
            "initialized log density"
        );
        Ok(LogDensityFunction {
            model,
            trace,
            context,
            settings: *settings,
            pool: Arc::default(),
        })
    }

    pub fn with_context(&self, context: Context) -> Self {
        LogDensityFunction {
            context,
            ..self.clone()
        }
    }

    pub fn with_settings(&self, settings: EvalSettings) -> Self {
        LogDensityFunction {
            settings,
            pool: Arc::default(),
            ..self.clone()
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn trace(&self) -> &VarTrace {
        &self.trace
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn settings(&self) -> &EvalSettings {
        &self.settings
    }

    pub fn is_linked(&self) -> bool {
        self.trace.is_linked()
    }

    /// Number of free scalars.
    pub fn dimension(&self) -> usize {
        self.trace.selected_len(self.context.selection())
    }

    /// Log density with the free variables set to `theta`.
    pub fn evaluate(&self, theta: &[f64]) -> Result<f64> {
        let dim = self.dimension();
        if theta.len() != dim {
            return Err(PplError::DimensionMismatch {
                expected: dim,
                got: theta.len(),
            });
        }
        let mut trace = self.trace.clone();
        trace.set_selected_flat(self.context.selection(), theta)?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.settings.seed);
        let (_, trace) = self.model.evaluate(trace, &self.context, &mut rng)?;
        debug!(logp = trace.logp(), "evaluated log density");
        Ok(trace.logp())
    }

    /// Evaluate many parameter vectors in parallel. Every worker runs on
    /// its own copy of the trace.
    pub fn evaluate_batch(&self, thetas: &[Vec<f64>]) -> Result<Vec<f64>> {
        let run = || {
            thetas
                .par_iter()
                .map(|theta| self.evaluate(theta))
                .collect::<Result<Vec<_>>>()
        };
        match self.thread_pool()? {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }

    /// The dedicated worker pool, if the settings ask for one.
    fn thread_pool(&self) -> Result<Option<&ThreadPool>> {
        let Some(num_threads) = self.settings.num_threads else {
            return Ok(None);
        };
        if let Some(pool) = self.pool.get() {
            return Ok(Some(pool));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("ppl-trace-worker-{}", i))
            .build()
            .context("Could not start thread pool")?;
        debug!(num_threads, "started thread pool");
        // A concurrent batch may have won the race; its pool is used then.
        let _ = self.pool.set(pool);
        Ok(self.pool.get())
    }

    /// A log density over the unconstrained representation.
    pub fn link(&self) -> Result<Self> {
        Ok(LogDensityFunction {
            trace: self.trace.link()?,
            ..self.clone()
        })
    }

    /// A log density over the constrained representation.
    pub fn invlink(&self) -> Result<Self> {
        Ok(LogDensityFunction {
            trace: self.trace.invlink()?,
            ..self.clone()
        })
    }

    /// Free variables in the current representation.
    pub fn params(&self) -> Vec<f64> {
        self.trace.selected_flat(self.context.selection())
    }

    pub fn params_constrained(&self) -> Result<Vec<f64>> {
        if !self.is_linked() {
            return Ok(self.params());
        }
        Ok(self.trace.invlink()?.selected_flat(self.context.selection()))
    }

    pub fn params_unconstrained(&self) -> Result<Vec<f64>> {
        if self.is_linked() {
            return Ok(self.params());
        }
        Ok(self.trace.link()?.selected_flat(self.context.selection()))
    }
}

impl LogDensity for LogDensityFunction {
    type Err = PplError;

    fn dim(&self) -> usize {
        self.dimension()
    }

    fn logp(&self, position: &[f64]) -> Result<f64> {
        self.evaluate(position)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            order: DifferentiationOrder::Zero,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{distributions::Normal, program::Program, Rhs};

    fn normal() -> Model {
        Model::new(
            "normal",
            Program::new().tilde("x", |_| Ok(Rhs::dist(Normal::new(0., 1.)?))),
        )
    }

    #[test]
    fn thread_pool_is_built_once() {
        let settings = EvalSettings {
            num_threads: Some(2),
            ..Default::default()
        };
        let ldf = LogDensityFunction::from_model(normal(), &settings).unwrap();
        assert!(ldf.pool.get().is_none());

        let thetas = vec![vec![0.5], vec![-1.]];
        let first = ldf.evaluate_batch(&thetas).unwrap();
        let pool = ldf.pool.get().unwrap() as *const ThreadPool;
        assert_eq!(ldf.pool.get().unwrap().current_num_threads(), 2);

        let copy = ldf.clone();
        let second = copy.evaluate_batch(&thetas).unwrap();
        assert_eq!(first, second);
        assert!(std::ptr::eq(copy.pool.get().unwrap(), pool));

        let serial = ldf.with_settings(EvalSettings::default());
        assert!(serial.pool.get().is_none());
        assert_eq!(serial.evaluate_batch(&thetas).unwrap(), first);
        assert!(serial.pool.get().is_none());
    }
}
