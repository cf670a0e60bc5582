//! Evaluation runtime for probabilistic models.
//!
//! Models issue named sample and observe statements. Every statement is
//! classified as an assumption or an observation, routed through a chain
//! of [`Context`] nodes and scored, with the realized values kept in a
//! [`VarTrace`]. A [`LogDensityFunction`] exposes the accumulated log
//! density as a function of a flat parameter vector.
//!
//! ```no_run
//! use ppl_trace::{
//!     distributions::{Exponential, Normal},
//!     EvalSettings, LogDensityFunction, Model, Program, Rhs,
//! };
//!
//! let program = Program::new()
//!     .tilde("sigma", |_| Ok(Rhs::dist(Exponential::new(1.)?)))
//!     .tilde("y", |env| Ok(Rhs::dist(Normal::new(0., env.scalar("sigma")?)?)));
//! let model = Model::new("demo", program).with_arg("y", 0.3);
//!
//! let settings = EvalSettings {
//!     link: true,
//!     ..Default::default()
//! };
//! let logp = LogDensityFunction::from_model(model, &settings)?;
//! let value = logp.evaluate(&[0.1])?;
//! # Ok::<(), ppl_trace::PplError>(())
//! ```

pub(crate) mod math;

pub mod context;
pub mod distributions;
pub mod error;
pub mod logdensity;
pub mod model;
pub mod program;
pub mod settings;
pub mod trace;
pub mod transform;
pub mod value;
pub mod varname;

pub use context::{Context, Sampler};
pub use error::{LogpError, PplError, Result};
pub use logdensity::{Capabilities, DifferentiationOrder, LogDensity, LogDensityFunction};
pub use model::{Env, Evaluation, Evaluator, Model};
pub use program::{Lhs, Program, Rhs, Statement};
pub use settings::EvalSettings;
pub use trace::{Materialized, ValueKind, VarTrace};
pub use transform::{Bijector, Support, Transform};
pub use value::{Data, Shape, Value};
pub use varname::{Accessor, VarName, VarSelection};
