use crate::context::Sampler;

/// Settings for building and evaluating a log density function
#[derive(Debug, Clone, Copy)]
pub struct EvalSettings {
    /// Seed of the random number generator used to populate the initial
    /// trace and for any draws during evaluation.
    pub seed: u64,
    /// How variables missing from the trace are initialized.
    pub sampler: Sampler,
    /// Store constrained variables in unconstrained space.
    pub link: bool,
    /// Size of the thread pool for batched evaluation. Uses the global
    /// rayon pool if `None`.
    pub num_threads: Option<usize>,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            sampler: Sampler::Prior,
            link: false,
            num_threads: None,
        }
    }
}
