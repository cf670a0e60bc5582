//! Posterior of a coin's bias from a handful of flips, explored with a
//! random walk Metropolis sampler in unconstrained space.

use anyhow::Result;
use ppl_trace::{distributions::Beta, EvalSettings, LogDensity, LogDensityFunction, Model, Program, Rhs};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

fn main() -> Result<()> {
    let flips = vec![1., 0., 1., 1., 1., 0., 1., 1.];
    let program = Program::new()
        .tilde("p", |_| Ok(Rhs::dist(Beta::new(2., 2.)?)))
        .add_logp(|env| {
            let p = env.scalar("p")?;
            let flips = env.vector("flips")?;
            Ok(flips
                .iter()
                .map(|&flip| if flip > 0.5 { p.ln() } else { (1. - p).ln() })
                .sum())
        });
    let model = Model::new("coin", program).with_arg("flips", flips.clone());

    let settings = EvalSettings {
        link: true,
        seed: 1,
        ..Default::default()
    };
    let logp = LogDensityFunction::from_model(model, &settings)?;
    assert_eq!(logp.dim(), 1);

    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let mut position = logp.params();
    let mut current = logp.logp(&position)?;
    let mut draws = Vec::new();
    for _ in 0..5000 {
        let step: f64 = rng.sample(StandardNormal);
        let proposal = vec![position[0] + 0.8 * step];
        let proposed = logp.logp(&proposal)?;
        if rng.random::<f64>().ln() < proposed - current {
            position = proposal;
            current = proposed;
        }
        draws.push(1. / (1. + (-position[0]).exp()));
    }

    let heads = flips.iter().sum::<f64>();
    let exact = (2. + heads) / (4. + flips.len() as f64);
    let mean = draws[1000..].iter().sum::<f64>() / (draws.len() - 1000) as f64;
    println!("posterior mean of p: {mean:.3} (exact {exact:.3})");
    Ok(())
}
