use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use ppl_trace::{
    distributions::{Exponential, Normal},
    EvalSettings, LogDensityFunction, Model, Program, Rhs, Shape, Value, VarName, VarTrace,
};

fn make_model(n: usize) -> Model {
    let y: Vec<f64> = (0..n).map(|i| (i as f64 / n as f64) - 0.5).collect();
    let program = Program::new()
        .tilde("sigma", |_| Ok(Rhs::dist(Exponential::new(1.)?)))
        .tilde("m", |_| Ok(Rhs::dist(Normal::new(0., 1.)?)))
        .dot_tilde("y", Shape::Vector(n), |env| {
            Ok(Rhs::dist(Normal::new(env.scalar("m")?, env.scalar("sigma")?)?))
        });
    Model::new("bench", program).with_arg("y", y)
}

fn criterion_benchmark(c: &mut Criterion) {
    for n in [10, 1000] {
        let settings = EvalSettings {
            link: true,
            ..Default::default()
        };
        let ldf = LogDensityFunction::from_model(make_model(n), &settings).unwrap();
        let theta = ldf.params();
        c.bench_function(&format!("evaluate linked {}", n), |b| {
            b.iter(|| ldf.evaluate(black_box(&theta)).unwrap())
        });
    }

    let ldf = LogDensityFunction::from_model(make_model(100), &EvalSettings::default()).unwrap();
    let thetas: Vec<Vec<f64>> = (0..256)
        .map(|i| vec![1. + i as f64 / 256., i as f64 / 256.])
        .collect();
    c.bench_function("evaluate batch 256", |b| {
        b.iter(|| ldf.evaluate_batch(black_box(&thetas)).unwrap())
    });

    let names: Vec<VarName> = (0..100).map(|i| VarName::new("x").index([i])).collect();
    c.bench_function("grow and shrink 100", |b| {
        b.iter_batched(
            || {
                VarTrace::from_pairs(names.iter().map(|name| (name, Value::Scalar(0.)))).unwrap()
            },
            |mut trace| {
                for name in &names {
                    trace.update(name, Value::Vector(vec![1.; 3]), None).unwrap();
                }
                for name in &names {
                    trace.update(name, Value::Scalar(2.), None).unwrap();
                }
                trace.contiguify();
                trace
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
