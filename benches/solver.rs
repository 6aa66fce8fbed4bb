//! Benchmarks for the CPU stable fluids solver.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use stable_fluids::{
    compute::{CpuSolver, StepInput},
    schema::FluidConfig,
};

fn bench_solver_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_solver_step");

    for size in [64, 128, 256, 512] {
        let config = FluidConfig {
            width: size,
            height: size,
            ..Default::default()
        };

        group.bench_with_input(BenchmarkId::from_parameter(size), &config, |b, config| {
            let mut solver = CpuSolver::new(config.clone());
            let mut time = 0.0f32;
            b.iter(|| {
                solver.step(black_box(StepInput {
                    time,
                    pointer_uv: [0.5 + 0.2 * time.cos(), 0.5 + 0.2 * time.sin()],
                }));
                time += config.dt;
            });
        });
    }

    group.finish();
}

fn bench_pressure_relaxation(c: &mut Criterion) {
    let mut group = c.benchmark_group("pressure_iterations");

    for iterations in [10, 20, 40] {
        let config = FluidConfig {
            width: 256,
            height: 256,
            pressure_iterations: iterations,
            ..Default::default()
        };

        group.bench_with_input(
            BenchmarkId::from_parameter(iterations),
            &config,
            |b, config| {
                let mut solver = CpuSolver::new(config.clone());
                b.iter(|| {
                    solver.step(black_box(StepInput {
                        time: 0.0,
                        pointer_uv: [0.5, 0.5],
                    }));
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_solver_step, bench_pressure_relaxation);
criterion_main!(benches);
