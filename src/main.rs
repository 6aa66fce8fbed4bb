//! Stable fluids CLI - Run headless simulations from JSON configuration.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use stable_fluids::{
    compute::{CpuSolver, StepInput, gpu::GpuError},
    schema::FluidConfig,
    GpuSolver,
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [steps]", args[0]);
        eprintln!();
        eprintln!("Run a headless stable fluids simulation from JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to simulation configuration file");
        eprintln!("  steps        Number of simulation steps (default: 100)");
        eprintln!();
        eprintln!("An example configuration is printed with --example.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let steps: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(100);

    let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });

    let config: FluidConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = config.validate() {
        eprintln!("Invalid config: {}", e);
        std::process::exit(1);
    }

    println!("Stable Fluids Simulation");
    println!("========================");
    println!("Grid: {}x{}", config.width, config.height);
    println!(
        "Pressure: {} Jacobi passes (alpha={}, beta={})",
        config.pressure_iterations, config.pressure_alpha, config.pressure_beta
    );

    // The pointer orbits the grid so every run stirs the fluid even
    // without interactive input.
    let pointer_at = |time: f32| -> [f32; 2] {
        [
            0.5 + 0.25 * (0.5 * time).cos(),
            0.5 + 0.25 * (0.5 * time).sin(),
        ]
    };

    let start = Instant::now();
    match pollster::block_on(GpuSolver::new(config.clone())) {
        Ok(mut solver) => {
            println!("Backend: GPU");
            let mut time = 0.0f32;
            for step in 0..steps {
                let input = StepInput {
                    time,
                    pointer_uv: pointer_at(time),
                };
                if let Err(e) = solver.step(input) {
                    eprintln!("Step {} failed: {}", step, e);
                    std::process::exit(1);
                }
                time += config.dt;
            }
            report(start, steps, &velocity_stats(&solver));
        }
        Err(GpuError::NoAdapter) => {
            println!("Backend: CPU (no GPU adapter available)");
            let mut solver = CpuSolver::new(config.clone());
            let mut time = 0.0f32;
            for _ in 0..steps {
                solver.step(StepInput {
                    time,
                    pointer_uv: pointer_at(time),
                });
                time += config.dt;
            }
            let state = solver.state();
            let stats = field_stats(&state.u, &state.v);
            report(start, steps, &stats);
        }
        Err(e) => {
            eprintln!("Failed to initialize GPU solver: {}", e);
            std::process::exit(1);
        }
    }
}

struct FieldStats {
    mean_speed: f32,
    max_speed: f32,
}

fn field_stats(u: &[f32], v: &[f32]) -> FieldStats {
    let mut sum = 0.0f32;
    let mut max = 0.0f32;
    for (&x, &y) in u.iter().zip(v.iter()) {
        let speed = (x * x + y * y).sqrt();
        sum += speed;
        max = max.max(speed);
    }
    FieldStats {
        mean_speed: sum / u.len() as f32,
        max_speed: max,
    }
}

fn velocity_stats(solver: &GpuSolver) -> FieldStats {
    match solver.read_velocity() {
        Ok((u, v)) => field_stats(&u, &v),
        Err(e) => {
            eprintln!("Failed to read back velocity: {}", e);
            std::process::exit(1);
        }
    }
}

fn report(start: Instant, steps: u64, stats: &FieldStats) {
    let elapsed = start.elapsed();
    println!();
    println!("Completed {} steps in {:.2?}", steps, elapsed);
    println!(
        "  {:.2} steps/sec",
        steps as f64 / elapsed.as_secs_f64()
    );
    println!("  mean speed: {:.4}", stats.mean_speed);
    println!("  max speed:  {:.4}", stats.max_speed);
}

fn print_example_config() {
    let example = FluidConfig::default();
    println!("{}", serde_json::to_string_pretty(&example).unwrap());
}
