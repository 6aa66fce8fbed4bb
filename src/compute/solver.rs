//! CPU reference solver for the stable fluids method.
//!
//! Runs the same five stages as the GPU pipeline (divergence, Jacobi
//! pressure relaxation, velocity update, semi-Lagrangian advection,
//! rendering) on host memory. Serves as the fallback backend when no
//! GPU adapter is available and as the reference for GPU equivalence
//! tests.

use crate::schema::FluidConfig;

/// Scalar and vector fields of the simulation, in row-major order
/// (`idx = y * width + x`).
#[derive(Debug, Clone)]
pub struct FieldState {
    /// Horizontal velocity component per cell.
    pub u: Vec<f32>,
    /// Vertical velocity component per cell.
    pub v: Vec<f32>,
    /// Pressure field per cell.
    pub pressure: Vec<f32>,
    /// Velocity divergence per cell.
    pub divergence: Vec<f32>,
}

impl FieldState {
    /// Create a zeroed state for a grid of `width * height` cells.
    pub fn zeroed(width: usize, height: usize) -> Self {
        let n = width * height;
        Self {
            u: vec![0.0; n],
            v: vec![0.0; n],
            pressure: vec![0.0; n],
            divergence: vec![0.0; n],
        }
    }
}

/// Per-step external inputs supplied by the driving application.
///
/// `pointer_uv` is in simulation UV space `[0,1] x [0,1]`. Off-grid
/// pointers are passed through unclamped; the radial falloff makes a
/// far-away pointer a no-op.
#[derive(Debug, Clone, Copy)]
pub struct StepInput {
    /// Elapsed simulation time in seconds (monotonic).
    pub time: f32,
    /// Current pointer position in UV space.
    pub pointer_uv: [f32; 2],
}

/// CPU implementation of the stable fluids pipeline.
pub struct CpuSolver {
    config: FluidConfig,
    state: FieldState,
    scratch: Vec<f32>,
    scratch2: Vec<f32>,
    prev_pointer_uv: [f32; 2],
}

#[inline]
fn clamped_idx(x: isize, y: isize, width: usize, height: usize) -> usize {
    let cx = x.clamp(0, width as isize - 1) as usize;
    let cy = y.clamp(0, height as isize - 1) as usize;
    cy * width + cx
}

/// Bilinear sample of a field at position `(px, py)` in cell-center
/// coordinates, with clamped taps.
fn bilinear(field: &[f32], width: usize, height: usize, px: f32, py: f32) -> f32 {
    let fx = px - 0.5;
    let fy = py - 0.5;
    let x0 = fx.floor();
    let y0 = fy.floor();
    let tx = fx - x0;
    let ty = fy - y0;
    let x0 = x0 as isize;
    let y0 = y0 as isize;

    let s00 = field[clamped_idx(x0, y0, width, height)];
    let s10 = field[clamped_idx(x0 + 1, y0, width, height)];
    let s01 = field[clamped_idx(x0, y0 + 1, width, height)];
    let s11 = field[clamped_idx(x0 + 1, y0 + 1, width, height)];

    let a = s00 + (s10 - s00) * tx;
    let b = s01 + (s11 - s01) * tx;
    a + (b - a) * ty
}

/// Radial falloff of an injected force: 1 at the center, 0 at the radius.
#[inline]
fn force_falloff(dist: f32, radius: f32) -> f32 {
    (1.0 - dist / radius).max(0.0)
}

/// Angular frequency of the ambient force orbit, in radians per second.
const AUTO_FORCE_OMEGA: f32 = 0.7;
/// Orbit radius of the ambient force center, in UV units.
const AUTO_FORCE_ORBIT: f32 = 0.3;

impl CpuSolver {
    /// Create a solver with zeroed fields.
    pub fn new(config: FluidConfig) -> Self {
        let n = config.grid_size();
        Self {
            state: FieldState::zeroed(config.width, config.height),
            scratch: vec![0.0; n],
            scratch2: vec![0.0; n],
            config,
            prev_pointer_uv: [0.0, 0.0],
        }
    }

    /// Configuration reference.
    pub fn config(&self) -> &FluidConfig {
        &self.config
    }

    /// Current field state.
    pub fn state(&self) -> &FieldState {
        &self.state
    }

    /// Overwrite the velocity field, e.g. to seed an initial flow.
    ///
    /// Both slices must hold exactly `width * height` elements.
    pub fn set_velocity(&mut self, u: &[f32], v: &[f32]) {
        assert_eq!(u.len(), self.config.grid_size());
        assert_eq!(v.len(), self.config.grid_size());
        self.state.u.copy_from_slice(u);
        self.state.v.copy_from_slice(v);
    }

    /// Resize the grid, discarding all field contents. Must only be
    /// called between steps.
    pub fn resize(&mut self, width: usize, height: usize) {
        self.config.width = width;
        self.config.height = height;
        let n = width * height;
        self.state = FieldState::zeroed(width, height);
        self.scratch = vec![0.0; n];
        self.scratch2 = vec![0.0; n];
    }

    /// Advance the simulation by one step.
    pub fn step(&mut self, input: StepInput) {
        self.calc_divergence();
        self.relax_pressure();
        self.update_velocity(input);
        self.advect();
        self.prev_pointer_uv = input.pointer_uv;
    }

    /// Run the solver for `steps` steps with a fixed pointer.
    pub fn run(&mut self, steps: u64, mut input: StepInput) {
        for _ in 0..steps {
            self.step(input);
            input.time += self.config.dt;
        }
    }

    /// Stage 1: central-difference divergence of the velocity field.
    fn calc_divergence(&mut self) {
        let (w, h) = (self.config.width, self.config.height);
        for y in 0..h {
            for x in 0..w {
                let (xi, yi) = (x as isize, y as isize);
                let du = self.state.u[clamped_idx(xi + 1, yi, w, h)]
                    - self.state.u[clamped_idx(xi - 1, yi, w, h)];
                let dv = self.state.v[clamped_idx(xi, yi + 1, w, h)]
                    - self.state.v[clamped_idx(xi, yi - 1, w, h)];
                self.state.divergence[y * w + x] = 0.5 * (du + dv);
            }
        }
    }

    /// Stage 2: fixed-count Jacobi relaxation of the pressure Poisson
    /// equation. Each pass reads only the previous pass' field.
    fn relax_pressure(&mut self) {
        for _ in 0..self.config.pressure_iterations {
            jacobi_pass(
                &self.state.pressure,
                &mut self.scratch,
                &self.state.divergence,
                self.config.width,
                self.config.height,
                self.config.pressure_alpha,
                self.config.pressure_beta,
            );
            std::mem::swap(&mut self.state.pressure, &mut self.scratch);
        }
    }

    /// Stage 3: pressure-gradient projection, force injection, damping.
    fn update_velocity(&mut self, input: StepInput) {
        let (w, h) = (self.config.width, self.config.height);
        let cfg = &self.config;

        let pointer_px = [
            input.pointer_uv[0] * w as f32,
            input.pointer_uv[1] * h as f32,
        ];
        let pointer_delta = [
            (input.pointer_uv[0] - self.prev_pointer_uv[0]) * w as f32,
            (input.pointer_uv[1] - self.prev_pointer_uv[1]) * h as f32,
        ];

        let phase = AUTO_FORCE_OMEGA * input.time;
        let auto_center_px = [
            (0.5 + AUTO_FORCE_ORBIT * phase.cos()) * w as f32,
            (0.5 + AUTO_FORCE_ORBIT * phase.sin()) * h as f32,
        ];
        let auto_dir = [-phase.sin(), phase.cos()];

        for y in 0..h {
            for x in 0..w {
                let (xi, yi) = (x as isize, y as isize);
                let i = y * w + x;

                let gpx = 0.5
                    * (self.state.pressure[clamped_idx(xi + 1, yi, w, h)]
                        - self.state.pressure[clamped_idx(xi - 1, yi, w, h)]);
                let gpy = 0.5
                    * (self.state.pressure[clamped_idx(xi, yi + 1, w, h)]
                        - self.state.pressure[clamped_idx(xi, yi - 1, w, h)]);

                let mut nu = self.state.u[i] - gpx;
                let mut nv = self.state.v[i] - gpy;

                let cx = x as f32 + 0.5;
                let cy = y as f32 + 0.5;

                let pd = ((cx - pointer_px[0]).powi(2) + (cy - pointer_px[1]).powi(2)).sqrt();
                let pf = cfg.force_coefficient * force_falloff(pd, cfg.force_radius);
                nu += pf * pointer_delta[0];
                nv += pf * pointer_delta[1];

                let ad = ((cx - auto_center_px[0]).powi(2) + (cy - auto_center_px[1]).powi(2))
                    .sqrt();
                let af = cfg.auto_force_coefficient * force_falloff(ad, cfg.force_radius);
                nu += af * auto_dir[0];
                nv += af * auto_dir[1];

                self.scratch[i] = nu * cfg.viscosity;
                self.scratch2[i] = nv * cfg.viscosity;
            }
        }

        self.state.u.copy_from_slice(&self.scratch);
        self.state.v.copy_from_slice(&self.scratch2);
    }

    /// Stage 4: semi-Lagrangian advection via backward trace.
    fn advect(&mut self) {
        let (w, h) = (self.config.width, self.config.height);
        let dt = self.config.dt;
        for y in 0..h {
            for x in 0..w {
                let i = y * w + x;
                let px = x as f32 + 0.5 - self.state.u[i] * dt;
                let py = y as f32 + 0.5 - self.state.v[i] * dt;
                self.scratch[i] = bilinear(&self.state.u, w, h, px, py);
                self.scratch2[i] = bilinear(&self.state.v, w, h, px, py);
            }
        }
        std::mem::swap(&mut self.state.u, &mut self.scratch);
        std::mem::swap(&mut self.state.v, &mut self.scratch2);
    }

    /// Stage 5: visualization of velocity and pressure as RGBA bytes,
    /// row-major, 4 bytes per cell. Matches the GPU render kernel.
    pub fn render_rgba8(&self) -> Vec<u8> {
        let n = self.config.grid_size();
        let mut out = Vec::with_capacity(n * 4);
        for i in 0..n {
            let (r, g, b) = render_color(self.state.u[i], self.state.v[i], self.state.pressure[i]);
            out.push((r * 255.0).round() as u8);
            out.push((g * 255.0).round() as u8);
            out.push((b * 255.0).round() as u8);
            out.push(255);
        }
        out
    }
}

/// One Jacobi pass: `p' = 0.25 * beta * (p_l + p_r + p_b + p_t - alpha * div)`
/// with edge-replicated neighbor taps.
pub fn jacobi_pass(
    pressure: &[f32],
    out: &mut [f32],
    divergence: &[f32],
    width: usize,
    height: usize,
    alpha: f32,
    beta: f32,
) {
    for y in 0..height {
        for x in 0..width {
            let (xi, yi) = (x as isize, y as isize);
            let sum = pressure[clamped_idx(xi - 1, yi, width, height)]
                + pressure[clamped_idx(xi + 1, yi, width, height)]
                + pressure[clamped_idx(xi, yi - 1, width, height)]
                + pressure[clamped_idx(xi, yi + 1, width, height)];
            out[y * width + x] = 0.25 * beta * (sum - alpha * divergence[y * width + x]);
        }
    }
}

/// Color mapping shared with the render kernel: velocity components into
/// red/green around mid-grey, pressure magnitude into blue.
#[inline]
pub fn render_color(u: f32, v: f32, pressure: f32) -> (f32, f32, f32) {
    (
        0.5 + 0.5 * u.clamp(-1.0, 1.0),
        0.5 + 0.5 * v.clamp(-1.0, 1.0),
        pressure.abs().clamp(0.0, 1.0),
    )
}
