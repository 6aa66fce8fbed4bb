//! GPU implementation of the stable fluids pipeline.
//!
//! Executes five stages per step over double-buffered storage textures:
//! divergence, a fixed count of Jacobi pressure passes, velocity update,
//! semi-Lagrangian advection, and rendering. All dispatches of one step
//! go through a single command encoder and one submit; ordering between
//! stages relies on the device's program-order dispatch visibility.

use crate::compute::StepInput;
use crate::schema::FluidConfig;

use super::{BindSlot, GpuContext, GpuDoubleTexture, GpuError, GpuTexture, ShaderProgram, TextureDesc};

const DIVERGENCE_SHADER: &str = include_str!("shaders/divergence.wgsl");
const PRESSURE_SHADER: &str = include_str!("shaders/pressure.wgsl");
const VELOCITY_UPDATE_SHADER: &str = include_str!("shaders/velocity_update.wgsl");
const ADVECTION_SHADER: &str = include_str!("shaders/advection.wgsl");
const RENDER_SHADER: &str = include_str!("shaders/render.wgsl");

/// Uniform buffer struct for the pressure kernel.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct PressureParams {
    alpha: f32,
    beta: f32,
    _pad0: f32,
    _pad1: f32,
}

/// Uniform buffer struct for the velocity update kernel.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct VelocityParams {
    pointer: [f32; 2],
    prev_pointer: [f32; 2],
    force_radius: f32,
    force_coefficient: f32,
    auto_force_coefficient: f32,
    viscosity: f32,
    time: f32,
    _pad: [f32; 3],
}

/// Uniform buffer struct for the advection kernel.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct AdvectParams {
    dt: f32,
    _pad: [f32; 3],
}

struct Programs {
    divergence: ShaderProgram,
    pressure: ShaderProgram,
    velocity_update: ShaderProgram,
    advection: ShaderProgram,
    rendering: ShaderProgram,
}

/// The five-stage stable fluids pipeline on a wgpu device.
pub struct GpuSolver {
    ctx: GpuContext,
    config: FluidConfig,
    programs: Programs,

    velocity: GpuDoubleTexture,
    divergence: GpuTexture,
    pressure: GpuDoubleTexture,
    render_target: GpuTexture,

    pressure_params: wgpu::Buffer,
    velocity_params: wgpu::Buffer,
    advect_params: wgpu::Buffer,

    prev_pointer_uv: [f32; 2],
}

fn uniform_buffer<T>(ctx: &GpuContext, label: &str) -> wgpu::Buffer {
    ctx.device().create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: std::mem::size_of::<T>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

impl GpuSolver {
    /// Acquire a device and set up all programs and resources.
    ///
    /// Every entry point is resolved here; a missing kernel is fatal to
    /// construction, not deferred to the first step.
    pub async fn new(config: FluidConfig) -> Result<Self, GpuError> {
        config.validate().expect("Invalid configuration");

        let ctx = GpuContext::new().await?;

        let mut programs = Programs {
            divergence: ShaderProgram::new(&ctx, "Divergence", DIVERGENCE_SHADER),
            pressure: ShaderProgram::new(&ctx, "Pressure", PRESSURE_SHADER),
            velocity_update: ShaderProgram::new(&ctx, "VelocityUpdate", VELOCITY_UPDATE_SHADER),
            advection: ShaderProgram::new(&ctx, "Advection", ADVECTION_SHADER),
            rendering: ShaderProgram::new(&ctx, "Rendering", RENDER_SHADER),
        };
        programs.divergence.resolve(&ctx, "calc_divergence")?;
        programs.pressure.resolve(&ctx, "calc_pressure")?;
        programs.velocity_update.resolve(&ctx, "update_velocity")?;
        programs.advection.resolve(&ctx, "advect")?;
        programs.rendering.resolve(&ctx, "render")?;

        let pressure_params = uniform_buffer::<PressureParams>(&ctx, "Pressure Params");
        let velocity_params = uniform_buffer::<VelocityParams>(&ctx, "Velocity Params");
        let advect_params = uniform_buffer::<AdvectParams>(&ctx, "Advect Params");

        let mut solver = Self {
            ctx,
            config,
            programs,
            velocity: GpuDoubleTexture::new(),
            divergence: GpuTexture::new(),
            pressure: GpuDoubleTexture::new(),
            render_target: GpuTexture::new(),
            pressure_params,
            velocity_params,
            advect_params,
            prev_pointer_uv: [0.0, 0.0],
        };
        solver.init_resources()?;
        Ok(solver)
    }

    fn field_descs(&self) -> (TextureDesc, TextureDesc, TextureDesc) {
        let (w, h) = (self.config.width as u32, self.config.height as u32);
        (
            TextureDesc::new(w, h, wgpu::TextureFormat::Rg32Float),
            TextureDesc::new(w, h, wgpu::TextureFormat::R32Float),
            TextureDesc::new(w, h, wgpu::TextureFormat::Rgba8Unorm),
        )
    }

    fn init_resources(&mut self) -> Result<(), GpuError> {
        let (vel_desc, scalar_desc, render_desc) = self.field_descs();
        self.velocity.init(&self.ctx, vel_desc)?;
        self.divergence.init(&self.ctx, scalar_desc)?;
        self.pressure.init(&self.ctx, scalar_desc)?;
        self.render_target.init(&self.ctx, render_desc)?;
        self.clear_fields()
    }

    /// Zero all field textures. Device textures start zeroed, but a
    /// reinit path shares this to make reset explicit.
    fn clear_fields(&mut self) -> Result<(), GpuError> {
        let n = self.config.grid_size();
        self.velocity.read().set_data(&self.ctx, &vec![0.0f32; n * 2])?;
        self.velocity.write().set_data(&self.ctx, &vec![0.0f32; n * 2])?;
        self.divergence.set_data(&self.ctx, &vec![0.0f32; n])?;
        self.pressure.read().set_data(&self.ctx, &vec![0.0f32; n])?;
        self.pressure.write().set_data(&self.ctx, &vec![0.0f32; n])?;
        Ok(())
    }

    /// Configuration reference.
    pub fn config(&self) -> &FluidConfig {
        &self.config
    }

    /// Device context shared by the solver's resources.
    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// The render texture written by the last step, for presentation by
    /// an external surface.
    pub fn render_texture(&self) -> &GpuTexture {
        &self.render_target
    }

    /// Resize the grid, discarding all field contents. Must only be
    /// called between steps; a mid-step resize would invalidate in-flight
    /// bindings.
    pub fn resize(&mut self, width: usize, height: usize) -> Result<(), GpuError> {
        self.config.width = width;
        self.config.height = height;
        let (vel_desc, scalar_desc, render_desc) = self.field_descs();
        self.velocity.check_size_changed(&self.ctx, vel_desc)?;
        self.divergence.check_size_changed(&self.ctx, scalar_desc)?;
        self.pressure.check_size_changed(&self.ctx, scalar_desc)?;
        self.render_target.check_size_changed(&self.ctx, render_desc)?;
        self.clear_fields()
    }

    /// Advance the simulation by one step.
    ///
    /// A device-rejected dispatch surfaces as [`GpuError::Dispatch`]; the
    /// step is not retried and the fields retain whatever the device last
    /// wrote.
    pub fn step(&mut self, input: StepInput) -> Result<(), GpuError> {
        let size = [self.config.width as u32, self.config.height as u32, 1];

        let error_scope = self.ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Fluid Step Encoder"),
            });

        // Stage 1: divergence of the current velocity.
        let kernel = self.programs.divergence.resolve(&self.ctx, "calc_divergence")?;
        kernel.dispatch(
            &self.ctx,
            &mut encoder,
            &[
                (1, BindSlot::Texture(self.velocity.read().view()?)),
                (2, BindSlot::Texture(self.divergence.view()?)),
            ],
            size,
        );

        // Stage 2: Jacobi pressure relaxation. Each pass reads the
        // previous pass' half and the roles swap between dispatches;
        // queue ordering keeps every pass' writes visible to the next.
        self.ctx.queue.write_buffer(
            &self.pressure_params,
            0,
            bytemuck::bytes_of(&PressureParams {
                alpha: self.config.pressure_alpha,
                beta: self.config.pressure_beta,
                _pad0: 0.0,
                _pad1: 0.0,
            }),
        );
        let kernel = self.programs.pressure.resolve(&self.ctx, "calc_pressure")?;
        for _ in 0..self.config.pressure_iterations {
            kernel.dispatch(
                &self.ctx,
                &mut encoder,
                &[
                    (1, BindSlot::Buffer(&self.pressure_params)),
                    (2, BindSlot::Texture(self.divergence.view()?)),
                    (3, BindSlot::Texture(self.pressure.read().view()?)),
                    (4, BindSlot::Texture(self.pressure.write().view()?)),
                ],
                size,
            );
            self.pressure.swap();
        }

        // Stage 3: projection and force injection. Writes the write half
        // and copies it back into the read half; the velocity roles swap
        // only in the advection stage.
        self.ctx.queue.write_buffer(
            &self.velocity_params,
            0,
            bytemuck::bytes_of(&VelocityParams {
                pointer: input.pointer_uv,
                prev_pointer: self.prev_pointer_uv,
                force_radius: self.config.force_radius,
                force_coefficient: self.config.force_coefficient,
                auto_force_coefficient: self.config.auto_force_coefficient,
                viscosity: self.config.viscosity,
                time: input.time,
                _pad: [0.0; 3],
            }),
        );
        let kernel = self
            .programs
            .velocity_update
            .resolve(&self.ctx, "update_velocity")?;
        kernel.dispatch(
            &self.ctx,
            &mut encoder,
            &[
                (1, BindSlot::Buffer(&self.velocity_params)),
                (2, BindSlot::Texture(self.velocity.read().view()?)),
                (3, BindSlot::Texture(self.pressure.read().view()?)),
                (4, BindSlot::Texture(self.velocity.write().view()?)),
            ],
            size,
        );
        let extent = wgpu::Extent3d {
            width: size[0],
            height: size[1],
            depth_or_array_layers: 1,
        };
        encoder.copy_texture_to_texture(
            self.velocity.write().raw()?.as_image_copy(),
            self.velocity.read().raw()?.as_image_copy(),
            extent,
        );

        // Stage 4: advection, the step's single velocity swap.
        self.ctx.queue.write_buffer(
            &self.advect_params,
            0,
            bytemuck::bytes_of(&AdvectParams {
                dt: self.config.dt,
                _pad: [0.0; 3],
            }),
        );
        let kernel = self.programs.advection.resolve(&self.ctx, "advect")?;
        kernel.dispatch(
            &self.ctx,
            &mut encoder,
            &[
                (1, BindSlot::Buffer(&self.advect_params)),
                (2, BindSlot::Texture(self.velocity.read().view()?)),
                (3, BindSlot::Texture(self.velocity.write().view()?)),
            ],
            size,
        );
        self.velocity.swap();

        // Stage 5: render the visible output.
        let kernel = self.programs.rendering.resolve(&self.ctx, "render")?;
        kernel.dispatch(
            &self.ctx,
            &mut encoder,
            &[
                (1, BindSlot::Texture(self.velocity.read().view()?)),
                (2, BindSlot::Texture(self.pressure.read().view()?)),
                (3, BindSlot::Texture(self.render_target.view()?)),
            ],
            size,
        );

        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        if let Some(err) = pollster::block_on(error_scope.pop()) {
            log::error!("fluid step rejected by device: {err}");
            return Err(GpuError::Dispatch(err.to_string()));
        }

        self.prev_pointer_uv = input.pointer_uv;
        Ok(())
    }

    /// Run the solver for `steps` steps with a fixed pointer.
    pub fn run(&mut self, steps: u64, mut input: StepInput) -> Result<(), GpuError> {
        for _ in 0..steps {
            self.step(input)?;
            input.time += self.config.dt;
        }
        Ok(())
    }

    /// Overwrite the velocity field, e.g. to seed an initial flow.
    pub fn set_velocity(&mut self, u: &[f32], v: &[f32]) -> Result<(), GpuError> {
        let n = self.config.grid_size();
        if u.len() != n || v.len() != n {
            return Err(GpuError::Range {
                offset: 0,
                len: u.len().max(v.len()),
                capacity: n,
            });
        }
        let mut interleaved = vec![0.0f32; n * 2];
        for i in 0..n {
            interleaved[i * 2] = u[i];
            interleaved[i * 2 + 1] = v[i];
        }
        self.velocity.read().set_data(&self.ctx, &interleaved)
    }

    /// Download the velocity field as `(u, v)` component vectors.
    pub fn read_velocity(&self) -> Result<(Vec<f32>, Vec<f32>), GpuError> {
        let n = self.config.grid_size();
        let mut interleaved = vec![0.0f32; n * 2];
        self.velocity.read().get_data(&self.ctx, &mut interleaved)?;
        let u = interleaved.iter().step_by(2).copied().collect();
        let v = interleaved.iter().skip(1).step_by(2).copied().collect();
        Ok((u, v))
    }

    /// Download the pressure field.
    pub fn read_pressure(&self) -> Result<Vec<f32>, GpuError> {
        let mut out = vec![0.0f32; self.config.grid_size()];
        self.pressure.read().get_data(&self.ctx, &mut out)?;
        Ok(out)
    }

    /// Download the render texture as RGBA bytes.
    pub fn read_render(&self) -> Result<Vec<u8>, GpuError> {
        let mut out = vec![0u8; self.config.grid_size() * 4];
        self.render_target.get_data(&self.ctx, &mut out)?;
        Ok(out)
    }
}

impl Drop for GpuSolver {
    fn drop(&mut self) {
        self.velocity.dispose();
        self.divergence.dispose();
        self.pressure.dispose();
        self.render_target.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::CpuSolver;

    fn test_config() -> FluidConfig {
        FluidConfig {
            width: 16,
            height: 16,
            ..Default::default()
        }
    }

    fn test_solver(config: FluidConfig) -> Option<GpuSolver> {
        match pollster::block_on(GpuSolver::new(config)) {
            Ok(solver) => Some(solver),
            Err(GpuError::NoAdapter) => {
                eprintln!("Skipping GPU test: no adapter available");
                None
            }
            Err(e) => panic!("Failed to create GPU solver: {e:?}"),
        }
    }

    #[test]
    fn one_step_executes() {
        let Some(mut solver) = test_solver(test_config()) else {
            return;
        };
        solver
            .step(StepInput {
                time: 0.0,
                pointer_uv: [0.5, 0.5],
            })
            .unwrap();
    }

    #[test]
    fn render_reflects_pointer_input() {
        let config = FluidConfig {
            force_coefficient: 5.0,
            ..test_config()
        };
        let Some(mut solver) = test_solver(config) else {
            return;
        };

        solver
            .step(StepInput {
                time: 0.0,
                pointer_uv: [0.25, 0.5],
            })
            .unwrap();
        let first = solver.read_render().unwrap();

        solver
            .step(StepInput {
                time: 1.0,
                pointer_uv: [0.75, 0.5],
            })
            .unwrap();
        let second = solver.read_render().unwrap();

        assert_ne!(first, second, "render output was not refreshed");
    }

    #[test]
    fn resize_between_steps_reallocates() {
        let Some(mut solver) = test_solver(test_config()) else {
            return;
        };
        solver
            .step(StepInput {
                time: 0.0,
                pointer_uv: [0.5, 0.5],
            })
            .unwrap();

        solver.resize(8, 8).unwrap();
        assert_eq!(solver.read_render().unwrap().len(), 8 * 8 * 4);

        solver
            .step(StepInput {
                time: 1.0,
                pointer_uv: [0.5, 0.5],
            })
            .unwrap();
    }

    #[test]
    fn pointer_force_stirs_still_field_locally() {
        let config = FluidConfig {
            width: 4,
            height: 4,
            force_radius: 1.2,
            auto_force_coefficient: 0.0,
            ..Default::default()
        };
        let Some(mut solver) = test_solver(config) else {
            return;
        };

        solver
            .step(StepInput {
                time: 0.0,
                pointer_uv: [0.25, 0.5],
            })
            .unwrap();
        solver
            .step(StepInput {
                time: 1.0,
                pointer_uv: [0.625, 0.5],
            })
            .unwrap();

        let (u, v) = solver.read_velocity().unwrap();
        let speed = |x: usize, y: usize| {
            let i = y * 4 + x;
            (u[i] * u[i] + v[i] * v[i]).sqrt()
        };
        let near = speed(2, 2).max(speed(2, 1));
        let far = speed(0, 0);
        assert!(near > 0.0, "no velocity injected near the pointer");
        assert!(far <= near, "force propagated past the still field");
    }

    /// The GPU pipeline must track the CPU reference solver through
    /// several steps, including the fixed-count pressure relaxation.
    #[test]
    fn gpu_matches_cpu_solver() {
        let config = test_config();
        let Some(mut gpu) = test_solver(config.clone()) else {
            return;
        };
        let mut cpu = CpuSolver::new(config.clone());

        // Seed both with the same nonzero flow.
        let n = config.grid_size();
        let u: Vec<f32> = (0..n).map(|i| ((i % 7) as f32 - 3.0) * 0.1).collect();
        let v: Vec<f32> = (0..n).map(|i| ((i % 5) as f32 - 2.0) * 0.1).collect();
        gpu.set_velocity(&u, &v).unwrap();
        cpu.set_velocity(&u, &v);

        let mut input = StepInput {
            time: 0.0,
            pointer_uv: [0.3, 0.4],
        };
        for step in 0..3 {
            gpu.step(input).unwrap();
            cpu.step(input);
            input.time += config.dt;
            input.pointer_uv[0] += 0.1;

            let (gu, gv) = gpu.read_velocity().unwrap();
            let max_diff = gu
                .iter()
                .zip(cpu.state().u.iter())
                .chain(gv.iter().zip(cpu.state().v.iter()))
                .map(|(a, b)| (a - b).abs())
                .fold(0.0f32, f32::max);
            assert!(
                max_diff < 1e-3,
                "step {step}: GPU/CPU velocity mismatch, max diff {max_diff}"
            );

            let gp = gpu.read_pressure().unwrap();
            let p_diff = gp
                .iter()
                .zip(cpu.state().pressure.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0f32, f32::max);
            assert!(
                p_diff < 1e-3,
                "step {step}: GPU/CPU pressure mismatch, max diff {p_diff}"
            );
        }
    }
}
