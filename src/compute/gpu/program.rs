//! Compute shader programs and kernel bindings.
//!
//! A [`ShaderProgram`] wraps one WGSL module and hands out cached
//! [`KernelBinding`]s per entry point. A binding carries the entry's
//! fixed workgroup extent, resolved once when the binding is created,
//! and issues dispatches sized by ceiling division over that extent.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::compute::dispatch::workgroup_counts;

use super::{GpuContext, GpuError};

/// A resource bound to one numbered slot of a kernel.
///
/// No type/slot compatibility is validated here; a mismatch surfaces as
/// a device validation error at dispatch time.
#[derive(Clone, Copy)]
pub enum BindSlot<'a> {
    Buffer(&'a wgpu::Buffer),
    Texture(&'a wgpu::TextureView),
}

/// Problem size and group count published to every kernel at binding 0.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct DispatchDims {
    num_threads: [u32; 3],
    _pad0: u32,
    num_groups: [u32; 3],
    _pad1: u32,
}

/// One entry point of a compute program: pipeline, workgroup extent and
/// the dims uniform it publishes per dispatch. Immutable after creation.
pub struct KernelBinding {
    pipeline: wgpu::ComputePipeline,
    workgroup_size: [u32; 3],
    dims: wgpu::Buffer,
}

impl KernelBinding {
    fn new(
        ctx: &GpuContext,
        module: &wgpu::ShaderModule,
        program: &str,
        entry: &str,
        workgroup_size: [u32; 3],
    ) -> Self {
        let label = format!("{program}/{entry}");
        let pipeline = ctx
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&label),
                layout: None,
                module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            });
        let dims = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{label} dims")),
            size: std::mem::size_of::<DispatchDims>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            pipeline,
            workgroup_size,
            dims,
        }
    }

    /// Fixed per-invocation workgroup extent of this entry point.
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }

    /// Encode one dispatch covering `size` invocations.
    ///
    /// Group counts are the ceiling of size over the workgroup extent, so
    /// edge cells are never left unprocessed. The problem size and group
    /// count are published to the shader through the binding-0 uniform.
    /// Caller resources start at binding 1.
    ///
    /// Precondition: every component of `size` is positive.
    ///
    /// The dims uniform is written once per encoder submission; dispatch
    /// the same kernel within one encoder only with one problem size.
    pub fn dispatch(
        &self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        bindings: &[(u32, BindSlot<'_>)],
        size: [u32; 3],
    ) -> [u32; 3] {
        let groups = workgroup_counts(size, self.workgroup_size);

        ctx.queue.write_buffer(
            &self.dims,
            0,
            bytemuck::bytes_of(&DispatchDims {
                num_threads: size,
                _pad0: 0,
                num_groups: groups,
                _pad1: 0,
            }),
        );

        let mut entries = Vec::with_capacity(bindings.len() + 1);
        entries.push(wgpu::BindGroupEntry {
            binding: 0,
            resource: self.dims.as_entire_binding(),
        });
        for (slot, bound) in bindings {
            entries.push(wgpu::BindGroupEntry {
                binding: *slot,
                resource: match bound {
                    BindSlot::Buffer(buffer) => buffer.as_entire_binding(),
                    BindSlot::Texture(view) => wgpu::BindingResource::TextureView(view),
                },
            });
        }

        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &self.pipeline.get_bind_group_layout(0),
            entries: &entries,
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        }

        groups
    }
}

/// A named compute program holding one kernel binding per resolved entry
/// point.
pub struct ShaderProgram {
    name: String,
    module: wgpu::ShaderModule,
    entry_extents: HashMap<String, [u32; 3]>,
    kernels: HashMap<String, KernelBinding>,
    device_queries: u32,
}

impl ShaderProgram {
    /// Compile `source` into a named program.
    pub fn new(ctx: &GpuContext, name: &str, source: &str) -> Self {
        let module = ctx
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        Self {
            name: name.to_string(),
            module,
            entry_extents: parse_entry_points(source),
            kernels: HashMap::new(),
            device_queries: 0,
        }
    }

    /// Program name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve an entry point, creating its binding on first use and
    /// returning the cached binding afterwards. Re-resolution never
    /// re-queries the device.
    pub fn resolve(&mut self, ctx: &GpuContext, entry: &str) -> Result<&KernelBinding, GpuError> {
        match self.kernels.entry(entry.to_string()) {
            Entry::Occupied(occupied) => Ok(occupied.into_mut()),
            Entry::Vacant(vacant) => {
                let extent = *self.entry_extents.get(entry).ok_or_else(|| {
                    GpuError::KernelLookup {
                        program: self.name.clone(),
                        entry: entry.to_string(),
                    }
                })?;
                self.device_queries += 1;
                Ok(vacant.insert(KernelBinding::new(ctx, &self.module, &self.name, entry, extent)))
            }
        }
    }

    /// Number of entry points resolved against the device so far.
    pub fn device_queries(&self) -> u32 {
        self.device_queries
    }
}

/// Extract `(entry point, workgroup extent)` pairs from WGSL source.
/// Unspecified trailing components default to 1.
fn parse_entry_points(source: &str) -> HashMap<String, [u32; 3]> {
    let mut out = HashMap::new();
    let mut rest = source;
    while let Some(pos) = rest.find("@workgroup_size") {
        let after = &rest[pos + "@workgroup_size".len()..];
        let Some(open) = after.find('(') else { break };
        let Some(close_rel) = after[open..].find(')') else {
            break;
        };
        let args = &after[open + 1..open + close_rel];
        let mut extent = [1u32; 3];
        for (i, part) in args.split(',').take(3).enumerate() {
            if let Ok(value) = part.trim().parse::<u32>() {
                extent[i] = value;
            }
        }

        let tail = &after[open + close_rel + 1..];
        if let Some(fn_pos) = tail.find("fn ") {
            let name: String = tail[fn_pos + 3..]
                .trim_start()
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if !name.is_empty() {
                out.insert(name, extent);
            }
        }
        rest = tail;
    }
    out
}
