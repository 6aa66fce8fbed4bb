//! 2D device textures, single and double-buffered.

use bytemuck::Pod;

use super::buffer::next_allocation_id;
use super::{GpuContext, GpuError};

/// Shape and sampling configuration of a 2D texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub filter: wgpu::FilterMode,
    pub wrap: wgpu::AddressMode,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            format: wgpu::TextureFormat::Rgba32Float,
            filter: wgpu::FilterMode::Linear,
            wrap: wgpu::AddressMode::ClampToEdge,
        }
    }
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            ..Default::default()
        }
    }

    fn bytes_per_texel(&self) -> u32 {
        // All formats used here are single-block color formats.
        self.format
            .block_copy_size(None)
            .expect("texture format without a defined copy size")
    }
}

struct TextureAlloc {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    desc: TextureDesc,
    id: u64,
}

/// A single 2D texture usable as a sampled input and a storage output.
///
/// Same lifecycle as [`super::GpuBuffer`]: uninitialized until `init`,
/// reinitialized as a whole on shape change, released on `dispose`.
pub struct GpuTexture {
    inner: Option<TextureAlloc>,
}

impl Default for GpuTexture {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuTexture {
    /// Create an uninitialized texture.
    pub fn new() -> Self {
        Self { inner: None }
    }

    /// Allocate a device texture for `desc`, releasing any previous
    /// allocation first.
    pub fn init(&mut self, ctx: &GpuContext, desc: TextureDesc) -> Result<(), GpuError> {
        self.dispose();
        let limit = ctx.device.limits().max_texture_dimension_2d;
        let largest = desc.width.max(desc.height);
        if largest > limit {
            return Err(GpuError::Allocation {
                kind: "texture",
                requested: largest as u64,
                limit: limit as u64,
            });
        }

        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Field Texture"),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = ctx.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Field Sampler"),
            address_mode_u: desc.wrap,
            address_mode_v: desc.wrap,
            address_mode_w: desc.wrap,
            mag_filter: desc.filter,
            min_filter: desc.filter,
            ..Default::default()
        });

        self.inner = Some(TextureAlloc {
            texture,
            view,
            sampler,
            desc,
            id: next_allocation_id(),
        });
        log::debug!(
            "allocated {}x{} texture ({:?})",
            desc.width,
            desc.height,
            desc.format
        );
        Ok(())
    }

    /// Release the device allocation. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        self.inner = None;
    }

    /// Reinitialize only if uninitialized or `desc` differs from the
    /// current shape. Resizing discards contents.
    pub fn check_size_changed(&mut self, ctx: &GpuContext, desc: TextureDesc) -> Result<(), GpuError> {
        match &self.inner {
            Some(alloc) if alloc.desc == desc => Ok(()),
            _ => self.init(ctx, desc),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.is_some()
    }

    /// Shape of the current allocation, if any.
    pub fn desc(&self) -> Option<TextureDesc> {
        self.inner.as_ref().map(|a| a.desc)
    }

    /// Identity of the current allocation, if any.
    pub fn allocation_id(&self) -> Option<u64> {
        self.inner.as_ref().map(|a| a.id)
    }

    fn alloc(&self) -> Result<&TextureAlloc, GpuError> {
        self.inner.as_ref().ok_or(GpuError::Uninitialized {
            what: "GPU texture",
        })
    }

    /// Underlying device texture handle.
    pub fn raw(&self) -> Result<&wgpu::Texture, GpuError> {
        Ok(&self.alloc()?.texture)
    }

    /// Full-texture view for binding.
    pub fn view(&self) -> Result<&wgpu::TextureView, GpuError> {
        Ok(&self.alloc()?.view)
    }

    /// Sampler configured with the texture's filter and wrap modes.
    pub fn sampler(&self) -> Result<&wgpu::Sampler, GpuError> {
        Ok(&self.alloc()?.sampler)
    }

    fn check_full_image<T>(&self, len: usize) -> Result<&TextureAlloc, GpuError> {
        let alloc = self.alloc()?;
        let image_bytes = alloc.desc.width as usize
            * alloc.desc.height as usize
            * alloc.desc.bytes_per_texel() as usize;
        let capacity = image_bytes / std::mem::size_of::<T>();
        if len != capacity {
            return Err(GpuError::Range {
                offset: 0,
                len,
                capacity,
            });
        }
        Ok(alloc)
    }

    /// Upload a full image worth of texels. `texels` must cover the image
    /// exactly; a mismatched length is rejected without partial transfer.
    pub fn set_data<T: Pod>(&self, ctx: &GpuContext, texels: &[T]) -> Result<(), GpuError> {
        let alloc = self.check_full_image::<T>(texels.len())?;
        let desc = alloc.desc;
        ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &alloc.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(texels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(desc.width * desc.bytes_per_texel()),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    /// Download the full image into `out`, handling the device's
    /// row-alignment requirement internally. Blocks until the transfer
    /// completes.
    pub fn get_data<T: Pod>(&self, ctx: &GpuContext, out: &mut [T]) -> Result<(), GpuError> {
        let alloc = self.check_full_image::<T>(out.len())?;
        let desc = alloc.desc;

        let row_bytes = desc.width * desc.bytes_per_texel();
        let padded_row_bytes =
            row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let staging_bytes = padded_row_bytes as u64 * desc.height as u64;

        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Texture Readback Staging"),
            size: staging_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Texture Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &alloc.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(desc.height),
                },
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        ctx.device.poll(wgpu::PollType::wait_indefinitely()).ok();
        rx.recv().map_err(|_| GpuError::Dispatch(
            "device dropped readback completion channel".to_string(),
        ))??;

        {
            let data = slice.get_mapped_range();
            let out_bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
            for row in 0..desc.height as usize {
                let src_start = row * padded_row_bytes as usize;
                let dst_start = row * row_bytes as usize;
                out_bytes[dst_start..dst_start + row_bytes as usize]
                    .copy_from_slice(&data[src_start..src_start + row_bytes as usize]);
            }
        }
        staging.unmap();
        Ok(())
    }
}

/// A read/write pair of textures of identical shape with O(1) role swap.
pub struct GpuDoubleTexture {
    read: GpuTexture,
    write: GpuTexture,
}

impl Default for GpuDoubleTexture {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDoubleTexture {
    pub fn new() -> Self {
        Self {
            read: GpuTexture::new(),
            write: GpuTexture::new(),
        }
    }

    /// Allocate both halves to `desc`.
    pub fn init(&mut self, ctx: &GpuContext, desc: TextureDesc) -> Result<(), GpuError> {
        self.read.init(ctx, desc)?;
        self.write.init(ctx, desc)
    }

    /// Release both halves. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        self.read.dispose();
        self.write.dispose();
    }

    /// Reinitialize both halves together when the shape changes.
    pub fn check_size_changed(&mut self, ctx: &GpuContext, desc: TextureDesc) -> Result<(), GpuError> {
        if self.read.desc() != Some(desc) {
            self.init(ctx, desc)?;
        }
        Ok(())
    }

    /// Exchange the read and write roles. Must not be called while a
    /// dispatch referencing either half is pending.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.read, &mut self.write);
    }

    /// The half current dispatches should read from.
    pub fn read(&self) -> &GpuTexture {
        &self.read
    }

    /// The half current dispatches should write to.
    pub fn write(&self) -> &GpuTexture {
        &self.write
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context() -> Option<GpuContext> {
        match pollster::block_on(GpuContext::new()) {
            Ok(ctx) => Some(ctx),
            Err(GpuError::NoAdapter) => {
                eprintln!("Skipping GPU test: no adapter available");
                None
            }
            Err(e) => panic!("Failed to create GPU context: {e:?}"),
        }
    }

    #[test]
    fn upload_download_roundtrip_with_row_padding() {
        let Some(ctx) = test_context() else { return };
        let mut tex = GpuTexture::new();
        // 4-texel rows of r32float are 16 bytes, well under the 256-byte
        // copy alignment, so this exercises the padded readback path.
        tex.init(&ctx, TextureDesc::new(4, 4, wgpu::TextureFormat::R32Float))
            .unwrap();

        let texels: Vec<f32> = (0..16).map(|i| i as f32).collect();
        tex.set_data(&ctx, &texels).unwrap();

        let mut out = vec![0.0f32; 16];
        tex.get_data(&ctx, &mut out).unwrap();
        assert_eq!(out, texels);
    }

    #[test]
    fn partial_image_upload_is_rejected() {
        let Some(ctx) = test_context() else { return };
        let mut tex = GpuTexture::new();
        tex.init(&ctx, TextureDesc::new(4, 4, wgpu::TextureFormat::R32Float))
            .unwrap();

        let short = vec![0.0f32; 15];
        assert!(matches!(
            tex.set_data(&ctx, &short),
            Err(GpuError::Range {
                offset: 0,
                len: 15,
                capacity: 16
            })
        ));
    }

    #[test]
    fn size_check_is_idempotent() {
        let Some(ctx) = test_context() else { return };
        let desc = TextureDesc::new(8, 8, wgpu::TextureFormat::R32Float);
        let mut tex = GpuTexture::new();
        tex.check_size_changed(&ctx, desc).unwrap();
        let id = tex.allocation_id().unwrap();

        tex.check_size_changed(&ctx, desc).unwrap();
        assert_eq!(tex.allocation_id(), Some(id));

        tex.check_size_changed(&ctx, TextureDesc::new(16, 8, wgpu::TextureFormat::R32Float))
            .unwrap();
        assert_ne!(tex.allocation_id(), Some(id));
    }

    #[test]
    fn double_texture_swap_exchanges_and_restores_roles() {
        let Some(ctx) = test_context() else { return };
        let mut double = GpuDoubleTexture::new();
        double
            .init(&ctx, TextureDesc::new(4, 4, wgpu::TextureFormat::R32Float))
            .unwrap();

        let read_id = double.read().allocation_id().unwrap();
        let write_id = double.write().allocation_id().unwrap();
        assert_ne!(read_id, write_id);

        double.swap();
        assert_eq!(double.read().allocation_id(), Some(write_id));
        double.swap();
        assert_eq!(double.read().allocation_id(), Some(read_id));
        assert_eq!(double.write().allocation_id(), Some(write_id));
    }

    #[test]
    fn oversized_texture_is_rejected() {
        let Some(ctx) = test_context() else { return };
        let limit = ctx.device().limits().max_texture_dimension_2d;
        let mut tex = GpuTexture::new();
        assert!(matches!(
            tex.init(&ctx, TextureDesc::new(limit + 1, 1, wgpu::TextureFormat::R32Float)),
            Err(GpuError::Allocation { kind: "texture", .. })
        ));
    }
}
