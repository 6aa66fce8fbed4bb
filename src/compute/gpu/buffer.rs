//! Structured device buffers, single and double-buffered.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::Pod;

use super::{GpuContext, GpuError};

static NEXT_ALLOCATION_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonic id minted per device allocation. Lets swap and reinit
/// behavior be observed without touching wgpu internals.
pub(crate) fn next_allocation_id() -> u64 {
    NEXT_ALLOCATION_ID.fetch_add(1, Ordering::Relaxed)
}

struct BufferAlloc {
    buffer: wgpu::Buffer,
    len: usize,
    id: u64,
}

/// A single structured storage buffer of `len` elements of `T`.
///
/// Created uninitialized; `init` allocates, and any shape-changing
/// request releases the old allocation before creating the new one, so
/// two allocations never coexist for one logical buffer.
pub struct GpuBuffer<T> {
    inner: Option<BufferAlloc>,
    _marker: PhantomData<T>,
}

impl<T> Default for GpuBuffer<T> {
    fn default() -> Self {
        Self {
            inner: None,
            _marker: PhantomData,
        }
    }
}

impl<T: Pod> GpuBuffer<T> {
    /// Create an uninitialized buffer.
    pub fn new() -> Self {
        Self {
            inner: None,
            _marker: PhantomData,
        }
    }

    /// Allocate device memory for `len` elements, releasing any previous
    /// allocation first.
    pub fn init(&mut self, ctx: &GpuContext, len: usize) -> Result<(), GpuError> {
        self.dispose();
        let bytes = (len * std::mem::size_of::<T>()) as u64;
        let limit = ctx.device.limits().max_buffer_size;
        if bytes > limit {
            return Err(GpuError::Allocation {
                kind: "buffer",
                requested: bytes,
                limit,
            });
        }
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Field Buffer"),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        self.inner = Some(BufferAlloc {
            buffer,
            len,
            id: next_allocation_id(),
        });
        log::debug!("allocated buffer of {len} elements ({bytes} bytes)");
        Ok(())
    }

    /// Release the device allocation. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        self.inner = None;
    }

    /// Reinitialize only if uninitialized or `len` differs from the
    /// current element count.
    pub fn check_size_changed(&mut self, ctx: &GpuContext, len: usize) -> Result<(), GpuError> {
        match &self.inner {
            Some(alloc) if alloc.len == len => Ok(()),
            _ => self.init(ctx, len),
        }
    }

    /// Element count, zero when uninitialized.
    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |a| a.len)
    }

    /// Whether the buffer currently holds a device allocation.
    pub fn is_initialized(&self) -> bool {
        self.inner.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identity of the current allocation, if any.
    pub fn allocation_id(&self) -> Option<u64> {
        self.inner.as_ref().map(|a| a.id)
    }

    /// Underlying device buffer handle.
    pub fn raw(&self) -> Result<&wgpu::Buffer, GpuError> {
        self.inner
            .as_ref()
            .map(|a| &a.buffer)
            .ok_or(GpuError::Uninitialized { what: "GPU buffer" })
    }

    fn alloc(&self) -> Result<&BufferAlloc, GpuError> {
        self.inner
            .as_ref()
            .ok_or(GpuError::Uninitialized { what: "GPU buffer" })
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), GpuError> {
        let capacity = self.len();
        let end = offset.checked_add(len);
        match end {
            Some(end) if end <= capacity => Ok(()),
            _ => Err(GpuError::Range {
                offset,
                len,
                capacity,
            }),
        }
    }

    /// Copy `data` into the buffer starting at element `offset`.
    /// Out-of-range transfers are rejected whole, never clamped.
    pub fn set_data(&self, ctx: &GpuContext, data: &[T], offset: usize) -> Result<(), GpuError> {
        let alloc = self.alloc()?;
        self.check_range(offset, data.len())?;
        ctx.queue.write_buffer(
            &alloc.buffer,
            (offset * std::mem::size_of::<T>()) as u64,
            bytemuck::cast_slice(data),
        );
        Ok(())
    }

    /// Copy `out.len()` elements starting at element `offset` back to the
    /// host. Blocks until the device finishes the transfer.
    pub fn get_data(&self, ctx: &GpuContext, out: &mut [T], offset: usize) -> Result<(), GpuError> {
        let alloc = self.alloc()?;
        self.check_range(offset, out.len())?;
        if out.is_empty() {
            return Ok(());
        }

        let bytes = (out.len() * std::mem::size_of::<T>()) as u64;
        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size: bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Buffer Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(
            &alloc.buffer,
            (offset * std::mem::size_of::<T>()) as u64,
            &staging,
            0,
            bytes,
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
            out.copy_from_slice(bytemuck::cast_slice(&data));
        }
        staging.unmap();
        Ok(())
    }
}

/// A read/write pair of structured buffers of identical shape.
///
/// `swap` relabels the two halves in O(1) and never copies device data.
pub struct GpuDoubleBuffer<T> {
    read: GpuBuffer<T>,
    write: GpuBuffer<T>,
}

impl<T> Default for GpuDoubleBuffer<T> {
    fn default() -> Self {
        Self {
            read: GpuBuffer::default(),
            write: GpuBuffer::default(),
        }
    }
}

impl<T: Pod> GpuDoubleBuffer<T> {
    pub fn new() -> Self {
        Self {
            read: GpuBuffer::new(),
            write: GpuBuffer::new(),
        }
    }

    /// Allocate both halves to `len` elements.
    pub fn init(&mut self, ctx: &GpuContext, len: usize) -> Result<(), GpuError> {
        self.read.init(ctx, len)?;
        self.write.init(ctx, len)
    }

    /// Release both halves. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        self.read.dispose();
        self.write.dispose();
    }

    /// Reinitialize both halves together when the shape changes.
    pub fn check_size_changed(&mut self, ctx: &GpuContext, len: usize) -> Result<(), GpuError> {
        if !self.read.is_initialized() || self.read.len() != len {
            self.init(ctx, len)?;
        }
        Ok(())
    }

    /// Exchange the read and write roles. Must not be called while a
    /// dispatch referencing either half is pending.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.read, &mut self.write);
    }

    pub fn len(&self) -> usize {
        self.read.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_empty()
    }

    /// The half current dispatches should read from.
    pub fn read(&self) -> &GpuBuffer<T> {
        &self.read
    }

    /// The half current dispatches should write to.
    pub fn write(&self) -> &GpuBuffer<T> {
        &self.write
    }

    /// Upload into the read half (the half the next dispatch observes).
    pub fn set_data(&self, ctx: &GpuContext, data: &[T], offset: usize) -> Result<(), GpuError> {
        self.read.set_data(ctx, data, offset)
    }

    /// Download from the read half.
    pub fn get_read_data(
        &self,
        ctx: &GpuContext,
        out: &mut [T],
        offset: usize,
    ) -> Result<(), GpuError> {
        self.read.get_data(ctx, out, offset)
    }

    /// Download from the write half.
    pub fn get_write_data(
        &self,
        ctx: &GpuContext,
        out: &mut [T],
        offset: usize,
    ) -> Result<(), GpuError> {
        self.write.get_data(ctx, out, offset)
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
    fn set_get_roundtrip_with_offset() {
        let Some(ctx) = test_context() else { return };
        let mut buffer = GpuBuffer::<f32>::new();
        buffer.init(&ctx, 16).unwrap();

        let data = [1.0f32, 2.0, 3.0, 4.0];
        buffer.set_data(&ctx, &data, 4).unwrap();

        let mut out = [0.0f32; 4];
        buffer.get_data(&ctx, &mut out, 4).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn out_of_range_transfer_is_rejected() {
        let Some(ctx) = test_context() else { return };
        let mut buffer = GpuBuffer::<f32>::new();
        buffer.init(&ctx, 8).unwrap();

        let data = [0.0f32; 4];
        assert!(matches!(
            buffer.set_data(&ctx, &data, 6),
            Err(GpuError::Range {
                offset: 6,
                len: 4,
                capacity: 8
            })
        ));

        let mut out = [0.0f32; 16];
        assert!(matches!(
            buffer.get_data(&ctx, &mut out, 0),
            Err(GpuError::Range { .. })
        ));
    }

    #[test]
    fn uninitialized_access_is_an_error() {
        let Some(ctx) = test_context() else { return };
        let buffer = GpuBuffer::<f32>::new();
        assert!(matches!(
            buffer.set_data(&ctx, &[0.0], 0),
            Err(GpuError::Uninitialized { .. })
        ));
    }

    #[test]
    fn size_check_is_idempotent() {
        let Some(ctx) = test_context() else { return };
        let mut buffer = GpuBuffer::<f32>::new();
        buffer.check_size_changed(&ctx, 32).unwrap();
        let id = buffer.allocation_id().unwrap();

        buffer.check_size_changed(&ctx, 32).unwrap();
        buffer.check_size_changed(&ctx, 32).unwrap();
        assert_eq!(buffer.allocation_id(), Some(id), "same shape reallocated");

        buffer.check_size_changed(&ctx, 64).unwrap();
        assert_ne!(buffer.allocation_id(), Some(id), "resize did not reallocate");
        assert_eq!(buffer.len(), 64);
    }

    #[test]
    fn dispose_is_idempotent() {
        let Some(ctx) = test_context() else { return };
        let mut buffer = GpuBuffer::<f32>::new();
        buffer.init(&ctx, 8).unwrap();
        buffer.dispose();
        buffer.dispose();
        assert!(!buffer.is_initialized());
    }

    #[test]
    fn double_buffer_swap_exchanges_and_restores_roles() {
        let Some(ctx) = test_context() else { return };
        let mut double = GpuDoubleBuffer::<f32>::new();
        double.init(&ctx, 8).unwrap();

        let read_id = double.read().allocation_id().unwrap();
        let write_id = double.write().allocation_id().unwrap();
        assert_ne!(read_id, write_id, "read and write halves alias");

        double.swap();
        assert_eq!(double.read().allocation_id(), Some(write_id));
        assert_eq!(double.write().allocation_id(), Some(read_id));

        double.swap();
        assert_eq!(double.read().allocation_id(), Some(read_id));
        assert_eq!(double.write().allocation_id(), Some(write_id));
    }

    #[test]
    fn allocation_limit_is_reported() {
        let Some(ctx) = test_context() else { return };
        let limit = ctx.device().limits().max_buffer_size;
        let mut buffer = GpuBuffer::<f32>::new();
        let too_many = (limit / 4 + 1) as usize;
        assert!(matches!(
            buffer.init(&ctx, too_many),
            Err(GpuError::Allocation { kind: "buffer", .. })
        ));
        assert!(!buffer.is_initialized(), "failed init left a partial resource");
    }
}
