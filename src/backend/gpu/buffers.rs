//! Buffer upload and host readback helpers.

use std::sync::Arc;

use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use crate::util::{Error, Result};

use super::device::GpuDevice;

/// Device-local storage usage for everything the kernel or a copy reads.
pub const STORAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Round up to the 4-byte copy alignment.
#[inline]
pub fn align4(n: u64) -> u64 {
    (n + wgpu::COPY_BUFFER_ALIGNMENT - 1) & !(wgpu::COPY_BUFFER_ALIGNMENT - 1)
}

/// Rows of `width` RGBA8 texels padded for texture-to-buffer copies.
#[inline]
pub fn padded_row_bytes(width: u32) -> u32 {
    let a = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * 4).div_ceil(a) * a
}

/// Buffer initialized with `bytes` (padded to 4 bytes, never empty).
pub fn upload(gpu: &GpuDevice, label: &str, bytes: &[u8], usage: wgpu::BufferUsages) -> wgpu::Buffer {
    let padded_len = align4(bytes.len().max(4) as u64) as usize;
    if padded_len == bytes.len() {
        return gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytes,
            usage,
        });
    }
    let mut padded = vec![0u8; padded_len];
    padded[..bytes.len()].copy_from_slice(bytes);
    gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: &padded,
        usage,
    })
}

/// Uninitialized buffer of at least `size` bytes.
pub fn allocate(gpu: &GpuDevice, label: &str, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
    gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: align4(size.max(4)),
        usage,
        mapped_at_creation: false,
    })
}

/// Map `buffer` (which must be `MAP_READ`) and copy out `len` bytes.
pub fn map_read(gpu: &GpuDevice, buffer: &wgpu::Buffer, len: u64) -> Result<Vec<u8>> {
    let slice = buffer.slice(..);
    let status: Arc<Mutex<Option<std::result::Result<(), wgpu::BufferAsyncError>>>> =
        Arc::new(Mutex::new(None));
    let sink = Arc::clone(&status);
    slice.map_async(wgpu::MapMode::Read, move |r| {
        *sink.lock() = Some(r);
    });
    gpu.wait()?;

    match status.lock().take() {
        Some(Ok(())) => {}
        Some(Err(e)) => return Err(Error::Readback(e.to_string())),
        None => return Err(Error::Readback("map callback never fired".into())),
    }

    let out = {
        let data = slice.get_mapped_range();
        let end = (len as usize).min(data.len());
        data[..end].to_vec()
    };
    buffer.unmap();
    Ok(out)
}

/// Copy `len` bytes of a device buffer back to the host.
pub fn read_back(gpu: &GpuDevice, src: &wgpu::Buffer, len: u64) -> Result<Vec<u8>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let size = align4(len);
    let staging = gpu.scoped("readback staging", || {
        Ok(allocate(
            gpu,
            "rt_readback",
            size,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        ))
    })?;

    let mut encoder = gpu.encoder("rt_readback");
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    gpu.submit_and_wait(encoder)?;
    map_read(gpu, &staging, len)
}
