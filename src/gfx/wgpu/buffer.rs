//! wgpu 索引缓冲区
//!
//! `Queue::write_buffer` 要求偏移和长度按 4 字节对齐，
//! 因此每个缓冲区保留一份 CPU 副本，写入时上传覆盖该范围的对齐区间。

use tracing::debug;
use wgpu;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::IndexBufferBackend;
use crate::gfx::types::GpuHandle;

use super::backend::WgpuBackend;

const ALIGNMENT: usize = wgpu::COPY_BUFFER_ALIGNMENT as usize;

fn align_up(value: usize) -> usize {
    (value + ALIGNMENT - 1) / ALIGNMENT * ALIGNMENT
}

pub(super) struct WgpuBuffer {
    buffer: wgpu::Buffer,
    /// 与 GPU 内容一致的副本，长度已对齐
    contents: Vec<u8>,
    /// 调用方请求的大小
    size: usize,
}

impl IndexBufferBackend for WgpuBackend {
    fn create_index_buffer(&self, size: usize, dynamic: bool) -> Result<GpuHandle> {
        let gpu = self.device()?;
        let aligned = align_up(size.max(1));

        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(if dynamic { "Dynamic Index Buffer" } else { "Index Buffer" }),
            size: aligned as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let handle = self.allocate_handle();
        self.resources.borrow_mut().buffers.insert(
            handle,
            WgpuBuffer {
                buffer,
                contents: vec![0; aligned],
                size,
            },
        );
        debug!(%handle, size, dynamic, "wgpu index buffer created");
        Ok(handle)
    }

    fn write_index_buffer(
        &self,
        handle: GpuHandle,
        offset: usize,
        data: &[u8],
        _discard: bool,
    ) -> Result<()> {
        let gpu = self.device()?;
        let mut resources = self.resources.borrow_mut();
        let buffer = resources
            .buffers
            .get_mut(&handle)
            .ok_or_else(|| GraphicsError::NotCreated(format!("index buffer {}", handle)))?;

        let end = offset + data.len();
        if end > buffer.size {
            return Err(GraphicsError::InvalidRange(format!(
                "write {}..{} exceeds buffer size {}",
                offset, end, buffer.size
            ))
            .into());
        }
        if data.is_empty() {
            return Ok(());
        }

        buffer.contents[offset..end].copy_from_slice(data);

        let start = offset / ALIGNMENT * ALIGNMENT;
        let stop = align_up(end).min(buffer.contents.len());
        gpu.queue.write_buffer(
            &buffer.buffer,
            start as wgpu::BufferAddress,
            &buffer.contents[start..stop],
        );
        Ok(())
    }

    fn destroy_index_buffer(&self, handle: GpuHandle) {
        if let Some(buffer) = self.resources.borrow_mut().buffers.remove(&handle) {
            buffer.buffer.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(1), 4);
        assert_eq!(align_up(4), 4);
        assert_eq!(align_up(6), 8);
    }
}
