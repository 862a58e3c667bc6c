//! 索引缓冲区
//!
//! 16 位或 32 位索引的 GPU 缓冲区，可选 CPU 影子数据，
//! 支持动态/静态用途以及带回退的锁定写入。

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::error::{DistGpuError, GraphicsError, Result};
use crate::gfx::GpuHandle;
use crate::{engine_error, engine_warn};

use super::context::GraphicsContext;
use super::gpu_object::{DeviceObject, DeviceObjectLifecycle, ObjectId};
use super::shadow::{BufferLock, LockSource, LockState, ShadowBuffer};

/// 一段索引引用到的顶点范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsedVertexRange {
    pub min_vertex: u32,
    pub vertex_count: u32,
}

/// 索引缓冲区
pub struct IndexBuffer {
    context: Rc<GraphicsContext>,
    lifecycle: DeviceObjectLifecycle,
    index_count: usize,
    /// 0 表示尚未设置大小
    index_size: usize,
    dynamic: bool,
    shadowed: bool,
    shadow: Option<ShadowBuffer>,
    lock: Option<BufferLock>,
}

impl IndexBuffer {
    /// 创建空的索引缓冲区并注册到上下文
    ///
    /// 无头模式强制使用影子数据。
    pub fn new(context: &Rc<GraphicsContext>) -> Rc<RefCell<Self>> {
        let buffer = Rc::new(RefCell::new(Self {
            lifecycle: context.new_lifecycle(),
            context: context.clone(),
            index_count: 0,
            index_size: 0,
            dynamic: false,
            shadowed: context.is_headless(),
            shadow: None,
            lock: None,
        }));
        context.register_object(&buffer);
        buffer
    }

    pub fn index_count(&self) -> usize {
        self.index_count
    }

    /// 每个索引的字节数（2 或 4，未设置大小时为 0）
    pub fn index_size(&self) -> usize {
        self.index_size
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn is_shadowed(&self) -> bool {
        self.shadowed
    }

    pub fn shadow_data(&self) -> Option<&[u8]> {
        self.shadow.as_ref().map(ShadowBuffer::as_slice)
    }

    pub fn handle(&self) -> Option<GpuHandle> {
        self.lifecycle.handle()
    }

    pub fn lock_state(&self) -> LockState {
        self.lock.as_ref().map_or(LockState::None, BufferLock::state)
    }

    pub fn is_data_lost(&self) -> bool {
        self.lifecycle.is_data_lost()
    }

    pub fn clear_data_lost(&mut self) {
        self.lifecycle.clear_data_lost();
    }

    pub fn is_data_pending(&self) -> bool {
        self.lifecycle.is_data_pending()
    }

    fn byte_size(&self) -> usize {
        self.index_count * self.index_size
    }

    /// `[start, start + count)` 是否落在缓冲区内，加法溢出视为越界
    fn contains_range(&self, start: usize, count: usize) -> bool {
        start
            .checked_add(count)
            .map_or(false, |end| end <= self.index_count)
    }

    fn range_error(&self, start: usize, count: usize) -> DistGpuError {
        GraphicsError::InvalidRange(format!(
            "{} indices from {} exceed index count {}",
            count, start, self.index_count
        ))
        .into()
    }

    /// 开关影子数据
    ///
    /// 无头模式下不能关闭。关闭时释放影子缓冲区。
    pub fn set_shadowed(&mut self, enable: bool) {
        let enable = enable || self.context.is_headless();
        if enable == self.shadowed {
            return;
        }

        self.shadow = if enable && self.byte_size() > 0 {
            Some(ShadowBuffer::new(self.byte_size()))
        } else {
            None
        };
        self.shadowed = enable;
    }

    /// 设置大小并重建 GPU 缓冲区
    ///
    /// 会先解除未完成的锁定；数量为 0 时只释放 GPU 缓冲区。
    pub fn set_size(&mut self, index_count: usize, use_32bit: bool, dynamic: bool) -> Result<()> {
        self.sync_device();
        self.unlock();

        self.index_count = index_count;
        self.index_size = if use_32bit { 4 } else { 2 };
        self.dynamic = dynamic;

        self.shadow = if self.shadowed && self.byte_size() > 0 {
            Some(ShadowBuffer::new(self.byte_size()))
        } else {
            None
        };

        self.create()
    }

    /// 写入全部索引
    pub fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.sync_device();
        if self.index_size == 0 {
            engine_error!("Index size not defined, can not set index buffer data");
            return Err(GraphicsError::NotCreated("index size not defined".to_string()).into());
        }

        let size = self.byte_size();
        if data.len() < size {
            engine_error!(required = size, provided = data.len(), "Index buffer data too short");
            return Err(GraphicsError::InvalidRange(format!(
                "index data holds {} bytes, buffer needs {}",
                data.len(),
                size
            ))
            .into());
        }

        if let Some(shadow) = self.shadow.as_mut() {
            shadow.write(0, &data[..size]);
        }
        self.write_gpu(0, &data[..size], true)
    }

    /// 写入 `[start, start + count)` 范围的索引
    ///
    /// `discard` 允许后端丢弃范围外的旧内容。覆盖整个缓冲区时等同于 `set_data`。
    pub fn set_data_range(&mut self, data: &[u8], start: usize, count: usize, discard: bool) -> Result<()> {
        self.sync_device();
        if self.index_size == 0 {
            engine_error!("Index size not defined, can not set index buffer data");
            return Err(GraphicsError::NotCreated("index size not defined".to_string()).into());
        }
        if !self.contains_range(start, count) {
            engine_error!(start, count, index_count = self.index_count, "Illegal range for setting new index buffer data");
            return Err(self.range_error(start, count));
        }
        if count == 0 {
            return Ok(());
        }
        if start == 0 && count == self.index_count {
            return self.set_data(data);
        }

        let offset = start * self.index_size;
        let size = count * self.index_size;
        if data.len() < size {
            engine_error!(required = size, provided = data.len(), "Index buffer data too short");
            return Err(GraphicsError::InvalidRange(format!(
                "index data holds {} bytes, range needs {}",
                data.len(),
                size
            ))
            .into());
        }

        if let Some(shadow) = self.shadow.as_mut() {
            shadow.write(offset, &data[..size]);
        }
        self.write_gpu(offset, &data[..size], discard)
    }

    /// 写入 GPU；设备丢失时推迟
    fn write_gpu(&mut self, offset: usize, data: &[u8], discard: bool) -> Result<()> {
        if self.context.is_headless() {
            return Ok(());
        }
        if self.context.is_device_lost() {
            engine_warn!("Index buffer data assignment while device is lost");
            self.lifecycle.set_data_pending(true);
            return Ok(());
        }

        match self.lifecycle.handle() {
            Some(handle) => self
                .context
                .backend()
                .write_index_buffer(handle, offset, data, discard)
                .map_err(|e| {
                    engine_error!("Failed to update index buffer: {}", e);
                    e
                }),
            None => Ok(()),
        }
    }

    /// 锁定 `[start, start + count)` 供写入
    ///
    /// 返回的切片依次来自硬件映射、影子数据或上下文的临时缓冲区。
    /// 数量为 0 时返回空切片且不进入锁定状态。
    pub fn lock(&mut self, start: usize, count: usize, discard: bool) -> Result<&mut [u8]> {
        self.sync_device();
        if self.lock.is_some() {
            engine_error!("Index buffer already locked");
            return Err(GraphicsError::AlreadyLocked("index buffer".to_string()).into());
        }
        if self.index_size == 0 {
            engine_error!("Index size not defined, can not lock index buffer");
            return Err(GraphicsError::NotCreated("index size not defined".to_string()).into());
        }
        if !self.contains_range(start, count) {
            engine_error!(start, count, index_count = self.index_count, "Illegal range for locking index buffer");
            return Err(self.range_error(start, count));
        }
        if count == 0 {
            return Ok(&mut []);
        }

        let offset = start * self.index_size;
        let size = count * self.index_size;

        let mapped = match self.lifecycle.handle() {
            Some(handle)
                if self.dynamic
                    && self.context.backend().supports_buffer_mapping()
                    && !self.context.is_device_lost() =>
            {
                self.context.backend().map_index_buffer(handle, offset, size, discard)
            }
            _ => None,
        };

        let source = match mapped {
            Some(bytes) => LockSource::Hardware(bytes),
            None if self.shadow.is_some() => LockSource::Shadow,
            None => LockSource::Scratch(self.context.reserve_scratch_buffer(size)),
        };

        let lock = self.lock.insert(BufferLock {
            start,
            count,
            discard,
            source,
        });

        Ok(match &mut lock.source {
            LockSource::Hardware(bytes) | LockSource::Scratch(bytes) => bytes.as_mut_slice(),
            LockSource::Shadow => match self.shadow.as_mut() {
                Some(shadow) => shadow.range_mut(offset..offset + size),
                None => &mut [],
            },
        })
    }

    /// 解除锁定并提交数据，未锁定时无操作
    pub fn unlock(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };

        let offset = lock.start * self.index_size;
        match lock.source {
            LockSource::Hardware(bytes) => {
                if let Some(shadow) = self.shadow.as_mut() {
                    shadow.write(offset, &bytes);
                }
                let committed = match self.lifecycle.handle() {
                    Some(handle) if !self.context.is_device_lost() => {
                        self.context.backend().unmap_index_buffer(handle, offset, &bytes)
                    }
                    _ => {
                        self.lifecycle.set_data_pending(true);
                        Ok(())
                    }
                };
                if let Err(e) = committed {
                    engine_error!("Failed to unmap index buffer: {}", e);
                    self.lifecycle.set_data_lost(true);
                }
            }
            LockSource::Shadow => {
                let size = lock.count * self.index_size;
                let data = self
                    .shadow
                    .as_ref()
                    .map(|shadow| shadow.range(offset..offset + size).to_vec())
                    .unwrap_or_default();
                let flushed = self.set_data_range(&data, lock.start, lock.count, lock.discard);
                self.flag_failed_flush(flushed);
            }
            LockSource::Scratch(bytes) => {
                let flushed = self.set_data_range(&bytes, lock.start, lock.count, lock.discard);
                self.context.free_scratch_buffer(bytes);
                self.flag_failed_flush(flushed);
            }
        }
    }

    /// 锁定内容没能写入 GPU，GPU 上的数据已经过时
    fn flag_failed_flush(&mut self, flushed: Result<()>) {
        if flushed.is_err() {
            engine_warn!(id = %self.id(), "Index buffer unlock could not reach the GPU, contents are stale");
            self.lifecycle.set_data_lost(true);
        }
    }

    /// 扫描一段索引引用到的顶点范围，需要影子数据
    pub fn get_used_vertex_range(&self, start: usize, count: usize) -> Result<UsedVertexRange> {
        let Some(shadow) = self.shadow.as_ref() else {
            engine_error!("Used vertex range can only be queried from an index buffer with shadow data");
            return Err(GraphicsError::MissingShadowData("index buffer".to_string()).into());
        };
        if !self.contains_range(start, count) {
            engine_error!(start, count, index_count = self.index_count, "Illegal index range for querying used vertices");
            return Err(self.range_error(start, count));
        }
        if count == 0 {
            return Ok(UsedVertexRange {
                min_vertex: 0,
                vertex_count: 0,
            });
        }

        let bytes = shadow.range(start * self.index_size..(start + count) * self.index_size);
        let indices: Box<dyn Iterator<Item = u32>> = if self.index_size == 4 {
            Box::new(bytes.chunks_exact(4).map(bytemuck::pod_read_unaligned::<u32>))
        } else {
            Box::new(bytes.chunks_exact(2).map(|b| bytemuck::pod_read_unaligned::<u16>(b) as u32))
        };

        let (min, max) = indices.fold((u32::MAX, 0), |(min, max), index| (min.min(index), max.max(index)));
        Ok(UsedVertexRange {
            min_vertex: min,
            vertex_count: max - min + 1,
        })
    }

    /// 创建或释放 GPU 缓冲区
    fn create(&mut self) -> Result<()> {
        if self.index_count == 0 {
            self.release();
            return Ok(());
        }
        if self.context.is_headless() {
            return Ok(());
        }
        if self.context.is_device_lost() {
            engine_warn!("Index buffer creation while device is lost");
            return Ok(());
        }

        self.destroy_handle();
        match self
            .context
            .backend()
            .create_index_buffer(self.byte_size(), self.dynamic)
        {
            Ok(handle) => {
                self.lifecycle.attach(handle);
                Ok(())
            }
            Err(e) => {
                engine_error!(index_count = self.index_count, "Failed to create index buffer: {}", e);
                Err(e)
            }
        }
    }

    /// 把影子数据整体上传，没有影子数据时返回 false
    fn update_to_gpu(&mut self) -> bool {
        let Some(handle) = self.lifecycle.handle() else {
            return false;
        };
        let Some(shadow) = self.shadow.as_ref() else {
            return false;
        };
        self.context
            .backend()
            .write_index_buffer(handle, 0, shadow.as_slice(), true)
            .is_ok()
    }

    fn destroy_handle(&mut self) {
        if let Some(handle) = self.lifecycle.detach() {
            if !self.context.is_device_lost() {
                self.context.backend().destroy_index_buffer(handle);
            }
        }
    }

    pub fn id(&self) -> ObjectId {
        self.lifecycle.id()
    }
}

impl DeviceObject for IndexBuffer {
    fn lifecycle(&self) -> &DeviceObjectLifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut DeviceObjectLifecycle {
        &mut self.lifecycle
    }

    fn on_device_lost(&mut self) {
        self.lifecycle.mark_lost();
    }

    fn on_device_reset(&mut self) {
        if self.lifecycle.handle().is_none() {
            if self.create().is_ok() && self.index_count > 0 {
                let restored = self.update_to_gpu();
                self.lifecycle.set_data_lost(!restored);
            }
        } else if self.lifecycle.is_data_pending() {
            let restored = self.update_to_gpu();
            self.lifecycle.set_data_lost(!restored);
        }
        self.lifecycle.set_data_pending(false);
    }

    fn release(&mut self) {
        self.unlock();

        if self.context.is_headless() {
            return;
        }
        if self.context.index_buffer() == Some(self.id()) {
            self.context.set_index_buffer(None);
        }
        self.destroy_handle();
    }
}

impl Drop for IndexBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::{GraphicsCapabilities, IndexBufferBackend, SoftwareBackend, SoftwareBackendOptions};
    use crate::renderer::gpu_object::DeviceObjectState;

    fn context_with(options: SoftwareBackendOptions) -> (Rc<SoftwareBackend>, Rc<GraphicsContext>) {
        let backend = Rc::new(SoftwareBackend::new(options));
        let ctx = GraphicsContext::new(backend.clone(), GraphicsCapabilities::software());
        (backend, ctx)
    }

    fn context() -> (Rc<SoftwareBackend>, Rc<GraphicsContext>) {
        context_with(SoftwareBackendOptions::default())
    }

    fn u32_bytes(indices: &[u32]) -> Vec<u8> {
        bytemuck::cast_slice(indices).to_vec()
    }

    fn u16_bytes(indices: &[u16]) -> Vec<u8> {
        bytemuck::cast_slice(indices).to_vec()
    }

    #[test]
    fn test_used_vertex_range_32bit() {
        let (_, ctx) = context();
        let buffer = IndexBuffer::new(&ctx);
        let mut buffer = buffer.borrow_mut();
        buffer.set_shadowed(true);
        buffer.set_size(3, true, false).unwrap();
        buffer.set_data(&u32_bytes(&[5, 2, 9])).unwrap();

        let range = buffer.get_used_vertex_range(0, 3).unwrap();
        assert_eq!(range, UsedVertexRange { min_vertex: 2, vertex_count: 8 });
    }

    #[test]
    fn test_used_vertex_range_windows() {
        let (_, ctx) = context();
        let buffer = IndexBuffer::new(&ctx);
        let mut buffer = buffer.borrow_mut();
        buffer.set_shadowed(true);
        let indices = [7u16, 3, 3, 12, 8, 0];
        buffer.set_size(indices.len(), false, false).unwrap();
        buffer.set_data(&u16_bytes(&indices)).unwrap();

        for start in 0..indices.len() {
            for count in 1..=indices.len() - start {
                let window = &indices[start..start + count];
                let min = *window.iter().min().unwrap() as u32;
                let max = *window.iter().max().unwrap() as u32;
                let range = buffer.get_used_vertex_range(start, count).unwrap();
                assert_eq!(range.min_vertex, min);
                assert_eq!(range.vertex_count, max - min + 1);
            }
        }

        assert_eq!(
            buffer.get_used_vertex_range(2, 0).unwrap(),
            UsedVertexRange { min_vertex: 0, vertex_count: 0 }
        );
        assert!(buffer.get_used_vertex_range(4, 3).is_err());
    }

    #[test]
    fn test_used_vertex_range_requires_shadow() {
        let (_, ctx) = context();
        let buffer = IndexBuffer::new(&ctx);
        let mut buffer = buffer.borrow_mut();
        buffer.set_size(3, true, false).unwrap();
        buffer.set_data(&u32_bytes(&[1, 2, 3])).unwrap();

        assert!(buffer.shadow_data().is_none());
        assert!(buffer.get_used_vertex_range(0, 3).is_err());
    }

    #[test]
    fn test_set_data_updates_shadow_and_gpu() {
        let (backend, ctx) = context();
        let buffer = IndexBuffer::new(&ctx);
        let mut buffer = buffer.borrow_mut();
        buffer.set_shadowed(true);
        buffer.set_size(4, false, false).unwrap();

        let data = u16_bytes(&[0, 1, 2, 3]);
        buffer.set_data(&data).unwrap();
        assert_eq!(buffer.shadow_data().unwrap(), data.as_slice());

        let handle = buffer.handle().unwrap();
        assert_eq!(backend.index_buffer_contents(handle).unwrap(), data);

        assert!(buffer.set_data(&data[..6]).is_err());
    }

    #[test]
    fn test_set_shadowed_twice_equals_once() {
        let (_, ctx) = context();
        let buffer = IndexBuffer::new(&ctx);
        let mut buffer = buffer.borrow_mut();
        buffer.set_size(2, false, false).unwrap();

        buffer.set_shadowed(true);
        buffer.set_data(&u16_bytes(&[4, 5])).unwrap();
        buffer.set_shadowed(true);
        assert_eq!(buffer.shadow_data().unwrap(), u16_bytes(&[4, 5]).as_slice());

        buffer.set_shadowed(false);
        assert!(buffer.shadow_data().is_none());
    }

    #[test]
    fn test_headless_forces_shadow() {
        let backend = Rc::new(SoftwareBackend::default());
        let ctx = GraphicsContext::new(backend.clone(), GraphicsCapabilities::headless());
        let buffer = IndexBuffer::new(&ctx);
        let mut buffer = buffer.borrow_mut();
        assert!(buffer.is_shadowed());

        buffer.set_shadowed(false);
        assert!(buffer.is_shadowed());

        buffer.set_size(2, false, false).unwrap();
        buffer.set_data(&u16_bytes(&[1, 2])).unwrap();
        assert!(buffer.handle().is_none());
        assert_eq!(backend.object_count(), 0);
        assert_eq!(ctx.object_count(), 0);
    }

    #[test]
    fn test_set_data_range() {
        let (backend, ctx) = context();
        let buffer = IndexBuffer::new(&ctx);
        let mut buffer = buffer.borrow_mut();
        buffer.set_shadowed(true);
        buffer.set_size(4, false, false).unwrap();
        buffer.set_data(&u16_bytes(&[1, 1, 1, 1])).unwrap();

        buffer.set_data_range(&u16_bytes(&[8, 9]), 1, 2, false).unwrap();
        assert_eq!(buffer.shadow_data().unwrap(), u16_bytes(&[1, 8, 9, 1]).as_slice());
        let handle = buffer.handle().unwrap();
        assert_eq!(backend.index_buffer_contents(handle).unwrap(), u16_bytes(&[1, 8, 9, 1]));

        // 零数量直接成功
        buffer.set_data_range(&[], 4, 0, false).unwrap();
        assert!(buffer.set_data_range(&u16_bytes(&[1, 2]), 3, 2, false).is_err());
        assert!(buffer.set_data_range(&u16_bytes(&[1]), 0, 2, false).is_err());
    }

    #[test]
    fn test_lock_rejects_out_of_range_and_double_lock() {
        let (_, ctx) = context();
        let buffer = IndexBuffer::new(&ctx);
        let mut buffer = buffer.borrow_mut();
        assert!(buffer.lock(0, 0, false).is_err());

        buffer.set_size(4, false, false).unwrap();
        assert!(buffer.lock(4, 1, false).is_err());

        buffer.lock(0, 2, false).unwrap();
        assert!(buffer.lock(2, 1, false).is_err());
        buffer.unlock();
        assert_eq!(buffer.lock_state(), LockState::None);

        assert!(buffer.lock(4, 0, false).unwrap().is_empty());
        assert_eq!(buffer.lock_state(), LockState::None);
    }

    #[test]
    fn test_lock_uses_hardware_mapping_for_dynamic_buffers() {
        let (backend, ctx) = context();
        let buffer = IndexBuffer::new(&ctx);
        let mut buffer = buffer.borrow_mut();
        buffer.set_shadowed(true);
        buffer.set_size(4, false, true).unwrap();

        let slice = buffer.lock(1, 2, false).unwrap();
        slice.copy_from_slice(&u16_bytes(&[6, 7]));
        assert_eq!(buffer.lock_state(), LockState::Hardware);
        buffer.unlock();

        let handle = buffer.handle().unwrap();
        assert_eq!(backend.index_buffer_contents(handle).unwrap(), u16_bytes(&[0, 6, 7, 0]));
        assert_eq!(buffer.shadow_data().unwrap(), u16_bytes(&[0, 6, 7, 0]).as_slice());
    }

    #[test]
    fn test_lock_falls_back_to_shadow_then_scratch() {
        let (backend, ctx) = context_with(SoftwareBackendOptions { buffer_mapping: false });
        let buffer = IndexBuffer::new(&ctx);
        let mut buffer = buffer.borrow_mut();
        buffer.set_shadowed(true);
        buffer.set_size(2, true, true).unwrap();

        buffer.lock(0, 2, false).unwrap().copy_from_slice(&u32_bytes(&[10, 20]));
        assert_eq!(buffer.lock_state(), LockState::Shadow);
        buffer.unlock();
        let handle = buffer.handle().unwrap();
        assert_eq!(backend.index_buffer_contents(handle).unwrap(), u32_bytes(&[10, 20]));

        buffer.set_shadowed(false);
        buffer.lock(1, 1, false).unwrap().copy_from_slice(&u32_bytes(&[30]));
        assert_eq!(buffer.lock_state(), LockState::ScratchOnly);
        buffer.unlock();
        assert_eq!(backend.index_buffer_contents(handle).unwrap(), u32_bytes(&[10, 30]));
        assert_eq!(ctx.scratch_buffer_count(), 1);
    }

    #[test]
    fn test_shadowed_dynamic_buffer_survives_device_loss() {
        let (backend, ctx) = context();
        let buffer = IndexBuffer::new(&ctx);
        {
            let mut buffer = buffer.borrow_mut();
            buffer.set_shadowed(true);
            buffer.set_size(4, false, true).unwrap();
            buffer.set_data(&u16_bytes(&[3, 1, 4, 1])).unwrap();
        }

        ctx.lose_device();
        assert!(buffer.borrow().handle().is_none());

        // 丢失期间的写入只进入影子数据
        buffer.borrow_mut().set_data_range(&u16_bytes(&[5]), 3, 1, false).unwrap();
        assert!(buffer.borrow().is_data_pending());
        let shadow_at_loss = buffer.borrow().shadow_data().unwrap().to_vec();

        ctx.restore_device().unwrap();
        let buffer = buffer.borrow();
        let handle = buffer.handle().unwrap();
        assert_eq!(backend.index_buffer_contents(handle).unwrap(), shadow_at_loss);
        assert!(!buffer.is_data_lost());
        assert!(!buffer.is_data_pending());
    }

    #[test]
    fn test_unshadowed_buffer_reports_data_lost() {
        let (_, ctx) = context();
        let buffer = IndexBuffer::new(&ctx);
        buffer.borrow_mut().set_size(4, false, false).unwrap();

        ctx.lose_device();
        ctx.restore_device().unwrap();

        let mut buffer = buffer.borrow_mut();
        assert!(buffer.handle().is_some());
        assert!(buffer.is_data_lost());
        buffer.clear_data_lost();
        assert!(!buffer.is_data_lost());
    }

    #[test]
    fn test_release_unbinds_and_destroys() {
        let (backend, ctx) = context();
        let buffer = IndexBuffer::new(&ctx);
        buffer.borrow_mut().set_size(4, false, false).unwrap();
        ctx.set_index_buffer(Some(buffer.borrow().id()));
        assert_eq!(backend.object_count(), 1);

        drop(buffer);
        assert_eq!(ctx.index_buffer(), None);
        assert_eq!(backend.object_count(), 0);
        assert_eq!(ctx.object_count(), 0);
    }

    #[test]
    fn test_zero_size_releases_gpu_buffer() {
        let (backend, ctx) = context();
        let buffer = IndexBuffer::new(&ctx);
        let mut buffer = buffer.borrow_mut();
        buffer.set_size(4, false, false).unwrap();
        assert!(buffer.handle().is_some());

        buffer.set_size(0, false, false).unwrap();
        assert!(buffer.handle().is_none());
        assert_eq!(backend.object_count(), 0);
    }

    #[test]
    fn test_creation_failure_is_reported() {
        let (backend, ctx) = context();
        backend.set_creation_failure(true);
        let buffer = IndexBuffer::new(&ctx);
        assert!(buffer.borrow_mut().set_size(4, false, false).is_err());
        assert!(buffer.borrow().handle().is_none());
    }

    #[test]
    fn test_ranges_that_overflow_are_rejected() {
        let (_, ctx) = context();
        let buffer = IndexBuffer::new(&ctx);
        let mut buffer = buffer.borrow_mut();
        buffer.set_shadowed(true);
        buffer.set_size(4, false, false).unwrap();

        assert!(buffer.lock(usize::MAX, 1, false).is_err());
        assert_eq!(buffer.lock_state(), LockState::None);
        assert!(buffer.set_data_range(&u16_bytes(&[1]), 1, usize::MAX, false).is_err());
        assert!(buffer.get_used_vertex_range(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_failed_unlock_flush_marks_data_lost() {
        let (backend, ctx) = context_with(SoftwareBackendOptions { buffer_mapping: false });
        let buffer = IndexBuffer::new(&ctx);
        let mut buffer = buffer.borrow_mut();
        buffer.set_shadowed(true);
        buffer.set_size(2, false, false).unwrap();

        buffer.lock(0, 2, false).unwrap().copy_from_slice(&u16_bytes(&[1, 2]));
        // GPU 缓冲区在资源不知情时被销毁
        backend.destroy_index_buffer(buffer.handle().unwrap());
        buffer.unlock();

        assert_eq!(buffer.lock_state(), LockState::None);
        assert!(buffer.is_data_lost());
        assert_eq!(buffer.shadow_data().unwrap(), u16_bytes(&[1, 2]).as_slice());
    }

    #[test]
    fn test_buffer_borrowed_across_device_loss_catches_up_on_next_write() {
        let (backend, ctx) = context();
        let buffer = IndexBuffer::new(&ctx);
        let mut held = buffer.borrow_mut();
        held.set_shadowed(true);
        held.set_size(2, false, false).unwrap();
        held.set_data(&u16_bytes(&[4, 2])).unwrap();
        let old_handle = held.handle().unwrap();

        ctx.lose_device();
        assert_eq!(held.handle(), None);
        assert_eq!(held.lifecycle().state(), DeviceObjectState::Lost);

        ctx.restore_device().unwrap();
        assert_eq!(held.handle(), None);

        held.set_data(&u16_bytes(&[7, 9])).unwrap();
        let handle = held.handle().unwrap();
        assert_ne!(handle, old_handle);
        assert_eq!(held.lifecycle().state(), DeviceObjectState::Live);
        assert_eq!(backend.index_buffer_contents(handle).unwrap(), u16_bytes(&[7, 9]));
        assert!(!held.is_data_lost());
    }

    #[test]
    fn test_borrowed_buffer_restores_shadow_when_locked_after_reset() {
        let (backend, ctx) = context();
        let buffer = IndexBuffer::new(&ctx);
        let mut held = buffer.borrow_mut();
        held.set_shadowed(true);
        held.set_size(3, false, false).unwrap();
        held.set_data(&u16_bytes(&[5, 6, 7])).unwrap();

        ctx.lose_device();
        ctx.restore_device().unwrap();

        held.lock(2, 1, false).unwrap().copy_from_slice(&u16_bytes(&[8]));
        held.unlock();

        let handle = held.handle().unwrap();
        assert_eq!(backend.index_buffer_contents(handle).unwrap(), u16_bytes(&[5, 6, 8]));
        assert!(!held.is_data_lost());
        assert!(!held.is_data_pending());
    }
}
