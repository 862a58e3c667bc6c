//! CPU 影子数据与锁定状态
//!
//! 影子缓冲区是 GPU 数据在 CPU 上的镜像，设备丢失后依然有效，
//! 设备恢复时用于重新上传。锁定时调用方拿到的可写切片可能来自
//! 硬件映射、影子缓冲区或上下文池中的临时缓冲区，由 `LockSource` 标记。

use std::ops::Range;

/// 固定大小的 CPU 字节缓冲区，创建时清零
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowBuffer {
    data: Box<[u8]>,
}

impl ShadowBuffer {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// 写入一段数据，调用方保证范围合法
    pub fn write(&mut self, offset: usize, data: &[u8]) {
        self.data[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn range(&self, range: Range<usize>) -> &[u8] {
        &self.data[range]
    }

    pub fn range_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        &mut self.data[range]
    }
}

/// 锁定状态：调用方的切片指向哪块内存
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    None,
    Hardware,
    Shadow,
    ScratchOnly,
}

/// 锁定来源
#[derive(Debug)]
pub(crate) enum LockSource {
    /// 后端映射出的字节，解锁时提交
    Hardware(Vec<u8>),
    /// 直接写影子缓冲区
    Shadow,
    /// 从上下文池借来的临时缓冲区
    Scratch(Vec<u8>),
}

/// 一次未解锁的锁定
#[derive(Debug)]
pub(crate) struct BufferLock {
    /// 起始元素
    pub start: usize,
    /// 元素数量
    pub count: usize,
    pub discard: bool,
    pub source: LockSource,
}

impl BufferLock {
    pub fn state(&self) -> LockState {
        match self.source {
            LockSource::Hardware(_) => LockState::Hardware,
            LockSource::Shadow => LockState::Shadow,
            LockSource::Scratch(_) => LockState::ScratchOnly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_buffer_zeroed_and_writable() {
        let mut shadow = ShadowBuffer::new(6);
        assert_eq!(shadow.as_slice(), &[0; 6]);

        shadow.write(2, &[1, 2, 3]);
        assert_eq!(shadow.range(1..5), &[0, 1, 2, 3]);

        shadow.range_mut(0..1)[0] = 9;
        assert_eq!(shadow.as_slice()[0], 9);
    }

    #[test]
    fn test_lock_state_follows_source() {
        let lock = BufferLock {
            start: 0,
            count: 1,
            discard: false,
            source: LockSource::Scratch(vec![0; 2]),
        };
        assert_eq!(lock.state(), LockState::ScratchOnly);
    }
}
