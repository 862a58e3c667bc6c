//! 渲染表面
//!
//! 渲染目标或深度纹理（立方体贴图为每个面）拥有一个渲染表面。
//! 表面记录更新模式、是否已排队更新以及延迟的尺寸调整；
//! 在上下文广播渲染表面更新时由所属纹理处理。

use crate::gfx::CubeMapFace;

use super::context::GraphicsContext;
use super::gpu_object::ObjectId;

/// 更新模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderSurfaceUpdateMode {
    /// 只在显式排队时更新
    Manual,
    /// 可见时更新；没有视口信息时等同于 Manual
    #[default]
    Visible,
    /// 每帧更新
    Always,
}

/// 渲染表面
#[derive(Debug)]
pub struct RenderSurface {
    id: ObjectId,
    face: Option<CubeMapFace>,
    update_mode: RenderSurfaceUpdateMode,
    update_queued: bool,
    pending_resize: Option<(u32, u32)>,
}

impl RenderSurface {
    pub(crate) fn new(context: &GraphicsContext, face: Option<CubeMapFace>) -> Self {
        Self {
            id: context.allocate_object_id(),
            face,
            update_mode: RenderSurfaceUpdateMode::default(),
            update_queued: false,
            pending_resize: None,
        }
    }

    /// 绑定为渲染目标时使用的标识
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// 立方体贴图的面，2D 纹理为 None
    pub fn face(&self) -> Option<CubeMapFace> {
        self.face
    }

    pub fn update_mode(&self) -> RenderSurfaceUpdateMode {
        self.update_mode
    }

    pub fn set_update_mode(&mut self, mode: RenderSurfaceUpdateMode) {
        self.update_mode = mode;
    }

    /// 请求在下一次广播时更新
    pub fn queue_update(&mut self) {
        self.update_queued = true;
    }

    pub fn is_update_queued(&self) -> bool {
        self.update_queued
    }

    pub fn reset_update_queued(&mut self) {
        self.update_queued = false;
    }

    /// 本次广播是否需要加入上下文的更新队列
    pub fn needs_update(&self) -> bool {
        self.update_mode == RenderSurfaceUpdateMode::Always || self.update_queued
    }

    /// 请求调整尺寸，在下一次广播时由所属纹理重建
    pub fn request_resize(&mut self, width: u32, height: u32) {
        self.pending_resize = Some((width, height));
    }

    pub fn pending_resize(&self) -> Option<(u32, u32)> {
        self.pending_resize
    }

    pub(crate) fn take_pending_resize(&mut self) -> Option<(u32, u32)> {
        self.pending_resize.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::{GraphicsCapabilities, SoftwareBackend};
    use std::rc::Rc;

    #[test]
    fn test_update_flags() {
        let ctx = GraphicsContext::new(Rc::new(SoftwareBackend::default()), GraphicsCapabilities::software());
        let mut surface = RenderSurface::new(&ctx, None);
        assert!(!surface.needs_update());

        surface.queue_update();
        assert!(surface.needs_update());
        surface.reset_update_queued();

        surface.set_update_mode(RenderSurfaceUpdateMode::Always);
        assert!(surface.needs_update());

        surface.request_resize(64, 32);
        assert_eq!(surface.take_pending_resize(), Some((64, 32)));
        assert_eq!(surface.pending_resize(), None);
    }
}
