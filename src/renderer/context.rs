//! 图形上下文
//!
//! `GraphicsContext` 持有注入的后端和运行期能力，并负责：
//! - 设备丢失状态，以及向所有已注册资源广播丢失/恢复
//! - 当前绑定的着色器、纹理单元、索引缓冲区和渲染目标
//! - 着色器程序缓存
//! - 临时缓冲区池（锁定回退时使用）
//! - 渲染表面更新队列
//!
//! 所有调用都发生在持有设备的线程上，内部状态使用 `Cell`/`RefCell`，
//! 资源以 `Rc<GraphicsContext>` 共享上下文。

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::core::config::{Config, ShaderProfile};
use crate::core::error::Result;
use crate::gfx::{self, GpuHandle, GraphicsBackend, GraphicsCapabilities, ShaderStage};
use crate::{engine_debug, engine_error, engine_info, engine_warn};

use super::gpu_object::{DeviceGeneration, DeviceObject, DeviceObjectLifecycle, ObjectId};
use super::shader_variation::ShaderVariation;

/// 纹理单元数量
pub const MAX_TEXTURE_UNITS: usize = 16;
/// 同时绑定的渲染目标数量
pub const MAX_RENDER_TARGETS: usize = 4;
/// 池中保留的临时缓冲区数量
const MAX_SCRATCH_BUFFERS: usize = 8;

/// 链接后的着色器程序
#[derive(Debug, Clone, Copy)]
struct ShaderProgram {
    handle: GpuHandle,
}

/// 图形上下文
pub struct GraphicsContext {
    backend: Rc<dyn GraphicsBackend>,
    capabilities: GraphicsCapabilities,
    device_lost: Cell<bool>,
    generation: DeviceGeneration,
    next_object_id: Cell<u64>,
    objects: RefCell<Vec<Weak<RefCell<dyn DeviceObject>>>>,

    vertex_shader: Cell<Option<ObjectId>>,
    pixel_shader: Cell<Option<ObjectId>>,
    shader_program: Cell<Option<GpuHandle>>,
    shader_programs: RefCell<HashMap<(ObjectId, ObjectId), ShaderProgram>>,

    textures: RefCell<[Option<ObjectId>; MAX_TEXTURE_UNITS]>,
    index_buffer: Cell<Option<ObjectId>>,
    render_targets: RefCell<[Option<ObjectId>; MAX_RENDER_TARGETS]>,

    scratch_buffers: RefCell<Vec<Vec<u8>>>,
    queued_surfaces: RefCell<Vec<ObjectId>>,
}

impl GraphicsContext {
    /// 用已构造的后端创建上下文
    pub fn new(backend: Rc<dyn GraphicsBackend>, capabilities: GraphicsCapabilities) -> Rc<Self> {
        engine_info!(
            backend = backend.backend_name(),
            headless = capabilities.headless,
            max_bones = capabilities.max_bones,
            "Graphics context created"
        );
        Rc::new(Self {
            backend,
            capabilities,
            device_lost: Cell::new(false),
            generation: DeviceGeneration::default(),
            next_object_id: Cell::new(1),
            objects: RefCell::new(Vec::new()),
            vertex_shader: Cell::new(None),
            pixel_shader: Cell::new(None),
            shader_program: Cell::new(None),
            shader_programs: RefCell::new(HashMap::new()),
            textures: RefCell::new([None; MAX_TEXTURE_UNITS]),
            index_buffer: Cell::new(None),
            render_targets: RefCell::new([None; MAX_RENDER_TARGETS]),
            scratch_buffers: RefCell::new(Vec::new()),
            queued_surfaces: RefCell::new(Vec::new()),
        })
    }

    /// 按配置选择后端并创建上下文
    pub fn from_config(config: &Config) -> Result<Rc<Self>> {
        let backend = gfx::create_backend(config)?;
        Ok(Self::new(backend, GraphicsCapabilities::from_config(config)))
    }

    pub fn backend(&self) -> &dyn GraphicsBackend {
        self.backend.as_ref()
    }

    pub fn capabilities(&self) -> &GraphicsCapabilities {
        &self.capabilities
    }

    pub fn is_headless(&self) -> bool {
        self.capabilities.headless
    }

    pub fn is_device_lost(&self) -> bool {
        self.device_lost.get()
    }

    pub fn max_bones(&self) -> u32 {
        self.capabilities.max_bones
    }

    pub fn shader_profile(&self) -> ShaderProfile {
        self.capabilities.shader_profile
    }

    /// 当前设备代数，每次丢失和恢复各加一
    pub fn device_generation(&self) -> u64 {
        self.generation.get()
    }

    /// 分配资源标识
    pub(crate) fn allocate_object_id(&self) -> ObjectId {
        let raw = self.next_object_id.get();
        self.next_object_id.set(raw + 1);
        ObjectId::new(raw)
    }

    /// 新资源的生命周期，从当前设备代数开始
    ///
    /// 无头模式的资源不注册，也不跟随设备代数。
    pub(crate) fn new_lifecycle(&self) -> DeviceObjectLifecycle {
        let generation = if self.is_headless() {
            DeviceGeneration::default()
        } else {
            self.generation.clone()
        };
        DeviceObjectLifecycle::new(self.allocate_object_id(), generation)
    }

    /// 注册资源以接收设备广播；无头模式下不注册
    pub(crate) fn register_object<T: DeviceObject + 'static>(&self, object: &Rc<RefCell<T>>) {
        if self.is_headless() {
            return;
        }
        let object: Rc<RefCell<dyn DeviceObject>> = object.clone();
        let mut objects = self.objects.borrow_mut();
        objects.retain(|weak| weak.strong_count() > 0);
        objects.push(Rc::downgrade(&object));
    }

    /// 已注册且仍存活的资源数量
    pub fn object_count(&self) -> usize {
        self.objects
            .borrow()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    fn live_objects(&self) -> Vec<Rc<RefCell<dyn DeviceObject>>> {
        self.objects.borrow().iter().filter_map(Weak::upgrade).collect()
    }

    /// 让所有资源对齐当前设备代数
    ///
    /// 正被借用的资源在下次使用时自行补做。
    fn broadcast(&self, what: &str, notify: impl Fn(&mut dyn DeviceObject)) {
        for object in self.live_objects() {
            match object.try_borrow_mut() {
                Ok(mut object) => notify(&mut *object),
                Err(_) => engine_debug!("Deferred {} notification for a resource that is in use", what),
            }
        }
    }

    /// 设备丢失
    ///
    /// 所有资源丢弃句柄，绑定与程序缓存清空，最后后端释放全部对象。
    /// 重复调用无效果。
    pub fn lose_device(&self) {
        if self.device_lost.replace(true) {
            return;
        }
        let generation = self.generation.advance();
        engine_warn!(generation, "Graphics device lost");

        self.broadcast("device lost", |object| object.sync_device());

        self.vertex_shader.set(None);
        self.pixel_shader.set(None);
        self.shader_program.set(None);
        self.shader_programs.borrow_mut().clear();
        *self.textures.borrow_mut() = [None; MAX_TEXTURE_UNITS];
        self.index_buffer.set(None);
        *self.render_targets.borrow_mut() = [None; MAX_RENDER_TARGETS];

        self.backend.on_device_lost();
    }

    /// 设备恢复
    ///
    /// 后端重新获取设备后，所有资源重建句柄并尽可能恢复内容。
    pub fn restore_device(&self) -> Result<()> {
        if !self.device_lost.get() {
            return Ok(());
        }

        if let Err(e) = self.backend.on_device_reset() {
            engine_error!("Failed to restore graphics device: {}", e);
            return Err(e);
        }
        self.device_lost.set(false);
        let generation = self.generation.advance();
        engine_info!(generation, "Graphics device restored");

        self.broadcast("device reset", |object| object.sync_device());
        Ok(())
    }

    // ---------------------------------------------------------------------
    // 着色器
    // ---------------------------------------------------------------------

    /// 绑定顶点和像素着色器
    ///
    /// 尚未编译且没有编译错误的变体会先编译；编译失败的变体按未绑定处理。
    /// 两者都有效时链接并缓存程序，返回当前程序句柄。
    pub fn set_shaders(
        &self,
        vs: Option<&Rc<RefCell<ShaderVariation>>>,
        ps: Option<&Rc<RefCell<ShaderVariation>>>,
    ) -> Option<GpuHandle> {
        let vs = vs.and_then(|variation| self.prepare_shader(variation));
        let ps = ps.and_then(|variation| self.prepare_shader(variation));

        self.vertex_shader.set(vs.map(|(id, _)| id));
        self.pixel_shader.set(ps.map(|(id, _)| id));

        let program = match (vs, ps) {
            (Some(vs), Some(ps)) => self.link_program(vs, ps),
            _ => None,
        };
        self.shader_program.set(program);
        program
    }

    /// 按需编译，返回标识和句柄
    fn prepare_shader(&self, variation: &Rc<RefCell<ShaderVariation>>) -> Option<(ObjectId, GpuHandle)> {
        let mut variation = match variation.try_borrow_mut() {
            Ok(variation) => variation,
            Err(_) => {
                engine_error!("Shader variation is in use and can not be bound");
                return None;
            }
        };
        variation.sync_device();

        if variation.handle().is_none() && variation.compiler_output().is_empty() {
            let kind = match variation.stage() {
                ShaderStage::Vertex => "vertex",
                ShaderStage::Fragment => "pixel",
            };
            match variation.create() {
                Ok(()) => engine_debug!("Compiled {} shader {}", kind, variation.full_name()),
                Err(_) => engine_error!(
                    "Failed to compile {} shader {}:\n{}",
                    kind,
                    variation.full_name(),
                    variation.compiler_output()
                ),
            }
        }

        variation.handle().map(|handle| (variation.id(), handle))
    }

    fn link_program(&self, vs: (ObjectId, GpuHandle), ps: (ObjectId, GpuHandle)) -> Option<GpuHandle> {
        let key = (vs.0, ps.0);
        if let Some(program) = self.shader_programs.borrow().get(&key) {
            return Some(program.handle);
        }

        match self.backend.link_program(vs.1, ps.1) {
            Ok(handle) => {
                self.shader_programs.borrow_mut().insert(key, ShaderProgram { handle });
                engine_debug!("Linked shader program {} from {} and {}", handle, vs.0, ps.0);
                Some(handle)
            }
            Err(log) => {
                engine_error!("Failed to link vertex shader {} and pixel shader {}:\n{}", vs.0, ps.0, log);
                None
            }
        }
    }

    pub fn vertex_shader(&self) -> Option<ObjectId> {
        self.vertex_shader.get()
    }

    pub fn pixel_shader(&self) -> Option<ObjectId> {
        self.pixel_shader.get()
    }

    /// 当前绑定的程序
    pub fn shader_program(&self) -> Option<GpuHandle> {
        self.shader_program.get()
    }

    pub fn shader_program_count(&self) -> usize {
        self.shader_programs.borrow().len()
    }

    /// 解除对某个变体的绑定
    pub(crate) fn unbind_shader(&self, id: ObjectId) {
        if self.vertex_shader.get() == Some(id) || self.pixel_shader.get() == Some(id) {
            self.vertex_shader.set(None);
            self.pixel_shader.set(None);
            self.shader_program.set(None);
        }
    }

    /// 清除引用了某个变体的程序
    pub fn cleanup_shader_programs(&self, id: ObjectId) {
        let removed: Vec<ShaderProgram> = {
            let mut programs = self.shader_programs.borrow_mut();
            let keys: Vec<_> = programs
                .keys()
                .filter(|(vs, ps)| *vs == id || *ps == id)
                .copied()
                .collect();
            keys.iter().filter_map(|key| programs.remove(key)).collect()
        };

        for program in removed {
            if self.shader_program.get() == Some(program.handle) {
                self.shader_program.set(None);
            }
            if !self.is_device_lost() {
                self.backend.destroy_program(program.handle);
            }
        }
    }

    // ---------------------------------------------------------------------
    // 纹理、索引缓冲区、渲染目标
    // ---------------------------------------------------------------------

    /// 绑定纹理单元，越界的单元被忽略
    pub fn set_texture(&self, unit: usize, texture: Option<ObjectId>) {
        match self.textures.borrow_mut().get_mut(unit) {
            Some(slot) => *slot = texture,
            None => engine_warn!("Texture unit {} out of range", unit),
        }
    }

    pub fn texture(&self, unit: usize) -> Option<ObjectId> {
        self.textures.borrow().get(unit).copied().flatten()
    }

    pub(crate) fn unbind_texture(&self, id: ObjectId) {
        for slot in self.textures.borrow_mut().iter_mut() {
            if *slot == Some(id) {
                *slot = None;
            }
        }
    }

    pub fn set_index_buffer(&self, buffer: Option<ObjectId>) {
        self.index_buffer.set(buffer);
    }

    pub fn index_buffer(&self) -> Option<ObjectId> {
        self.index_buffer.get()
    }

    /// 绑定渲染目标（渲染表面标识）
    pub fn set_render_target(&self, index: usize, surface: Option<ObjectId>) {
        match self.render_targets.borrow_mut().get_mut(index) {
            Some(slot) => *slot = surface,
            None => engine_warn!("Render target index {} out of range", index),
        }
    }

    pub fn render_target(&self, index: usize) -> Option<ObjectId> {
        self.render_targets.borrow().get(index).copied().flatten()
    }

    pub(crate) fn unbind_render_target(&self, surface: ObjectId) {
        for slot in self.render_targets.borrow_mut().iter_mut() {
            if *slot == Some(surface) {
                *slot = None;
            }
        }
    }

    // ---------------------------------------------------------------------
    // 临时缓冲区池
    // ---------------------------------------------------------------------

    /// 借出至少 `size` 字节的临时缓冲区，内容清零
    pub fn reserve_scratch_buffer(&self, size: usize) -> Vec<u8> {
        let mut pool = self.scratch_buffers.borrow_mut();
        let mut buffer = match pool.iter().position(|b| b.capacity() >= size) {
            Some(index) => pool.swap_remove(index),
            None => Vec::with_capacity(size),
        };
        buffer.clear();
        buffer.resize(size, 0);
        buffer
    }

    /// 归还临时缓冲区
    pub fn free_scratch_buffer(&self, buffer: Vec<u8>) {
        let mut pool = self.scratch_buffers.borrow_mut();
        if pool.len() < MAX_SCRATCH_BUFFERS {
            pool.push(buffer);
        }
    }

    pub fn scratch_buffer_count(&self) -> usize {
        self.scratch_buffers.borrow().len()
    }

    // ---------------------------------------------------------------------
    // 渲染表面
    // ---------------------------------------------------------------------

    /// 把渲染表面加入本帧的更新队列
    pub fn queue_render_surface(&self, surface: ObjectId) {
        let mut queue = self.queued_surfaces.borrow_mut();
        if !queue.contains(&surface) {
            queue.push(surface);
        }
    }

    /// 取出并清空更新队列
    pub fn take_queued_surfaces(&self) -> Vec<ObjectId> {
        std::mem::take(&mut *self.queued_surfaces.borrow_mut())
    }

    /// 通知所有资源处理渲染表面的更新（延迟的尺寸调整、更新排队）
    pub fn broadcast_render_surface_update(&self) {
        self.broadcast("render surface update", |object| object.on_render_surface_update());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::SoftwareBackend;

    fn context() -> (Rc<SoftwareBackend>, Rc<GraphicsContext>) {
        let backend = Rc::new(SoftwareBackend::default());
        let ctx = GraphicsContext::new(backend.clone(), GraphicsCapabilities::software());
        (backend, ctx)
    }

    #[test]
    fn test_scratch_buffer_pool_reuses_buffers() {
        let (_, ctx) = context();
        let mut buffer = ctx.reserve_scratch_buffer(64);
        assert_eq!(buffer.len(), 64);
        buffer[0] = 1;
        ctx.free_scratch_buffer(buffer);
        assert_eq!(ctx.scratch_buffer_count(), 1);

        let buffer = ctx.reserve_scratch_buffer(16);
        assert_eq!(buffer.len(), 16);
        assert_eq!(buffer[0], 0);
        assert_eq!(ctx.scratch_buffer_count(), 0);
    }

    #[test]
    fn test_device_loss_is_idempotent() {
        let (backend, ctx) = context();
        ctx.set_texture(0, Some(ObjectId::new(42)));

        ctx.lose_device();
        ctx.lose_device();
        assert!(ctx.is_device_lost());
        assert!(!backend.is_device_present());
        assert_eq!(ctx.texture(0), None);
        assert_eq!(ctx.device_generation(), 1);

        ctx.restore_device().unwrap();
        ctx.restore_device().unwrap();
        assert!(!ctx.is_device_lost());
        assert!(backend.is_device_present());
        assert_eq!(ctx.device_generation(), 2);
    }

    #[test]
    fn test_binding_slots() {
        let (_, ctx) = context();
        let id = ctx.allocate_object_id();

        ctx.set_texture(3, Some(id));
        ctx.set_texture(MAX_TEXTURE_UNITS, Some(id));
        ctx.set_render_target(1, Some(id));
        assert_eq!(ctx.texture(3), Some(id));

        ctx.unbind_texture(id);
        ctx.unbind_render_target(id);
        assert_eq!(ctx.texture(3), None);
        assert_eq!(ctx.render_target(1), None);
    }

    #[test]
    fn test_render_surface_queue_deduplicates() {
        let (_, ctx) = context();
        let id = ctx.allocate_object_id();
        ctx.queue_render_surface(id);
        ctx.queue_render_surface(id);
        assert_eq!(ctx.take_queued_surfaces(), vec![id]);
        assert!(ctx.take_queued_surfaces().is_empty());
    }
}
