//! 设备对象生命周期
//!
//! 每个依赖设备的资源都内嵌一个 `DeviceObjectLifecycle`，
//! 记录后端句柄以及与设备的关系：
//!
//! ```text
//! Detached --创建成功--> Live --设备丢失--> Lost
//!    ^                    |                 |
//!    +------ release -----+-----------------+
//!                         ^                 |
//!                         +--on_device_reset+
//! ```
//!
//! 资源通过 `DeviceObject` trait 接收上下文广播的丢失/恢复通知。
//! 广播时正被借用的资源会错过通知，之后第一次使用时按设备代数补上。

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::gfx::types::GpuHandle;

/// 资源在上下文中的唯一标识
///
/// 上下文的绑定表只记录标识，不持有资源本身。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// 设备代数，由上下文与所有生命周期共享
///
/// 每次设备丢失和恢复各加一：偶数表示设备可用，奇数表示设备已丢失。
#[derive(Debug, Clone, Default)]
pub struct DeviceGeneration(Rc<Cell<u64>>);

impl DeviceGeneration {
    pub fn get(&self) -> u64 {
        self.0.get()
    }

    pub(crate) fn advance(&self) -> u64 {
        let next = self.0.get() + 1;
        self.0.set(next);
        next
    }
}

/// 生命周期与设备代数对齐时需要补做的处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissedTransition {
    /// 错过了至少一次设备丢失
    pub lost: bool,
    /// 设备当前可用，需要重建
    pub reset: bool,
}

/// 设备关系状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceObjectState {
    /// 没有句柄
    Detached,
    /// 句柄属于当前设备
    Live,
    /// 设备已销毁，CPU 数据仍在
    Lost,
}

/// 句柄与设备关系
#[derive(Debug)]
pub struct DeviceObjectLifecycle {
    id: ObjectId,
    handle: Option<GpuHandle>,
    state: DeviceObjectState,
    data_lost: bool,
    data_pending: bool,
    device: DeviceGeneration,
    /// 最近一次处理丢失/恢复时的设备代数
    synced: u64,
}

impl DeviceObjectLifecycle {
    pub fn new(id: ObjectId, device: DeviceGeneration) -> Self {
        Self {
            id,
            handle: None,
            state: DeviceObjectState::Detached,
            data_lost: false,
            data_pending: false,
            synced: device.get(),
            device,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// 句柄属于旧设备时返回 `None`
    pub fn handle(&self) -> Option<GpuHandle> {
        if self.is_stale() {
            None
        } else {
            self.handle
        }
    }

    pub fn state(&self) -> DeviceObjectState {
        match self.state {
            DeviceObjectState::Live if self.is_stale() => DeviceObjectState::Lost,
            state => state,
        }
    }

    /// 错过了丢失或恢复通知
    pub fn is_stale(&self) -> bool {
        self.synced != self.device.get()
    }

    /// 记录当前设备代数，返回需要补做的处理
    pub fn synchronize(&mut self) -> Option<MissedTransition> {
        let current = self.device.get();
        let seen = std::mem::replace(&mut self.synced, current);
        if seen == current {
            return None;
        }
        Some(MissedTransition {
            lost: seen % 2 == 0,
            reset: current % 2 == 0,
        })
    }

    /// 创建成功，进入 Live
    pub fn attach(&mut self, handle: GpuHandle) {
        self.handle = Some(handle);
        self.state = DeviceObjectState::Live;
    }

    /// 设备丢失：句柄作废，不调用任何 API
    pub fn mark_lost(&mut self) {
        if self.state == DeviceObjectState::Live {
            self.state = DeviceObjectState::Lost;
        }
        self.handle = None;
    }

    /// 回到 Detached，返回需要销毁的句柄
    ///
    /// 旧设备的句柄已随设备销毁，不返回。
    pub fn detach(&mut self) -> Option<GpuHandle> {
        let stale = self.is_stale();
        self.state = DeviceObjectState::Detached;
        self.handle.take().filter(|_| !stale)
    }

    /// 设备恢复后内容无法还原，调用方需要重新填充
    pub fn is_data_lost(&self) -> bool {
        self.data_lost
    }

    pub fn set_data_lost(&mut self, lost: bool) {
        self.data_lost = lost;
    }

    pub fn clear_data_lost(&mut self) {
        self.data_lost = false;
    }

    /// 设备丢失期间有数据写入，等待恢复时提交
    pub fn is_data_pending(&self) -> bool {
        self.data_pending
    }

    pub fn set_data_pending(&mut self, pending: bool) {
        self.data_pending = pending;
    }
}

/// 依赖设备的资源
///
/// 上下文在设备丢失与恢复时对每个已注册的对象调用对应的钩子。
/// 两种广播对同一对象都是幂等的。
pub trait DeviceObject {
    fn lifecycle(&self) -> &DeviceObjectLifecycle;

    fn lifecycle_mut(&mut self) -> &mut DeviceObjectLifecycle;

    /// 设备已经丢失：丢弃句柄，不调用 API
    fn on_device_lost(&mut self);

    /// 设备已经恢复：重建句柄，尽可能恢复内容
    fn on_device_reset(&mut self);

    /// 释放句柄并解除上下文中的绑定
    fn release(&mut self);

    /// 渲染表面更新广播，只有带渲染表面的资源需要处理
    fn on_render_surface_update(&mut self) {}

    fn id(&self) -> ObjectId {
        self.lifecycle().id()
    }

    /// 补做错过的丢失/恢复处理，已对齐时无操作
    ///
    /// 上下文广播和资源自身的写入路径都经过这里。
    fn sync_device(&mut self) {
        let Some(missed) = self.lifecycle_mut().synchronize() else {
            return;
        };
        if missed.lost {
            self.on_device_lost();
        }
        if missed.reset {
            self.on_device_reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(raw: u64) -> GpuHandle {
        GpuHandle::new(raw).unwrap()
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut lifecycle = DeviceObjectLifecycle::new(ObjectId::new(1), DeviceGeneration::default());
        assert_eq!(lifecycle.state(), DeviceObjectState::Detached);

        lifecycle.attach(handle(7));
        assert_eq!(lifecycle.state(), DeviceObjectState::Live);
        assert_eq!(lifecycle.handle(), Some(handle(7)));

        lifecycle.mark_lost();
        assert_eq!(lifecycle.state(), DeviceObjectState::Lost);
        assert_eq!(lifecycle.handle(), None);

        // 重复广播保持不变
        lifecycle.mark_lost();
        assert_eq!(lifecycle.state(), DeviceObjectState::Lost);

        lifecycle.attach(handle(9));
        assert_eq!(lifecycle.detach(), Some(handle(9)));
        assert_eq!(lifecycle.state(), DeviceObjectState::Detached);
    }

    #[test]
    fn test_detached_object_stays_detached_on_loss() {
        let mut lifecycle = DeviceObjectLifecycle::new(ObjectId::new(2), DeviceGeneration::default());
        lifecycle.mark_lost();
        assert_eq!(lifecycle.state(), DeviceObjectState::Detached);
    }

    #[test]
    fn test_data_flags() {
        let mut lifecycle = DeviceObjectLifecycle::new(ObjectId::new(3), DeviceGeneration::default());
        lifecycle.set_data_lost(true);
        lifecycle.set_data_pending(true);
        assert!(lifecycle.is_data_lost());
        assert!(lifecycle.is_data_pending());

        lifecycle.clear_data_lost();
        assert!(!lifecycle.is_data_lost());
    }

    #[test]
    fn test_handle_from_previous_device_reads_as_lost() {
        let device = DeviceGeneration::default();
        let mut lifecycle = DeviceObjectLifecycle::new(ObjectId::new(4), device.clone());
        lifecycle.attach(handle(5));

        // 丢失与恢复都没有通知到这个对象
        device.advance();
        device.advance();
        assert!(lifecycle.is_stale());
        assert_eq!(lifecycle.handle(), None);
        assert_eq!(lifecycle.state(), DeviceObjectState::Lost);
        assert_eq!(lifecycle.detach(), None);
    }

    #[test]
    fn test_synchronize_reports_missed_transitions() {
        let device = DeviceGeneration::default();
        let mut lifecycle = DeviceObjectLifecycle::new(ObjectId::new(5), device.clone());
        assert_eq!(lifecycle.synchronize(), None);

        device.advance();
        assert_eq!(lifecycle.synchronize(), Some(MissedTransition { lost: true, reset: false }));
        assert!(!lifecycle.is_stale());

        device.advance();
        assert_eq!(lifecycle.synchronize(), Some(MissedTransition { lost: false, reset: true }));

        device.advance();
        device.advance();
        assert_eq!(lifecycle.synchronize(), Some(MissedTransition { lost: true, reset: true }));
        assert_eq!(lifecycle.synchronize(), None);
    }
}
