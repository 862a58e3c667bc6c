//! 软件图形后端
//!
//! 在 CPU 上模拟设备，用于无 GPU 环境、测试以及设备丢失流程的演练。
//!
//! - `backend` - SoftwareBackend（对象存储、映射模拟、设备丢失）
//! - `glsl` - 着色器检查器（条件编译、#error、花括号、入口点）

mod backend;
mod glsl;

pub use backend::{SoftwareBackend, SoftwareBackendOptions};
