//! distgpu - 设备资源层探测程序
//!
//! 按配置创建图形后端，让一个索引缓冲区经历一次模拟的设备丢失与恢复，
//! 并可选地编译着色器文件、加载纹理，用来检查后端是否工作正常。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件（config.toml）
//! cargo run
//!
//! # 使用 wgpu 后端编译着色器
//! cargo run -- --wgpu --shader Shaders/Basic.glsl
//!
//! # 加载纹理（同名 .toml 为参数文件）
//! cargo run -- --texture Textures/Wall.png
//! ```

use std::path::Path;
use std::rc::Rc;

use anyhow::{bail, Context as _};
use dist_gpu::core::{log, Config};
use dist_gpu::gfx::ShaderStage;
use dist_gpu::renderer::{GraphicsContext, IndexBuffer, Shader, Texture2D};
use dist_gpu::resource::DirectoryProvider;
use tracing::{error, info, warn};

/// 应用程序入口点
///
/// # 初始化流程
///
/// 1. 加载配置文件（config.toml）
/// 2. 应用命令行参数覆盖
/// 3. 初始化日志系统
/// 4. 创建图形后端和上下文
/// 5. 依次运行各项检查
///
/// # 命令行参数
///
/// - `--software` / `--wgpu`: 选择后端
/// - `--headless`: 无头模式
/// - `--mobile`: 移动端着色器配置
/// - `--shader <path>`: 编译着色器文件
/// - `--texture <path>`: 加载纹理
fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");

    // 2. 应用命令行参数
    config.apply_args(&args);
    config.validate().context("Invalid configuration")?;

    // 3. 初始化日志系统
    let log_file = config
        .logging
        .file_output
        .then_some(config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file);
    info!(version = env!("CARGO_PKG_VERSION"), "distgpu starting");
    info!(
        backend = config.graphics.backend.name(),
        headless = config.graphics.headless,
        profile = ?config.graphics.shader_profile,
        "Graphics configuration"
    );

    // 4. 创建上下文
    let context = GraphicsContext::from_config(&config).context("Failed to create graphics context")?;

    // 5. 检查
    probe_index_buffer(&context)?;

    if let Some(path) = arg_value(&args, "--shader") {
        probe_shader(&context, path)?;
    }
    if let Some(path) = arg_value(&args, "--texture") {
        probe_texture(&context, path)?;
    }

    info!("All probes finished");
    Ok(())
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let index = args.iter().position(|a| a == flag)?;
    args.get(index + 1).map(String::as_str)
}

/// 分成资源目录和相对名称
fn split_resource_path(path: &str) -> (DirectoryProvider, String) {
    let path = Path::new(path);
    let dir = path.parent().unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    (DirectoryProvider::new(dir), name)
}

/// 带影子数据的动态索引缓冲区在设备丢失后恢复原有内容
fn probe_index_buffer(context: &Rc<GraphicsContext>) -> anyhow::Result<()> {
    let indices: [u16; 6] = [0, 1, 2, 2, 1, 3];
    let buffer = IndexBuffer::new(context);
    {
        let mut buffer = buffer.borrow_mut();
        buffer.set_shadowed(true);
        buffer.set_size(indices.len(), false, true)?;
        buffer.set_data(bytemuck::cast_slice(&indices))?;
        let range = buffer.get_used_vertex_range(0, indices.len())?;
        info!(
            min_vertex = range.min_vertex,
            vertex_count = range.vertex_count,
            "Index buffer uploaded"
        );
    }

    if context.is_headless() {
        info!("Headless mode, skipping device loss simulation");
        return Ok(());
    }

    context.lose_device();
    context.restore_device().context("Failed to restore device")?;

    let buffer = buffer.borrow();
    if buffer.is_data_lost() {
        bail!("index buffer lost its contents across device reset");
    }
    match buffer.shadow_data() {
        Some(data) if data == bytemuck::cast_slice::<u16, u8>(&indices) => {
            info!("Index buffer survived device loss")
        }
        _ => bail!("index buffer shadow data changed across device reset"),
    }
    Ok(())
}

fn probe_shader(context: &Rc<GraphicsContext>, path: &str) -> anyhow::Result<()> {
    let (provider, name) = split_resource_path(path);
    let shader = Shader::load(context, &provider, &name).with_context(|| format!("Failed to load shader {}", path))?;

    let vs = shader.variation(ShaderStage::Vertex, "");
    let ps = shader.variation(ShaderStage::Fragment, "");
    match context.set_shaders(Some(&vs), Some(&ps)) {
        Some(program) => info!(%program, "Shader {} linked", shader.name()),
        None if context.is_headless() => warn!("Headless mode, shader {} not compiled", shader.name()),
        None => {
            for variation in [&vs, &ps] {
                let variation = variation.borrow();
                if !variation.compiler_output().is_empty() {
                    error!("{}:\n{}", variation.full_name(), variation.compiler_output());
                }
            }
            bail!("shader {} failed to compile or link", path);
        }
    }
    Ok(())
}

fn probe_texture(context: &Rc<GraphicsContext>, path: &str) -> anyhow::Result<()> {
    let (provider, name) = split_resource_path(path);
    let texture = Texture2D::new(context);
    let mut texture = texture.borrow_mut();
    texture
        .begin_load(&provider, &name)
        .with_context(|| format!("Failed to decode texture {}", path))?;
    texture.end_load().with_context(|| format!("Failed to upload texture {}", path))?;

    info!(
        width = texture.width(),
        height = texture.height(),
        levels = texture.texture().levels(),
        memory = texture.memory_use(),
        "Texture {} loaded",
        name
    );
    Ok(())
}
