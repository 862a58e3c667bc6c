//! 资源提供者
//!
//! 按名称读取字节的资源来源。名称使用 `/` 分隔的相对路径。
//! 提供者要求 `Send + Sync`，解码可以在任意线程上进行。

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::debug;

use crate::core::error::{ResourceError, Result};

/// 资源来源
pub trait ResourceProvider: Send + Sync {
    /// 读取整个资源
    fn read(&self, name: &str) -> Result<Vec<u8>>;

    /// 资源是否存在
    fn exists(&self, name: &str) -> bool;
}

/// 从目录读取资源
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl ResourceProvider for DirectoryProvider {
    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path(name);
        debug!("Reading resource {}", path.display());
        fs::read(&path).map_err(|e| ResourceError::NotFound(format!("{}: {}", path.display(), e)).into())
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }
}

/// 内存中的资源，主要用于测试和内嵌数据
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), data.into());
    }

    pub fn with_file(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(name, data);
        self
    }
}

impl ResourceProvider for MemoryProvider {
    fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(name.to_string()).into())
    }

    fn exists(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }
}

/// 替换扩展名：`Textures/Wall.png` + `toml` -> `Textures/Wall.toml`
pub fn replace_extension(name: &str, extension: &str) -> String {
    let file_start = name.rfind('/').map_or(0, |i| i + 1);
    let stem = match name[file_start..].rfind('.') {
        Some(dot) => &name[..file_start + dot],
        None => name,
    };
    format!("{}.{}", stem, extension)
}

/// 所在目录，没有目录时为空串
pub fn parent_path(name: &str) -> &str {
    name.rfind('/').map_or("", |i| &name[..i])
}

/// 相对于 `dir` 拼接路径
pub fn join_path(dir: &str, file: &str) -> String {
    if dir.is_empty() {
        file.to_string()
    } else {
        format!("{}/{}", dir, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_extension() {
        assert_eq!(replace_extension("Textures/Wall.png", "toml"), "Textures/Wall.toml");
        assert_eq!(replace_extension("Wall", "toml"), "Wall.toml");
        assert_eq!(replace_extension("a.b/Wall", "toml"), "a.b/Wall.toml");
    }

    #[test]
    fn test_paths() {
        assert_eq!(parent_path("Textures/Sky/Up.png"), "Textures/Sky");
        assert_eq!(parent_path("Up.png"), "");
        assert_eq!(join_path("", "Up.png"), "Up.png");
        assert_eq!(join_path("Textures", "Up.png"), "Textures/Up.png");
    }

    #[test]
    fn test_memory_provider() {
        let provider = MemoryProvider::new().with_file("a.txt", "hello");
        assert!(provider.exists("a.txt"));
        assert_eq!(provider.read("a.txt").unwrap(), b"hello");
        assert!(!provider.exists("b.txt"));
        assert!(provider.read("b.txt").is_err());
    }

    #[test]
    fn test_directory_provider_missing_file() {
        let provider = DirectoryProvider::new(std::env::temp_dir());
        assert!(!provider.exists("distgpu-definitely-missing.bin"));
        assert!(provider.read("distgpu-definitely-missing.bin").is_err());
    }
}
