//! 本地文件系统协作者
//!
//! 传输引擎不直接访问磁盘，而是通过 [`FileSystem`] trait 操作路径寻址的条目。
//!
//! - [`LocalFileSystem`]: 基于 `tokio::fs` 的真实实现
//! - [`MemoryFileSystem`]: 内存实现，用于测试

mod local;
mod memory;

pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};

/// 可读流
pub type EntryReader = Box<dyn AsyncRead + Send + Unpin>;

/// 可写流
pub type EntryWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// 文件系统条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// 基本名称
    pub name: String,
    /// 完整路径
    pub full_path: PathBuf,
    pub is_directory: bool,
    /// 文件大小（目录为 0）
    pub size: u64,
}

impl Entry {
    pub(crate) fn new(full_path: &Path, is_directory: bool, size: u64) -> Self {
        let name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            name,
            full_path: full_path.to_path_buf(),
            is_directory,
            size,
        }
    }
}

/// 文件系统协作者接口
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// 解析已存在的路径
    async fn resolve(&self, path: &Path) -> io::Result<Entry>;

    /// 创建（或截断）文件，必要时创建父目录
    async fn create(&self, path: &Path) -> io::Result<Entry>;

    /// 删除文件或空目录
    async fn remove(&self, entry: &Entry) -> io::Result<()>;

    /// 递归删除目录
    async fn remove_recursively(&self, entry: &Entry) -> io::Result<()>;

    async fn open_reader(&self, entry: &Entry) -> io::Result<EntryReader>;

    /// 打开写入流（截断已有内容）
    async fn open_writer(&self, entry: &Entry) -> io::Result<EntryWriter>;
}

/// 删除路径上的条目（如果存在）
///
/// 路径不存在视为已清理，返回 `Ok(false)`。
pub async fn remove_if_exists(fs: &dyn FileSystem, path: &Path) -> io::Result<bool> {
    let entry = match fs.resolve(path).await {
        Ok(entry) => entry,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    if entry.is_directory {
        fs.remove_recursively(&entry).await?;
    } else {
        fs.remove(&entry).await?;
    }
    Ok(true)
}

/// 检查路径能否作为下载目标，不创建也不修改任何条目
///
/// 目标是目录，或最近的已存在祖先是普通文件时失败。
pub async fn check_writable(fs: &dyn FileSystem, path: &Path) -> io::Result<()> {
    match fs.resolve(path).await {
        Ok(entry) if entry.is_directory => {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{} is a directory", path.display()),
            ));
        }
        Ok(_) => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    for ancestor in path.ancestors().skip(1) {
        match fs.resolve(ancestor).await {
            Ok(entry) if entry.is_directory => return Ok(()),
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("{} is not a directory", ancestor.display()),
                ));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// 将调用方给出的本地路径规范化为绝对路径
///
/// 接受普通路径和 `file://` URL，相对路径返回 `None`。
pub fn normalize_local_path(raw: &str) -> Option<PathBuf> {
    let path = if raw.starts_with("file:") {
        reqwest::Url::parse(raw).ok()?.to_file_path().ok()?
    } else {
        PathBuf::from(raw)
    };

    if path.is_absolute() { Some(path) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain_absolute() {
        assert_eq!(
            normalize_local_path("/tmp/upload.txt"),
            Some(PathBuf::from("/tmp/upload.txt"))
        );
    }

    #[test]
    fn test_normalize_file_url() {
        assert_eq!(
            normalize_local_path("file:///tmp/robots.txt"),
            Some(PathBuf::from("/tmp/robots.txt"))
        );
    }

    #[test]
    fn test_normalize_rejects_relative() {
        assert_eq!(normalize_local_path("c:\\54321"), None);
        assert_eq!(normalize_local_path("relative/file.txt"), None);
        assert_eq!(normalize_local_path(""), None);
    }

    #[tokio::test]
    async fn test_remove_if_exists_missing_is_ok() {
        let fs = MemoryFileSystem::new();
        let removed = remove_if_exists(&fs, Path::new("/does_not_exist.txt"))
            .await
            .unwrap();
        assert!(!removed);
    }

    #[tokio::test]
    async fn test_check_writable_leaves_entries_alone() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/data/keep.txt", b"precious".to_vec());

        check_writable(&fs, Path::new("/data/keep.txt")).await.unwrap();
        check_writable(&fs, Path::new("/data/new/deeper/file.txt")).await.unwrap();
        assert_eq!(fs.read_file("/data/keep.txt").unwrap(), b"precious");
        assert!(!fs.contains(Path::new("/data/new")));

        let err = check_writable(&fs, Path::new("/data")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::IsADirectory);
        let err = check_writable(&fs, Path::new("/data/keep.txt/child.txt"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotADirectory);
    }

    #[tokio::test]
    async fn test_remove_if_exists_directory() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/data/nested/a.txt", b"a".to_vec());
        fs.insert_file("/data/b.txt", b"b".to_vec());

        assert!(remove_if_exists(&fs, Path::new("/data")).await.unwrap());
        assert!(!fs.contains(Path::new("/data/nested/a.txt")));
        assert!(!fs.contains(Path::new("/data/b.txt")));
    }
}
