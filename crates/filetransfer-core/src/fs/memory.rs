use super::{Entry, EntryReader, EntryWriter, FileSystem};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

#[derive(Default)]
struct Tree {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

impl Tree {
    fn add_parents(&mut self, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
    }
}

/// 内存文件系统
///
/// 可克隆，克隆体共享同一棵树。每次 trait 调用都会计数，
/// 测试用它断言某些失败路径没有触碰文件系统。
#[derive(Clone, Default)]
pub struct MemoryFileSystem {
    tree: Arc<Mutex<Tree>>,
    operations: Arc<AtomicUsize>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入文件（不计入操作次数）
    pub fn insert_file(&self, path: impl AsRef<Path>, content: Vec<u8>) {
        let path = path.as_ref();
        let mut tree = self.lock();
        tree.add_parents(path);
        tree.files.insert(path.to_path_buf(), content);
    }

    pub fn read_file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.lock().files.get(path.as_ref()).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        let tree = self.lock();
        tree.files.contains_key(path) || tree.dirs.contains(path)
    }

    /// trait 方法被调用的次数
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        // 锁内不会 panic，中毒时继续使用内部数据
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn count(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn resolve(&self, path: &Path) -> io::Result<Entry> {
        self.count();
        let tree = self.lock();
        if let Some(content) = tree.files.get(path) {
            Ok(Entry::new(path, false, content.len() as u64))
        } else if tree.dirs.contains(path) {
            Ok(Entry::new(path, true, 0))
        } else {
            Err(not_found(path))
        }
    }

    async fn create(&self, path: &Path) -> io::Result<Entry> {
        self.count();
        let mut tree = self.lock();
        if tree.dirs.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{} is a directory", path.display()),
            ));
        }
        if tree
            .files
            .keys()
            .any(|file| path.ancestors().skip(1).any(|a| a == file))
        {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("{} has a file as an ancestor", path.display()),
            ));
        }
        tree.add_parents(path);
        tree.files.insert(path.to_path_buf(), Vec::new());
        Ok(Entry::new(path, false, 0))
    }

    async fn remove(&self, entry: &Entry) -> io::Result<()> {
        self.count();
        let mut tree = self.lock();
        let path = entry.full_path.as_path();
        if tree.files.remove(path).is_some() {
            return Ok(());
        }
        if tree.dirs.contains(path) {
            let has_children = tree.files.keys().any(|p| p.starts_with(path) && p != path)
                || tree.dirs.iter().any(|p| p.starts_with(path) && p != path);
            if has_children {
                return Err(io::Error::new(
                    io::ErrorKind::DirectoryNotEmpty,
                    format!("{} is not empty", path.display()),
                ));
            }
            tree.dirs.remove(path);
            return Ok(());
        }
        Err(not_found(path))
    }

    async fn remove_recursively(&self, entry: &Entry) -> io::Result<()> {
        self.count();
        let mut tree = self.lock();
        let path = entry.full_path.as_path();
        if !tree.dirs.contains(path) && !tree.files.contains_key(path) {
            return Err(not_found(path));
        }
        tree.files.retain(|p, _| !p.starts_with(path));
        tree.dirs.retain(|p| !p.starts_with(path));
        Ok(())
    }

    async fn open_reader(&self, entry: &Entry) -> io::Result<EntryReader> {
        self.count();
        let content = self
            .lock()
            .files
            .get(&entry.full_path)
            .cloned()
            .ok_or_else(|| not_found(&entry.full_path))?;
        Ok(Box::new(io::Cursor::new(content)))
    }

    async fn open_writer(&self, entry: &Entry) -> io::Result<EntryWriter> {
        self.count();
        {
            let mut tree = self.lock();
            if tree.dirs.contains(&entry.full_path) {
                return Err(io::Error::new(
                    io::ErrorKind::IsADirectory,
                    format!("{} is a directory", entry.full_path.display()),
                ));
            }
            tree.add_parents(&entry.full_path);
            tree.files.insert(entry.full_path.clone(), Vec::new());
        }
        Ok(Box::new(MemoryWriter {
            fs: self.clone(),
            path: entry.full_path.clone(),
        }))
    }
}

/// 追加写入内存文件
struct MemoryWriter {
    fs: MemoryFileSystem,
    path: PathBuf,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut tree = self.fs.lock();
        match tree.files.get_mut(&self.path) {
            Some(content) => {
                content.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            // 写入过程中文件被删除
            None => Poll::Ready(Err(not_found(&self.path))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_write_then_read() {
        let fs = MemoryFileSystem::new();
        let entry = fs.create(Path::new("/root/robots.txt")).await.unwrap();
        assert_eq!(entry.name, "robots.txt");

        let mut writer = fs.open_writer(&entry).await.unwrap();
        writer.write_all(b"User-agent: *").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut reader = fs.open_reader(&entry).await.unwrap();
        let mut content = Vec::new();
        reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"User-agent: *");
        assert!(fs.resolve(Path::new("/root")).await.unwrap().is_directory);
        assert_eq!(fs.operations(), 4);
    }

    #[tokio::test]
    async fn test_create_under_file_fails() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/a.txt", Vec::new());
        assert!(fs.create(Path::new("/a.txt/b.txt")).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_non_empty_dir_fails() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/dir/a.txt", Vec::new());
        let entry = fs.resolve(Path::new("/dir")).await.unwrap();
        let err = fs.remove(&entry).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::DirectoryNotEmpty);
    }
}
