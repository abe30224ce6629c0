use super::{Entry, EntryReader, EntryWriter, FileSystem};
use async_trait::async_trait;
use log::debug;
use std::io;
use std::path::Path;
use tokio::fs::{self, File, OpenOptions};

/// 基于 `tokio::fs` 的文件系统
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn resolve(&self, path: &Path) -> io::Result<Entry> {
        let metadata = fs::metadata(path).await?;
        let size = if metadata.is_dir() { 0 } else { metadata.len() };
        Ok(Entry::new(path, metadata.is_dir(), size))
    }

    async fn create(&self, path: &Path) -> io::Result<Entry> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        File::create(path).await?;
        debug!("Created {:?}", path);
        Ok(Entry::new(path, false, 0))
    }

    async fn remove(&self, entry: &Entry) -> io::Result<()> {
        if entry.is_directory {
            fs::remove_dir(&entry.full_path).await
        } else {
            fs::remove_file(&entry.full_path).await
        }
    }

    async fn remove_recursively(&self, entry: &Entry) -> io::Result<()> {
        fs::remove_dir_all(&entry.full_path).await
    }

    async fn open_reader(&self, entry: &Entry) -> io::Result<EntryReader> {
        let file = File::open(&entry.full_path).await?;
        Ok(Box::new(file))
    }

    async fn open_writer(&self, entry: &Entry) -> io::Result<EntryWriter> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&entry.full_path)
            .await?;
        Ok(Box::new(file))
    }
}
