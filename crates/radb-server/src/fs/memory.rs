//! In-memory filesystem implementation.
//!
//! Keeps a simple file tree behind a mutex. Useful for tests and for
//! embedders that serve synthetic content over the sync protocol.

use std::collections::HashMap;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use radb_core::error::Result;

use super::{Dirent, FileReader, FileStat, FileSystem, FileWriter};

const DIR_TYPE: u32 = 0o040000;
const FILE_TYPE: u32 = 0o100000;

fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

fn not_found(path: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("no such file or directory: {path}"),
    )
}

fn not_a_directory(path: &str) -> std::io::Error {
    std::io::Error::other(format!("not a directory: {path}"))
}

fn is_a_directory(path: &str) -> std::io::Error {
    std::io::Error::other(format!("is a directory: {path}"))
}

#[derive(Debug, Clone)]
enum Node {
    Dir {
        mode: u32,
        mtime: u32,
        children: HashMap<String, Node>,
    },
    File {
        mode: u32,
        mtime: u32,
        data: Vec<u8>,
    },
}

impl Node {
    fn dir() -> Self {
        Node::Dir {
            mode: DIR_TYPE | 0o755,
            mtime: now_secs(),
            children: HashMap::new(),
        }
    }

    fn stat(&self) -> FileStat {
        match self {
            Node::Dir { mode, mtime, .. } => FileStat {
                mode: *mode,
                size: 0,
                mtime: *mtime,
            },
            Node::File { mode, mtime, data } => FileStat {
                mode: *mode,
                size: data.len().min(u32::MAX as usize) as u32,
                mtime: *mtime,
            },
        }
    }
}

pub struct MemoryFileSystem {
    root: Arc<Mutex<Node>>,
    auto_create: bool,
}

impl MemoryFileSystem {
    /// Empty tree; missing parent directories are created on write.
    pub fn new() -> Self {
        Self {
            root: Arc::new(Mutex::new(Node::dir())),
            auto_create: true,
        }
    }

    /// Require parent directories to exist before a file can be written.
    pub fn strict() -> Self {
        Self {
            root: Arc::new(Mutex::new(Node::dir())),
            auto_create: false,
        }
    }
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn split(path: &str) -> Vec<String> {
    path.replace('\\', "/")
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .map(str::to_owned)
        .collect()
}

fn lookup<'a>(root: &'a Node, path: &str) -> std::io::Result<&'a Node> {
    let mut current = root;
    for part in split(path) {
        let Node::Dir { children, .. } = current else {
            return Err(not_a_directory(path));
        };
        current = children.get(&part).ok_or_else(|| not_found(path))?;
    }
    Ok(current)
}

/// Walk to a node, optionally creating missing intermediate directories.
fn lookup_mut<'a>(root: &'a mut Node, path: &str, create: bool) -> std::io::Result<&'a mut Node> {
    let mut current = root;
    for part in split(path) {
        let Node::Dir { children, .. } = current else {
            return Err(not_a_directory(path));
        };
        if !children.contains_key(&part) {
            if !create {
                return Err(not_found(path));
            }
            children.insert(part.clone(), Node::dir());
        }
        current = children.get_mut(&part).unwrap();
    }
    Ok(current)
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        let root = self.root.lock().unwrap();
        match lookup(&root, path) {
            Ok(node) => Ok(Some(node.stat())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<Dirent>> {
        let root = self.root.lock().unwrap();
        let node = lookup(&root, path)?;
        let Node::Dir { children, .. } = node else {
            return Err(not_a_directory(path).into());
        };
        Ok(children
            .iter()
            .map(|(name, child)| {
                let stat = child.stat();
                Dirent {
                    name: name.clone(),
                    mode: stat.mode,
                    size: stat.size,
                    mtime: stat.mtime,
                }
            })
            .collect())
    }

    async fn open_for_read(&self, path: &str) -> Result<FileReader> {
        let root = self.root.lock().unwrap();
        match lookup(&root, path)? {
            Node::File { data, .. } => Ok(Box::new(Cursor::new(data.clone())) as FileReader),
            Node::Dir { .. } => Err(is_a_directory(path).into()),
        }
    }

    async fn open_for_write(&self, path: &str, mode: u32) -> Result<FileWriter> {
        let parts = split(path);
        let Some((_name, parents)) = parts.split_last() else {
            return Err(is_a_directory(path).into());
        };

        {
            let mut root = self.root.lock().unwrap();
            let parent_path = parents.join("/");
            let parent = lookup_mut(&mut root, &parent_path, self.auto_create)?;
            let Node::Dir { children, .. } = parent else {
                return Err(not_a_directory(path).into());
            };
            if let Some(Node::Dir { .. }) = children.get(parts.last().unwrap()) {
                return Err(is_a_directory(path).into());
            }
        }

        Ok(Box::new(MemoryWriter {
            root: Arc::clone(&self.root),
            path: path.to_owned(),
            mode,
            buf: Vec::new(),
            committed: false,
        }) as FileWriter)
    }

    async fn set_mtime(&self, path: &str, mtime: u32) -> Result<()> {
        let mut root = self.root.lock().unwrap();
        let node = lookup_mut(&mut root, path, false)?;
        match node {
            Node::Dir { mtime: m, .. } | Node::File { mtime: m, .. } => *m = mtime,
        }
        Ok(())
    }

    async fn makedirs(&self, path: &str) -> Result<()> {
        let mut root = self.root.lock().unwrap();
        let node = lookup_mut(&mut root, path, true)?;
        if matches!(node, Node::File { .. }) {
            return Err(not_a_directory(path).into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFileSystem")
            .field("auto_create", &self.auto_create)
            .finish()
    }
}

/// Buffering writer that commits its content into the tree on shutdown.
struct MemoryWriter {
    root: Arc<Mutex<Node>>,
    path: String,
    mode: u32,
    buf: Vec<u8>,
    committed: bool,
}

impl MemoryWriter {
    fn commit(&mut self) -> std::io::Result<()> {
        if self.committed {
            return Ok(());
        }
        self.committed = true;

        let parts = split(&self.path);
        let (name, parents) = parts.split_last().ok_or_else(|| is_a_directory(&self.path))?;

        let mut root = self.root.lock().unwrap();
        let parent = lookup_mut(&mut root, &parents.join("/"), true)?;
        let Node::Dir { children, .. } = parent else {
            return Err(not_a_directory(&self.path));
        };
        children.insert(
            name.clone(),
            Node::File {
                mode: FILE_TYPE | (self.mode & 0o777),
                mtime: now_secs(),
                data: std::mem::take(&mut self.buf),
            },
        );
        Ok(())
    }
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Ready(self.commit())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        let _ = self.commit();
    }
}
