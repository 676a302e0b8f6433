//! The in-memory reference backend and boot root filesystem.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::FileSystem;
use crate::FileType;
use crate::Metadata;
use crate::Result;
use crate::VfsError;
use crate::path;

type NodeId = u64;

const ROOT_ID: NodeId = 0;

#[derive(Debug)]
enum NodeKind {
    File { data: Vec<u8> },
    Dir { children: BTreeMap<String, NodeId> },
    Symlink { target: String },
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    mode: u32,
    uid: u32,
    gid: u32,
    mtime: SystemTime,
}

impl Node {
    fn file_type(&self) -> FileType {
        match self.kind {
            NodeKind::File { .. } => FileType::File,
            NodeKind::Dir { .. } => FileType::Directory,
            NodeKind::Symlink { .. } => FileType::Symlink,
        }
    }

    fn metadata(&self) -> Metadata {
        let size = match &self.kind {
            NodeKind::File { data } => data.len() as u64,
            NodeKind::Dir { .. } => 0,
            NodeKind::Symlink { target } => target.len() as u64,
        };
        let nlink = match &self.kind {
            NodeKind::Dir { .. } => 2,
            _ => 1,
        };
        Metadata {
            file_type: self.file_type(),
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            size,
            mtime: self.mtime,
            nlink,
        }
    }
}

#[derive(Debug)]
struct Store {
    nodes: HashMap<NodeId, Node>,
    next_id: NodeId,
}

impl Store {
    fn alloc(&mut self, node: Node) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, node);
        id
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(VfsError::NotFound)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(VfsError::NotFound)
    }

    /// Walks a canonical path to a node id without following symlinks.
    fn lookup(&self, p: &str) -> Result<NodeId> {
        let mut cur = ROOT_ID;
        for part in path::components(p) {
            let node = self.node(cur)?;
            let NodeKind::Dir { children } = &node.kind else {
                return Err(VfsError::NotADirectory);
            };
            cur = *children.get(part).ok_or(VfsError::NotFound)?;
        }
        Ok(cur)
    }

    /// Resolves the parent directory of `p` and the final component name.
    fn lookup_parent<'p>(&self, p: &'p str) -> Result<(NodeId, &'p str)> {
        let name = path::file_name(p);
        if name.is_empty() {
            return Err(VfsError::InvalidPath(p.to_string()));
        }
        let parent_id = self.lookup(path::parent(p))?;
        match &self.node(parent_id)?.kind {
            NodeKind::Dir { .. } => Ok((parent_id, name)),
            _ => Err(VfsError::NotADirectory),
        }
    }

    fn insert_child(&mut self, parent: NodeId, name: &str, node: Node) -> Result<NodeId> {
        match &self.node(parent)?.kind {
            NodeKind::Dir { children } if children.contains_key(name) => {
                return Err(VfsError::AlreadyExists);
            }
            NodeKind::Dir { .. } => {}
            _ => return Err(VfsError::NotADirectory),
        }
        let id = self.alloc(node);
        let parent_node = self.node_mut(parent)?;
        if let NodeKind::Dir { children } = &mut parent_node.kind {
            children.insert(name.to_string(), id);
            parent_node.mtime = SystemTime::now();
        }
        Ok(id)
    }
}

/// A tree of nodes held entirely in memory. This is both the reference
/// `FileSystem` implementation and the root filesystem the kernel boots on.
#[derive(Debug)]
pub struct MemFs {
    store: RwLock<Store>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_ID,
            Node {
                kind: NodeKind::Dir {
                    children: BTreeMap::new(),
                },
                mode: 0o755,
                uid: 0,
                gid: 0,
                mtime: SystemTime::now(),
            },
        );
        Self {
            store: RwLock::new(Store { nodes, next_id: 1 }),
        }
    }
}

#[async_trait]
impl FileSystem for MemFs {
    async fn lstat(&self, p: &str) -> Result<Metadata> {
        let store = self.store.read().await;
        let id = store.lookup(p)?;
        Ok(store.node(id)?.metadata())
    }

    async fn readlink(&self, p: &str) -> Result<String> {
        let store = self.store.read().await;
        let id = store.lookup(p)?;
        match &store.node(id)?.kind {
            NodeKind::Symlink { target } => Ok(target.clone()),
            _ => Err(VfsError::NotASymlink),
        }
    }

    async fn read_at(&self, p: &str, pos: u64, len: usize) -> Result<Bytes> {
        let store = self.store.read().await;
        let id = store.lookup(p)?;
        match &store.node(id)?.kind {
            NodeKind::File { data } => {
                let start = (pos as usize).min(data.len());
                let end = start.saturating_add(len).min(data.len());
                Ok(Bytes::copy_from_slice(&data[start..end]))
            }
            NodeKind::Dir { .. } => Err(VfsError::IsADirectory),
            NodeKind::Symlink { .. } => Err(VfsError::InvalidPath(p.to_string())),
        }
    }

    async fn write_at(&self, p: &str, pos: u64, data: &[u8], append: bool) -> Result<usize> {
        let mut store = self.store.write().await;
        let id = store.lookup(p)?;
        let node = store.node_mut(id)?;
        match &mut node.kind {
            NodeKind::File { data: content } => {
                let start = if append { content.len() } else { pos as usize };
                if start > content.len() {
                    content.resize(start, 0);
                }
                let overlap = (content.len() - start).min(data.len());
                content[start..start + overlap].copy_from_slice(&data[..overlap]);
                content.extend_from_slice(&data[overlap..]);
                node.mtime = SystemTime::now();
                Ok(data.len())
            }
            NodeKind::Dir { .. } => Err(VfsError::IsADirectory),
            NodeKind::Symlink { .. } => Err(VfsError::InvalidPath(p.to_string())),
        }
    }

    async fn truncate(&self, p: &str, len: u64) -> Result<()> {
        let mut store = self.store.write().await;
        let id = store.lookup(p)?;
        let node = store.node_mut(id)?;
        match &mut node.kind {
            NodeKind::File { data } => {
                data.resize(len as usize, 0);
                node.mtime = SystemTime::now();
                Ok(())
            }
            _ => Err(VfsError::IsADirectory),
        }
    }

    async fn create_file(&self, p: &str, mode: u32, uid: u32, gid: u32) -> Result<()> {
        let mut store = self.store.write().await;
        let (parent, name) = store.lookup_parent(p)?;
        store.insert_child(
            parent,
            name,
            Node {
                kind: NodeKind::File { data: Vec::new() },
                mode,
                uid,
                gid,
                mtime: SystemTime::now(),
            },
        )?;
        Ok(())
    }

    async fn mkdir(&self, p: &str, mode: u32, uid: u32, gid: u32) -> Result<()> {
        let mut store = self.store.write().await;
        let (parent, name) = store.lookup_parent(p)?;
        store.insert_child(
            parent,
            name,
            Node {
                kind: NodeKind::Dir {
                    children: BTreeMap::new(),
                },
                mode,
                uid,
                gid,
                mtime: SystemTime::now(),
            },
        )?;
        Ok(())
    }

    async fn rmdir(&self, p: &str) -> Result<()> {
        let mut store = self.store.write().await;
        let (parent, name) = store.lookup_parent(p)?;
        let id = store.lookup(p)?;
        match &store.node(id)?.kind {
            NodeKind::Dir { children } if !children.is_empty() => {
                return Err(VfsError::DirectoryNotEmpty);
            }
            NodeKind::Dir { .. } => {}
            _ => return Err(VfsError::NotADirectory),
        }
        if let NodeKind::Dir { children } = &mut store.node_mut(parent)?.kind {
            children.remove(name);
        }
        store.nodes.remove(&id);
        Ok(())
    }

    async fn unlink(&self, p: &str) -> Result<()> {
        let mut store = self.store.write().await;
        let (parent, name) = store.lookup_parent(p)?;
        let id = store.lookup(p)?;
        if matches!(store.node(id)?.kind, NodeKind::Dir { .. }) {
            return Err(VfsError::IsADirectory);
        }
        if let NodeKind::Dir { children } = &mut store.node_mut(parent)?.kind {
            children.remove(name);
        }
        store.nodes.remove(&id);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut store = self.store.write().await;
        let id = store.lookup(from)?;
        let (from_parent, from_name) = store.lookup_parent(from)?;
        let (to_parent, to_name) = store.lookup_parent(to)?;

        // Replace an existing non-directory destination, as rename(2) does.
        if let Ok(existing) = store.lookup(to) {
            if matches!(store.node(existing)?.kind, NodeKind::Dir { .. }) {
                return Err(VfsError::IsADirectory);
            }
            if let NodeKind::Dir { children } = &mut store.node_mut(to_parent)?.kind {
                children.remove(to_name);
            }
            store.nodes.remove(&existing);
        }

        if let NodeKind::Dir { children } = &mut store.node_mut(from_parent)?.kind {
            children.remove(from_name);
        }
        if let NodeKind::Dir { children } = &mut store.node_mut(to_parent)?.kind {
            children.insert(to_name.to_string(), id);
        }
        Ok(())
    }

    async fn readdir(&self, p: &str) -> Result<Vec<String>> {
        let store = self.store.read().await;
        let id = store.lookup(p)?;
        match &store.node(id)?.kind {
            NodeKind::Dir { children } => Ok(children.keys().cloned().collect()),
            _ => Err(VfsError::NotADirectory),
        }
    }

    async fn symlink(&self, target: &str, p: &str, uid: u32, gid: u32) -> Result<()> {
        let mut store = self.store.write().await;
        let (parent, name) = store.lookup_parent(p)?;
        store.insert_child(
            parent,
            name,
            Node {
                kind: NodeKind::Symlink {
                    target: target.to_string(),
                },
                mode: 0o777,
                uid,
                gid,
                mtime: SystemTime::now(),
            },
        )?;
        Ok(())
    }

    async fn chmod(&self, p: &str, mode: u32) -> Result<()> {
        let mut store = self.store.write().await;
        let id = store.lookup(p)?;
        store.node_mut(id)?.mode = mode & 0o777;
        Ok(())
    }

    async fn chown(&self, p: &str, uid: u32, gid: u32) -> Result<()> {
        let mut store = self.store.write().await;
        let id = store.lookup(p)?;
        let node = store.node_mut(id)?;
        node.uid = uid;
        node.gid = gid;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn create_write_read_roundtrip() {
        let fs = MemFs::new();
        fs.create_file("/hello", 0o644, 0, 0).await.expect("create");
        fs.write_at("/hello", 0, b"hi there", false)
            .await
            .expect("write");
        let bytes = fs.read_at("/hello", 3, 16).await.expect("read");
        assert_eq!(&bytes[..], b"there");
    }

    #[tokio::test]
    async fn sparse_write_zero_fills() {
        let fs = MemFs::new();
        fs.create_file("/f", 0o644, 0, 0).await.expect("create");
        fs.write_at("/f", 4, b"x", false).await.expect("write");
        let bytes = fs.read_at("/f", 0, 16).await.expect("read");
        assert_eq!(&bytes[..], &[0, 0, 0, 0, b'x']);
    }

    #[tokio::test]
    async fn append_ignores_position() {
        let fs = MemFs::new();
        fs.create_file("/log", 0o644, 0, 0).await.expect("create");
        fs.write_at("/log", 0, b"one", false).await.expect("write");
        fs.write_at("/log", 0, b"two", true).await.expect("append");
        let bytes = fs.read_at("/log", 0, 16).await.expect("read");
        assert_eq!(&bytes[..], b"onetwo");
    }

    #[tokio::test]
    async fn rmdir_refuses_non_empty() {
        let fs = MemFs::new();
        fs.mkdir("/d", 0o755, 0, 0).await.expect("mkdir");
        fs.create_file("/d/f", 0o644, 0, 0).await.expect("create");
        assert_eq!(fs.rmdir("/d").await, Err(VfsError::DirectoryNotEmpty));
        fs.unlink("/d/f").await.expect("unlink");
        fs.rmdir("/d").await.expect("rmdir");
        assert_eq!(fs.lstat("/d").await, Err(VfsError::NotFound));
    }

    #[tokio::test]
    async fn readdir_is_sorted() {
        let fs = MemFs::new();
        for name in ["zeta", "alpha", "mid"] {
            fs.create_file(&format!("/{name}"), 0o644, 0, 0)
                .await
                .expect("create");
        }
        assert_eq!(
            fs.readdir("/").await.expect("readdir"),
            vec!["alpha", "mid", "zeta"]
        );
    }

    #[tokio::test]
    async fn readlink_on_regular_file_is_an_error() {
        let fs = MemFs::new();
        fs.create_file("/f", 0o644, 0, 0).await.expect("create");
        assert_eq!(fs.readlink("/f").await, Err(VfsError::NotASymlink));
        fs.symlink("/f", "/link", 0, 0).await.expect("symlink");
        assert_eq!(fs.readlink("/link").await.expect("readlink"), "/f");
    }

    #[tokio::test]
    async fn rename_replaces_destination_file() {
        let fs = MemFs::new();
        fs.create_file("/a", 0o644, 0, 0).await.expect("create");
        fs.write_at("/a", 0, b"A", false).await.expect("write");
        fs.create_file("/b", 0o644, 0, 0).await.expect("create");
        fs.rename("/a", "/b").await.expect("rename");
        assert_eq!(fs.lstat("/a").await, Err(VfsError::NotFound));
        let bytes = fs.read_at("/b", 0, 4).await.expect("read");
        assert_eq!(&bytes[..], b"A");
    }
}
