//! Filesystem operations.
//!
//! The request surface the VFS bridge calls into: attribute query,
//! directory read, file read/write/truncate, create/remove, rename, utime.
//! Each operation composes tree primitives with capacity reservations and
//! records timestamps. Reservation always precedes mutation, so every
//! error path leaves the tree and the accountant consistent.

use std::cmp;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::capacity::{Capacity, NODE_COST};
use crate::error::FsError;
use crate::tree::{resolve, resolve_mut, split_path, Node, NodeAttr, NodeKind, NAME_MAX};

/// One readdir entry. `.` and `..` are the bridge's job.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
}

/// The in-memory filesystem: the tree root plus the byte budget.
///
/// Mutated only inside operation calls; callers (the FUSE dispatch loop)
/// present one operation at a time.
#[derive(Debug)]
pub struct RamFs {
    root: Node,
    capacity: Capacity,
}

impl RamFs {
    /// An empty tree over a fresh budget of `capacity` bytes.
    pub fn new(capacity: u64) -> Self {
        RamFs {
            root: Node::new_root(now_secs()),
            capacity: Capacity::new(capacity),
        }
    }

    /// Reassemble from decoded parts. Snapshot decoder only.
    pub(crate) fn from_parts(root: Node, capacity: Capacity) -> Self {
        RamFs { root, capacity }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn capacity(&self) -> u64 {
        self.capacity.total()
    }

    pub fn free_bytes(&self) -> u64 {
        self.capacity.free()
    }

    /// Resolve `path` and return its kind and attributes.
    pub fn getattr(&self, path: &str) -> Result<(NodeKind, NodeAttr), FsError> {
        let node = resolve(&self.root, path).ok_or(FsError::NotFound)?;
        Ok((node.kind(), node.attr))
    }

    /// Resolve `path`; it must be a directory.
    pub fn opendir(&self, path: &str) -> Result<(), FsError> {
        let node = resolve(&self.root, path).ok_or(FsError::NotFound)?;
        if !node.is_dir() {
            return Err(FsError::NotDir);
        }
        Ok(())
    }

    /// List the directory's children in sibling order and update its atime.
    pub fn readdir(&mut self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let now = now_secs();
        let node = resolve_mut(&mut self.root, path).ok_or(FsError::NotFound)?;
        if !node.is_dir() {
            return Err(FsError::NotDir);
        }
        let entries = node
            .children()
            .iter()
            .map(|c| DirEntry {
                name: c.name().to_string(),
                kind: c.kind(),
            })
            .collect();
        node.attr.atime = now;
        Ok(entries)
    }

    /// Resolve `path`. No mode check; the caller's open flags are its own
    /// business.
    pub fn open(&self, path: &str) -> Result<(), FsError> {
        resolve(&self.root, path).ok_or(FsError::NotFound)?;
        Ok(())
    }

    /// Copy up to `size` bytes starting at `offset`. Reads past EOF return
    /// an empty buffer; reads near EOF are clamped. atime is untouched.
    pub fn read(&self, path: &str, offset: u64, size: usize) -> Result<Vec<u8>, FsError> {
        let node = resolve(&self.root, path).ok_or(FsError::NotFound)?;
        if node.is_dir() {
            return Err(FsError::IsDir);
        }
        let len = node.attr.size;
        if offset >= len {
            return Ok(Vec::new());
        }
        let Some(payload) = node.payload() else {
            return Ok(Vec::new());
        };
        let end = cmp::min(offset + size as u64, len) as usize;
        Ok(payload[offset as usize..end].to_vec())
    }

    /// Write `data` at `offset`, growing the payload as needed.
    ///
    /// Growth is reserved before any byte moves; the coarse
    /// `data.len() > free` check fast-fails without touching the file.
    /// Writes to an empty file always land at offset 0 regardless of the
    /// requested offset, and writes past EOF are clamped back to EOF —
    /// the payload never contains holes.
    pub fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        let node = resolve_mut(&mut self.root, path).ok_or(FsError::NotFound)?;
        if node.is_dir() {
            return Err(FsError::IsDir);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let n = data.len() as u64;
        if n > self.capacity.free() {
            return Err(FsError::OutOfSpace);
        }

        let len = node.attr.size;
        let mut off = offset;
        if len == 0 {
            self.capacity.reserve(n)?;
            off = 0;
            node.set_payload(data.to_vec());
        } else if off + n > len {
            if off > len {
                off = len;
            }
            self.capacity.reserve(off + n - len)?;
            node.splice_payload(off as usize, data);
        } else {
            node.splice_payload(off as usize, data);
        }
        node.attr.size = cmp::max(len, off + n);
        node.touch(now_secs());
        Ok(data.len())
    }

    /// Resize the payload to exactly `size` bytes, zero-filling any new
    /// tail. A no-op when the size already matches.
    pub fn truncate(&mut self, path: &str, size: u64) -> Result<(), FsError> {
        let node = resolve_mut(&mut self.root, path).ok_or(FsError::NotFound)?;
        if node.is_dir() {
            return Err(FsError::IsDir);
        }
        let old = node.attr.size;
        if size == old {
            return Ok(());
        }
        if size == 0 {
            node.clear_payload();
            self.capacity.release(old);
        } else if size > old {
            self.capacity.reserve(size - old)?;
            node.resize_payload(size as usize);
        } else {
            self.capacity.release(old - size);
            node.resize_payload(size as usize);
        }
        node.attr.size = size;
        node.touch(now_secs());
        Ok(())
    }

    /// Create an empty regular file owned by `uid`/`gid`.
    pub fn create(&mut self, path: &str, uid: u32, gid: u32) -> Result<(), FsError> {
        let now = now_secs();
        let name = self.prepare_entry(path)?;
        let parent = match resolve_mut(&mut self.root, split_path(path).0) {
            Some(p) => p,
            None => return Err(FsError::NotFound),
        };
        self.capacity.reserve(NODE_COST)?;
        parent.insert_child(Node::new_file(name, uid, gid, now), now);
        Ok(())
    }

    /// Create an empty directory owned by `uid`/`gid`.
    pub fn mkdir(&mut self, path: &str, uid: u32, gid: u32) -> Result<(), FsError> {
        let now = now_secs();
        let name = self.prepare_entry(path)?;
        let parent = match resolve_mut(&mut self.root, split_path(path).0) {
            Some(p) => p,
            None => return Err(FsError::NotFound),
        };
        self.capacity.reserve(NODE_COST)?;
        parent.insert_child(Node::new_dir(name, uid, gid, now), now);
        Ok(())
    }

    /// Validate a create/mkdir target and return the leaf name.
    fn prepare_entry<'a>(&self, path: &'a str) -> Result<&'a str, FsError> {
        if resolve(&self.root, path).is_some() {
            return Err(FsError::Exists);
        }
        let (parent_path, name) = split_path(path);
        if name.is_empty() {
            return Err(FsError::NotFound);
        }
        if name.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        match resolve(&self.root, parent_path) {
            Some(p) if p.is_dir() => Ok(name),
            _ => Err(FsError::NotFound),
        }
    }

    /// Remove a file, freeing its payload and node charge.
    pub fn unlink(&mut self, path: &str) -> Result<(), FsError> {
        let node = resolve(&self.root, path).ok_or(FsError::NotFound)?;
        if node.is_dir() {
            return Err(FsError::IsDir);
        }
        let size = node.attr.size;
        let (parent_path, name) = split_path(path);
        let now = now_secs();
        if let Some(parent) = resolve_mut(&mut self.root, parent_path) {
            if parent.detach_child(name, now).is_some() {
                self.capacity.release(NODE_COST + size);
                return Ok(());
            }
        }
        Err(FsError::NotFound)
    }

    /// Remove an empty directory.
    pub fn rmdir(&mut self, path: &str) -> Result<(), FsError> {
        let node = resolve(&self.root, path).ok_or(FsError::NotFound)?;
        if !node.is_dir() {
            return Err(FsError::NotDir);
        }
        if !node.children().is_empty() {
            return Err(FsError::NotEmpty);
        }
        let (parent_path, name) = split_path(path);
        if name.is_empty() {
            // the root itself
            return Err(FsError::NotFound);
        }
        let now = now_secs();
        if let Some(parent) = resolve_mut(&mut self.root, parent_path) {
            if parent.detach_child(name, now).is_some() {
                self.capacity.release(NODE_COST);
                return Ok(());
            }
        }
        Err(FsError::NotFound)
    }

    /// Move `from` to `to`, replacing an existing file or empty directory
    /// at the destination.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), FsError> {
        if resolve(&self.root, from).is_none() {
            return Err(FsError::NotFound);
        }
        if from.trim_end_matches('/') == to.trim_end_matches('/') {
            return Ok(());
        }
        // A directory cannot move underneath itself.
        if to.strip_prefix(from).is_some_and(|rest| rest.starts_with('/')) {
            return Err(FsError::NotFound);
        }
        let (from_parent, from_name) = split_path(from);
        let (to_parent, new_name) = split_path(to);
        if from_name.is_empty() || new_name.is_empty() {
            return Err(FsError::NotFound);
        }
        if new_name.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }

        // An existing destination is replaced, directories only when empty.
        match resolve(&self.root, to) {
            Some(node) if node.is_dir() => {
                if !node.children().is_empty() {
                    return Err(FsError::NotEmpty);
                }
                self.rmdir(to)?;
            }
            Some(_) => self.unlink(to)?,
            None => match resolve(&self.root, to_parent) {
                Some(p) if p.is_dir() => {}
                _ => return Err(FsError::NotFound),
            },
        }

        let now = now_secs();
        let src = resolve_mut(&mut self.root, from_parent)
            .and_then(|parent| parent.detach_child(from_name, now));
        let Some(mut src) = src else {
            return Err(FsError::NotFound);
        };
        src.name = new_name.to_string();
        src.attr.ctime = now;

        match resolve_mut(&mut self.root, to_parent) {
            Some(dst) if dst.is_dir() => {
                dst.insert_child(src, now);
                Ok(())
            }
            _ => {
                // Destination parent vanished with the detach; put the
                // source back where it was rather than strand the subtree.
                src.name = from_name.to_string();
                if let Some(parent) = resolve_mut(&mut self.root, from_parent) {
                    parent.insert_child(src, now);
                }
                Err(FsError::NotFound)
            }
        }
    }

    /// Accepted and ignored, like the reference behavior.
    pub fn utime(&self, _path: &str) -> Result<(), FsError> {
        Ok(())
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
