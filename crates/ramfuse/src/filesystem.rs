//! fuser::Filesystem implementation for the ramdisk.
//!
//! Translates kernel callbacks into path-addressed operations on the core:
//! - Read path: lookup, getattr, opendir, readdir, open, read, statfs
//! - Write path: write, create, mkdir, unlink, rmdir, rename, setattr
//! - Lifecycle: destroy writes the snapshot when a path is configured
//!
//! The dispatch loop presents one request at a time and the core tolerates
//! no interleaved mutation, so handlers run inline and `RamdiskFs` owns the
//! core directly. POSIX niceties the core does not enforce (permissions,
//! O_TRUNC, file descriptors) are the kernel's and libfuse's business.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};

use ramcore::{snapshot, NodeAttr, NodeKind, RamFs, NAME_MAX, NODE_COST};

use crate::inode::InodeTable;

/// Kernel metadata cache TTL. All mutations go through this daemon, so the
/// kernel invalidates on its own mutating ops and a short TTL suffices.
const TTL: Duration = Duration::from_secs(1);
const BLOCK_SIZE: u32 = 512;

/// The FUSE filesystem serving one in-memory tree.
pub struct RamdiskFs {
    /// The core: tree plus capacity accountant
    fs: RamFs,
    /// Path <-> inode table
    inodes: InodeTable,
    /// Where to write the shutdown snapshot, if anywhere
    snapshot_path: Option<PathBuf>,
}

impl RamdiskFs {
    pub fn new(fs: RamFs, snapshot_path: Option<PathBuf>) -> Self {
        RamdiskFs {
            fs,
            inodes: InodeTable::new(),
            snapshot_path,
        }
    }

    /// Resolve an inode to its path, cloned out of the table so the
    /// borrow does not outlive the lookup.
    fn path_of(&self, ino: u64) -> Option<String> {
        self.inodes.get_path(ino).map(|s| s.to_string())
    }

    /// Stat a path and build the kernel-facing attribute record.
    fn attr_for_path(&mut self, path: &str) -> Result<FileAttr, i32> {
        match self.fs.getattr(path) {
            Ok((kind, attr)) => {
                let ino = self.inodes.get_or_create(path);
                Ok(to_file_attr(ino, kind, &attr))
            }
            Err(e) => Err(e.errno()),
        }
    }

    /// Apply the inode-table side of a successful rename: the replaced
    /// target's mapping dies, the source's moves. A same-path rename is a
    /// no-op in the core and must not drop the source's own entry.
    fn track_rename(&mut self, old_path: &str, new_path: &str) {
        if old_path == new_path {
            return;
        }
        self.inodes.remove(new_path);
        self.inodes.rename(old_path, new_path);
    }
}

impl Filesystem for RamdiskFs {
    fn init(&mut self, _req: &Request, config: &mut KernelConfig) -> Result<(), libc::c_int> {
        let _ = config.set_max_write(1_048_576);
        let _ = config.set_max_readahead(1_048_576);
        Ok(())
    }

    fn destroy(&mut self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        match snapshot::save(&self.fs, path) {
            Ok(()) => tracing::info!("snapshot written to {:?}", path),
            Err(e) => tracing::error!("failed to write snapshot to {:?}: {e}", path),
        }
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, &name.to_string_lossy());
        match self.attr_for_path(&path) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.attr_for_path(&path) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        if let Some(new_size) = size {
            if let Err(e) = self.fs.truncate(&path, new_size) {
                reply.error(e.errno());
                return;
            }
        }
        // Timestamp updates are accepted and ignored.
        let _ = self.fs.utime(&path);

        match self.attr_for_path(&path) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.opendir(&path) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let children = match self.fs.readdir(&path) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let parent_ino = if path.is_empty() {
            1
        } else {
            self.inodes.get_or_create(parent_of(&path))
        };

        let mut entries: Vec<(u64, FileType, String)> = Vec::with_capacity(children.len() + 2);
        entries.push((ino, FileType::Directory, ".".to_string()));
        entries.push((parent_ino, FileType::Directory, "..".to_string()));
        for entry in children {
            let child_ino = self.inodes.get_or_create(&child_path(&path, &entry.name));
            entries.push((child_ino, file_type(entry.kind), entry.name));
        }

        for (i, (ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(*ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }

        reply.ok();
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.open(&path) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.read(&path, offset as u64, size as usize) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.write(&path, offset as u64, data) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, &name.to_string_lossy());
        if let Err(e) = self.fs.create(&path, req.uid(), req.gid()) {
            reply.error(e.errno());
            return;
        }
        match self.attr_for_path(&path) {
            Ok(attr) => reply.created(&TTL, &attr, 0, 0, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, &name.to_string_lossy());
        if let Err(e) = self.fs.mkdir(&path, req.uid(), req.gid()) {
            reply.error(e.errno());
            return;
        }
        match self.attr_for_path(&path) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, &name.to_string_lossy());
        match self.fs.unlink(&path) {
            Ok(()) => {
                self.inodes.remove(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, &name.to_string_lossy());
        match self.fs.rmdir(&path) {
            Ok(()) => {
                self.inodes.remove(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(parent_path), Some(new_parent_path)) =
            (self.path_of(parent), self.path_of(newparent))
        else {
            reply.error(libc::ENOENT);
            return;
        };
        let old_path = child_path(&parent_path, &name.to_string_lossy());
        let new_path = child_path(&new_parent_path, &newname.to_string_lossy());
        match self.fs.rename(&old_path, &new_path) {
            Ok(()) => {
                self.track_rename(&old_path, &new_path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        let total = self.fs.capacity();
        let free = self.fs.free_bytes();
        reply.statfs(
            total / u64::from(BLOCK_SIZE),
            free / u64::from(BLOCK_SIZE),
            free / u64::from(BLOCK_SIZE),
            0,
            free / NODE_COST,
            BLOCK_SIZE,
            NAME_MAX as u32,
            BLOCK_SIZE,
        );
    }
}

/// Join a parent path and a child name; the root's path is empty.
fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// The parent of a relative path (empty for top-level entries).
fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::Directory => FileType::Directory,
        NodeKind::File => FileType::RegularFile,
    }
}

fn to_file_attr(ino: u64, kind: NodeKind, attr: &NodeAttr) -> FileAttr {
    FileAttr {
        ino,
        size: attr.size,
        blocks: (attr.size + u64::from(BLOCK_SIZE) - 1) / u64::from(BLOCK_SIZE),
        atime: system_time(attr.atime),
        mtime: system_time(attr.mtime),
        ctime: system_time(attr.ctime),
        crtime: system_time(attr.ctime),
        kind: file_type(kind),
        perm: (attr.mode & 0o7777) as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

fn system_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH
    }
}
