//! FUSE bridge for the in-memory ramdisk.
//!
//! Wires the core filesystem to the kernel: a `fuser::Filesystem`
//! implementation, the path/inode table, and the mount lifecycle
//! (snapshot restore on startup, blocking serve, snapshot write on
//! unmount).

pub mod filesystem;
pub mod inode;

use std::path::PathBuf;

use anyhow::{Context, Result};
use fuser::MountOption;

use ramcore::{snapshot, RamFs};

use crate::filesystem::RamdiskFs;

/// Owns the mount lifecycle for one ramdisk.
pub struct MountController {
    /// Mount point path
    mount_point: PathBuf,
    /// Byte budget for the tree
    capacity: u64,
    /// Snapshot file: decoded on startup when readable, written on unmount
    snapshot_path: Option<PathBuf>,
}

impl MountController {
    pub fn new(mount_point: PathBuf, capacity: u64, snapshot_path: Option<PathBuf>) -> Self {
        MountController {
            mount_point,
            capacity,
            snapshot_path,
        }
    }

    /// Mount and serve until unmounted.
    ///
    /// A configured snapshot path that cannot be read (missing file, short
    /// file) is not an error: the tree starts empty and the path is kept
    /// for the shutdown write.
    pub fn run(self) -> Result<()> {
        let fs = match &self.snapshot_path {
            Some(path) => match snapshot::load(path, self.capacity) {
                Ok(fs) => {
                    tracing::info!(
                        "restored snapshot from {:?} ({} of {} bytes free)",
                        path,
                        fs.free_bytes(),
                        fs.capacity()
                    );
                    fs
                }
                Err(e) => {
                    tracing::info!("no usable snapshot at {:?} ({e}); starting empty", path);
                    RamFs::new(self.capacity)
                }
            },
            None => RamFs::new(self.capacity),
        };

        std::fs::create_dir_all(&self.mount_point)
            .with_context(|| format!("failed to create mount point {:?}", self.mount_point))?;

        let options = vec![MountOption::FSName("ramdisk".to_string())];
        tracing::info!(
            "mounting ramdisk at {:?} ({} MiB)",
            self.mount_point,
            self.capacity >> 20
        );
        fuser::mount2(
            RamdiskFs::new(fs, self.snapshot_path.clone()),
            &self.mount_point,
            &options,
        )
        .with_context(|| format!("failed to mount FUSE at {:?}", self.mount_point))?;
        tracing::info!("unmounted from {:?}", self.mount_point);
        Ok(())
    }
}
