//! In-memory filesystem core for the ramdisk.
//!
//! A POSIX-like directory tree backed entirely by volatile memory and
//! bounded by a single byte budget. The crate knows nothing about FUSE:
//! the VFS bridge issues path-addressed operations against [`RamFs`] and
//! maps [`FsError`] to errno values at its own boundary. The snapshot
//! codec round-trips the whole tree through a flat byte stream so a mount
//! can persist on shutdown and restore on the next startup.

pub mod capacity;
pub mod error;
pub mod fs;
pub mod snapshot;
pub mod tree;

pub use capacity::NODE_COST;
pub use error::FsError;
pub use fs::{DirEntry, RamFs};
pub use tree::{NodeAttr, NodeKind, NAME_MAX};
