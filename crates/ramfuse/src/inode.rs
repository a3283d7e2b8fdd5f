//! Inode table for the FUSE bridge.
//!
//! Maps tree paths to inode numbers and back. Paths are relative to the
//! mount root with no leading slash; the empty path is the root, which is
//! inode 1 by FUSE convention. Lookups are byte-exact.

use std::collections::HashMap;

/// Manages inode allocation and lookup.
#[derive(Debug)]
pub struct InodeTable {
    /// Path -> inode number
    path_to_inode: HashMap<String, u64>,
    /// Inode number -> path
    inode_to_path: HashMap<u64, String>,
    /// Next inode to allocate
    next_inode: u64,
}

impl InodeTable {
    /// Create a new inode table with root (inode 1) pre-allocated.
    pub fn new() -> Self {
        let mut table = InodeTable {
            path_to_inode: HashMap::new(),
            inode_to_path: HashMap::new(),
            next_inode: 2, // 1 is reserved for root
        };
        table.path_to_inode.insert(String::new(), 1);
        table.inode_to_path.insert(1, String::new());
        table
    }

    /// Get or allocate an inode for a path.
    pub fn get_or_create(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.path_to_inode.get(path) {
            return ino;
        }

        let ino = self.next_inode;
        self.next_inode += 1;
        self.path_to_inode.insert(path.to_string(), ino);
        self.inode_to_path.insert(ino, path.to_string());
        ino
    }

    /// Look up an inode by path.
    pub fn get_inode(&self, path: &str) -> Option<u64> {
        self.path_to_inode.get(path).copied()
    }

    /// Look up a path by inode.
    pub fn get_path(&self, inode: u64) -> Option<&str> {
        self.inode_to_path.get(&inode).map(|s| s.as_str())
    }

    /// Total number of allocated inodes.
    pub fn count(&self) -> usize {
        self.path_to_inode.len()
    }

    /// Drop the entry for a removed path. Inode numbers are never reused.
    pub fn remove(&mut self, path: &str) {
        if let Some(ino) = self.path_to_inode.remove(path) {
            self.inode_to_path.remove(&ino);
        }
    }

    /// Remap a path and everything under it, keeping inode numbers.
    ///
    /// Renaming a directory moves its whole subtree, so every entry with
    /// the old prefix is rewritten, not just the exact path.
    pub fn rename(&mut self, old_path: &str, new_path: &str) {
        if old_path.is_empty() {
            return;
        }
        let old_prefix = format!("{}/", old_path);
        let moved: Vec<(String, u64)> = self
            .path_to_inode
            .iter()
            .filter(|(p, _)| p.as_str() == old_path || p.starts_with(&old_prefix))
            .map(|(p, &ino)| (p.clone(), ino))
            .collect();

        for (path, ino) in moved {
            self.path_to_inode.remove(&path);
            let renamed = format!("{}{}", new_path, &path[old_path.len()..]);
            self.inode_to_path.insert(ino, renamed.clone());
            self.path_to_inode.insert(renamed, ino);
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_inode() {
        let table = InodeTable::new();
        assert_eq!(table.get_inode(""), Some(1));
        assert_eq!(table.get_path(1), Some(""));
    }

    #[test]
    fn test_allocate() {
        let mut table = InodeTable::new();
        let ino = table.get_or_create("d/file.txt");
        assert_eq!(ino, 2);
        assert_eq!(table.get_inode("d/file.txt"), Some(2));
        assert_eq!(table.get_path(2), Some("d/file.txt"));
    }

    #[test]
    fn test_dedup() {
        let mut table = InodeTable::new();
        let ino1 = table.get_or_create("d/file.txt");
        let ino2 = table.get_or_create("d/file.txt");
        assert_eq!(ino1, ino2);
    }

    #[test]
    fn test_case_sensitive() {
        let mut table = InodeTable::new();
        let ino1 = table.get_or_create("File");
        let ino2 = table.get_or_create("file");
        assert_ne!(ino1, ino2);
    }

    #[test]
    fn test_remove() {
        let mut table = InodeTable::new();
        let ino = table.get_or_create("gone.txt");
        table.remove("gone.txt");
        assert_eq!(table.get_inode("gone.txt"), None);
        assert_eq!(table.get_path(ino), None);
        assert_eq!(table.count(), 1); // just root
    }

    #[test]
    fn test_rename_keeps_inode() {
        let mut table = InodeTable::new();
        let ino = table.get_or_create("a.txt");
        table.rename("a.txt", "b.txt");
        assert_eq!(table.get_inode("b.txt"), Some(ino));
        assert_eq!(table.get_inode("a.txt"), None);
        assert_eq!(table.get_path(ino), Some("b.txt"));
    }

    #[test]
    fn test_rename_moves_subtree() {
        let mut table = InodeTable::new();
        let dir = table.get_or_create("d");
        let deep = table.get_or_create("d/sub/x");
        let other = table.get_or_create("d2/y");
        table.rename("d", "e");
        assert_eq!(table.get_inode("e"), Some(dir));
        assert_eq!(table.get_inode("e/sub/x"), Some(deep));
        assert_eq!(table.get_inode("d/sub/x"), None);
        // sibling with a shared name prefix is untouched
        assert_eq!(table.get_inode("d2/y"), Some(other));
    }
}
