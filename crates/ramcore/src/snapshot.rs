//! Snapshot codec.
//!
//! Serializes the tree to a flat byte stream in pre-order: the root's
//! attribute record first, then for every node its record followed by its
//! subtree (directories) or its payload bytes (files), children in sibling
//! order. A directory's record does not carry an explicit child count; the
//! decoder recovers it as `nlink - 2`, which the link-count invariant keeps
//! equal to the number of children.
//!
//! The attribute record is a fixed 564-byte block: a 512-byte NUL-padded
//! name slot, then is-directory, mode, nlink, uid and gid as u32, size as
//! u64, and atime/mtime/ctime as i64, all in native byte order. This is a
//! process-local checkpoint, not a portable interchange format.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::capacity::{Capacity, NODE_COST};
use crate::fs::RamFs;
use crate::tree::{Node, NodeAttr, NodeBody, NodeKind, NAME_MAX};

const NAME_SLOT: usize = 512;
const RECORD_LEN: usize = NODE_COST as usize;

/// Write the whole tree to `w`.
pub fn encode_to<W: Write>(fs: &RamFs, w: &mut W) -> io::Result<()> {
    write_node(fs.root(), w)
}

/// Read a tree back under a fresh budget of `capacity` bytes.
///
/// Running out of capacity mid-stream is non-fatal: the tree decoded so
/// far is kept, a warning is logged, and the interrupted directory's link
/// count is patched down so the link-count invariant holds. Truncated
/// input is an error.
pub fn decode_from<R: Read>(r: &mut R, capacity: u64) -> io::Result<RamFs> {
    let mut cap = Capacity::new(capacity);
    let raw = read_record(r)?;
    if !raw.isdir {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "snapshot root is not a directory",
        ));
    }
    let mut root = node_from_record(&raw);
    decode_children(&mut root, r, &mut cap)?;
    Ok(RamFs::from_parts(root, cap))
}

/// Write-truncate the snapshot file at `path`.
pub fn save(fs: &RamFs, path: &Path) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    encode_to(fs, &mut w)?;
    w.flush()
}

/// Read and decode the snapshot file at `path`.
pub fn load(path: &Path, capacity: u64) -> io::Result<RamFs> {
    let mut r = BufReader::new(File::open(path)?);
    decode_from(&mut r, capacity)
}

fn write_node<W: Write>(node: &Node, w: &mut W) -> io::Result<()> {
    w.write_all(&encode_record(node))?;
    match node.kind() {
        NodeKind::Directory => {
            for child in node.children() {
                write_node(child, w)?;
            }
        }
        NodeKind::File => {
            if let Some(payload) = node.payload() {
                w.write_all(payload)?;
            }
        }
    }
    Ok(())
}

/// Decode `nlink - 2` children into `parent`, appending in stream order so
/// the reconstructed sibling order matches the encoder's.
///
/// Returns false when capacity ran out and the stream was abandoned.
fn decode_children<R: Read>(
    parent: &mut Node,
    r: &mut R,
    cap: &mut Capacity,
) -> io::Result<bool> {
    let want = parent.attr().nlink.saturating_sub(2);
    for attached in 0..want {
        if cap.reserve(NODE_COST).is_err() {
            out_of_space(parent, attached, want);
            return Ok(false);
        }
        let raw = read_record(r)?;
        let mut child = node_from_record(&raw);
        if raw.isdir {
            let complete = decode_children(&mut child, r, cap)?;
            parent.append_child_raw(child);
            if !complete {
                parent.attr.nlink = 2 + attached + 1;
                return Ok(false);
            }
        } else {
            if raw.size > 0 {
                if cap.reserve(raw.size).is_err() {
                    // never attach a file without its payload
                    cap.release(NODE_COST);
                    out_of_space(parent, attached, want);
                    return Ok(false);
                }
                let mut payload = vec![0u8; raw.size as usize];
                r.read_exact(&mut payload)?;
                child.set_payload(payload);
            }
            parent.append_child_raw(child);
        }
    }
    Ok(true)
}

fn out_of_space(parent: &mut Node, attached: u32, want: u32) {
    tracing::warn!(
        dir = parent.name(),
        attached,
        want,
        "no space left while restoring snapshot; keeping partial tree"
    );
    parent.attr.nlink = 2 + attached;
}

struct RawRecord {
    name: String,
    isdir: bool,
    mode: u32,
    nlink: u32,
    uid: u32,
    gid: u32,
    size: u64,
    atime: i64,
    mtime: i64,
    ctime: i64,
}

fn node_from_record(raw: &RawRecord) -> Node {
    let attr = NodeAttr {
        size: raw.size,
        nlink: raw.nlink,
        uid: raw.uid,
        gid: raw.gid,
        mode: raw.mode,
        atime: raw.atime,
        mtime: raw.mtime,
        ctime: raw.ctime,
    };
    let body = if raw.isdir {
        NodeBody::Directory {
            children: Vec::new(),
        }
    } else {
        NodeBody::File { payload: None }
    };
    Node {
        name: raw.name.clone(),
        attr,
        body,
    }
}

fn encode_record(node: &Node) -> [u8; RECORD_LEN] {
    let mut rec = [0u8; RECORD_LEN];
    let name = node.name().as_bytes();
    let n = name.len().min(NAME_MAX);
    rec[..n].copy_from_slice(&name[..n]);

    let attr = node.attr();
    let mut off = NAME_SLOT;
    put_u32(&mut rec, &mut off, node.is_dir() as u32);
    put_u32(&mut rec, &mut off, attr.mode);
    put_u32(&mut rec, &mut off, attr.nlink);
    put_u32(&mut rec, &mut off, attr.uid);
    put_u32(&mut rec, &mut off, attr.gid);
    put_u64(&mut rec, &mut off, attr.size);
    put_i64(&mut rec, &mut off, attr.atime);
    put_i64(&mut rec, &mut off, attr.mtime);
    put_i64(&mut rec, &mut off, attr.ctime);
    debug_assert_eq!(off, RECORD_LEN);
    rec
}

fn read_record<R: Read>(r: &mut R) -> io::Result<RawRecord> {
    let mut rec = [0u8; RECORD_LEN];
    r.read_exact(&mut rec)?;

    let end = rec[..NAME_SLOT]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(NAME_SLOT);
    let name = String::from_utf8_lossy(&rec[..end]).into_owned();

    let mut off = NAME_SLOT;
    Ok(RawRecord {
        name,
        isdir: get_u32(&rec, &mut off) != 0,
        mode: get_u32(&rec, &mut off),
        nlink: get_u32(&rec, &mut off),
        uid: get_u32(&rec, &mut off),
        gid: get_u32(&rec, &mut off),
        size: get_u64(&rec, &mut off),
        atime: get_i64(&rec, &mut off),
        mtime: get_i64(&rec, &mut off),
        ctime: get_i64(&rec, &mut off),
    })
}

fn put_u32(buf: &mut [u8], off: &mut usize, v: u32) {
    buf[*off..*off + 4].copy_from_slice(&v.to_ne_bytes());
    *off += 4;
}

fn put_u64(buf: &mut [u8], off: &mut usize, v: u64) {
    buf[*off..*off + 8].copy_from_slice(&v.to_ne_bytes());
    *off += 8;
}

fn put_i64(buf: &mut [u8], off: &mut usize, v: i64) {
    buf[*off..*off + 8].copy_from_slice(&v.to_ne_bytes());
    *off += 8;
}

fn get_u32(buf: &[u8], off: &mut usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[*off..*off + 4]);
    *off += 4;
    u32::from_ne_bytes(b)
}

fn get_u64(buf: &[u8], off: &mut usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[*off..*off + 8]);
    *off += 8;
    u64::from_ne_bytes(b)
}

fn get_i64(buf: &[u8], off: &mut usize) -> i64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[*off..*off + 8]);
    *off += 8;
    i64::from_ne_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1 << 20;

    fn encode(fs: &RamFs) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_to(fs, &mut buf).unwrap();
        buf
    }

    fn sample_fs() -> RamFs {
        let mut fs = RamFs::new(MIB);
        fs.mkdir("/d", 1000, 1000).unwrap();
        fs.create("/d/f", 1000, 1000).unwrap();
        fs.write("/d/f", 0, b"xyz").unwrap();
        fs.mkdir("/d/sub", 1000, 1000).unwrap();
        fs.create("/d/sub/deep", 1000, 1000).unwrap();
        fs.write("/d/sub/deep", 0, &[0xAB; 100]).unwrap();
        fs.create("/top", 0, 0).unwrap();
        fs
    }

    #[test]
    fn test_record_layout() {
        // 512-byte name slot, five u32 fields, one u64, three i64
        assert_eq!(RECORD_LEN, 512 + 5 * 4 + 8 + 3 * 8);
        assert_eq!(RECORD_LEN as u64, NODE_COST);
    }

    #[test]
    fn test_round_trip_bytes() {
        let fs = sample_fs();
        let bytes = encode(&fs);
        let decoded = decode_from(&mut bytes.as_slice(), MIB).unwrap();
        assert_eq!(encode(&decoded), bytes);
        assert_eq!(decoded.free_bytes(), fs.free_bytes());
    }

    #[test]
    fn test_round_trip_preserves_attributes() {
        let fs = sample_fs();
        let bytes = encode(&fs);
        let decoded = decode_from(&mut bytes.as_slice(), MIB).unwrap();
        for path in ["/", "/d", "/d/f", "/d/sub", "/d/sub/deep", "/top"] {
            let (kind, attr) = fs.getattr(path).unwrap();
            let (dkind, dattr) = decoded.getattr(path).unwrap();
            assert_eq!(kind, dkind, "{path}");
            assert_eq!(attr, dattr, "{path}");
        }
        assert_eq!(decoded.read("/d/f", 0, 10).unwrap(), b"xyz");
        assert_eq!(decoded.read("/d/sub/deep", 0, 200).unwrap(), vec![0xAB; 100]);
    }

    #[test]
    fn test_round_trip_empty_tree() {
        let fs = RamFs::new(MIB);
        let bytes = encode(&fs);
        let decoded = decode_from(&mut bytes.as_slice(), MIB).unwrap();
        assert_eq!(decoded.free_bytes(), MIB);
        assert_eq!(decoded.getattr("/").unwrap().1, fs.getattr("/").unwrap().1);
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ramdisk.img");

        let mut fs = RamFs::new(MIB);
        fs.mkdir("/d", 0, 0).unwrap();
        fs.create("/d/f", 0, 0).unwrap();
        fs.write("/d/f", 0, b"xyz").unwrap();
        let attr = fs.getattr("/d/f").unwrap().1;

        save(&fs, &path).unwrap();
        let mut restored = load(&path, MIB).unwrap();
        assert_eq!(restored.read("/d/f", 0, 3).unwrap(), b"xyz");
        assert_eq!(restored.getattr("/d/f").unwrap().1, attr);
        assert_eq!(restored.free_bytes(), MIB - 2 * NODE_COST - 3);
        assert_eq!(
            restored
                .readdir("/d")
                .unwrap()
                .iter()
                .map(|e| e.name.clone())
                .collect::<Vec<_>>(),
            vec!["f"]
        );
    }

    #[test]
    fn test_save_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ramdisk.img");

        let mut fs = RamFs::new(MIB);
        fs.create("/old", 0, 0).unwrap();
        save(&fs, &path).unwrap();

        let mut fs = RamFs::new(MIB);
        fs.create("/new", 0, 0).unwrap();
        save(&fs, &path).unwrap();

        let restored = load(&path, MIB).unwrap();
        assert!(restored.getattr("/old").is_err());
        assert!(restored.getattr("/new").is_ok());
    }

    #[test]
    fn test_partial_decode_keeps_invariants() {
        let mut fs = RamFs::new(MIB);
        fs.create("/a", 0, 0).unwrap();
        fs.write("/a", 0, &[1; 8]).unwrap();
        fs.create("/b", 0, 0).unwrap();
        fs.write("/b", 0, &[2; 8]).unwrap();
        fs.create("/c", 0, 0).unwrap();
        fs.write("/c", 0, &[3; 8]).unwrap();
        let bytes = encode(&fs);

        // room for exactly two nodes and their payloads
        let mut decoded = decode_from(&mut bytes.as_slice(), 2 * NODE_COST + 16).unwrap();
        let names: Vec<String> = decoded
            .readdir("/")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        // children encode most-recent-first: c, b, a
        assert_eq!(names, vec!["c", "b"]);
        assert_eq!(decoded.getattr("/").unwrap().1.nlink, 4);
        assert_eq!(decoded.read("/c", 0, 8).unwrap(), vec![3; 8]);
        assert_eq!(decoded.free_bytes(), 0);
    }

    #[test]
    fn test_truncated_stream_is_an_error() {
        let fs = sample_fs();
        let bytes = encode(&fs);
        let cut = &bytes[..bytes.len() / 2];
        assert!(decode_from(&mut &cut[..], MIB).is_err());
    }

    #[test]
    fn test_non_directory_root_rejected() {
        let file = crate::tree::Node::new_file("f", 0, 0, 0);
        let rec = encode_record(&file);
        assert!(decode_from(&mut &rec[..], MIB).is_err());
    }
}
