//! Index snapshots on disk.
//!
//! A snapshot is the bincode encoding of the configuration, the vector
//! arena, the adjacency and the indexed count, followed by an 8-byte footer
//! `[magic "ONG1"][CRC32 of the payload, big-endian]`. Writes go to a
//! temporary file that is renamed over the target, so a crash never leaves a
//! half-written snapshot behind.

use crate::error::{IndexError, Result};
use crate::graph::repository::Node;
use crate::graph::{Index, ObjectId, Property};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Magic bytes in front of the CRC32 footer.
const SNAPSHOT_MAGIC: &[u8; 4] = b"ONG1";

const FOOTER_LEN: usize = 8;

#[derive(Serialize, Deserialize)]
struct IndexSnapshot {
    property: Property,
    objects: Vec<f32>,
    nodes: Vec<Node>,
    indexed: ObjectId,
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `index` to `path`, replacing any previous snapshot atomically.
pub(crate) fn save_index(index: &Index, path: &Path) -> Result<()> {
    let snapshot = IndexSnapshot {
        property: index.property(),
        objects: index.space.export(),
        nodes: index.graph.snapshot(),
        indexed: index.indexed_count() as ObjectId,
    };
    let bytes = bincode::serialize(&snapshot)?;
    let crc = crc32fast::hash(&bytes);

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }

    let mut output = Vec::with_capacity(bytes.len() + FOOTER_LEN);
    output.extend_from_slice(&bytes);
    output.extend_from_slice(SNAPSHOT_MAGIC);
    output.extend_from_slice(&crc.to_be_bytes());

    let tmp = temp_path(path);
    fs::write(&tmp, &output)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(&tmp, path)?;

    tracing::info!(
        "Saved index {:?} ({} objects, {} bytes, CRC32={:#010x})",
        path,
        snapshot.nodes.len(),
        bytes.len(),
        crc
    );
    Ok(())
}

/// Split the footer off a snapshot and verify its checksum.
fn verified_payload<'a>(raw: &'a [u8], path: &Path) -> Result<&'a [u8]> {
    if raw.len() < FOOTER_LEN || &raw[raw.len() - FOOTER_LEN..raw.len() - 4] != SNAPSHOT_MAGIC {
        return Err(IndexError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{:?} is not an index snapshot (missing footer)", path),
        )));
    }
    let (payload, footer) = raw.split_at(raw.len() - FOOTER_LEN);
    let stored = u32::from_be_bytes([footer[4], footer[5], footer[6], footer[7]]);
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return Err(IndexError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "snapshot CRC32 mismatch: expected {:#010x}, got {:#010x}. File may be corrupted: {:?}",
                stored, computed, path
            ),
        )));
    }
    tracing::debug!("Snapshot CRC32 verified: {:#010x}", stored);
    Ok(payload)
}

/// Read and validate a snapshot written by [`save_index`].
pub(crate) fn load_index(path: &Path) -> Result<Index> {
    let raw = fs::read(path)?;
    let payload = verified_payload(&raw, path)?;
    let snapshot: IndexSnapshot = bincode::deserialize(payload)?;
    let objects = snapshot.nodes.len();
    let kind = snapshot.property.graph_kind;
    let index = Index::from_parts(
        snapshot.property,
        snapshot.objects,
        snapshot.nodes,
        snapshot.indexed,
    )?;
    tracing::info!("Loaded {} index {:?} ({} objects)", kind, path, objects);
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_index() -> Index {
        let index = Index::new(Property::new(2).with_edge_size_for_creation(3)).unwrap();
        for i in 0..30 {
            let t = i as f32;
            index.append(&[t.sin() * 5.0, t.cos() * 5.0]).unwrap();
        }
        index.create_index(1).unwrap();
        index
    }

    #[test]
    fn test_round_trip_preserves_graph() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.onng");
        let index = small_index();
        index.save(&path).unwrap();
        assert!(!temp_path(&path).exists());

        let loaded = Index::open(&path).unwrap();
        assert_eq!(loaded.property(), index.property());
        assert_eq!(loaded.indexed_count(), 30);
        for id in 1..=30 {
            assert_eq!(loaded.neighbors(id), index.neighbors(id));
            assert_eq!(loaded.object(id), index.object(id));
        }
    }

    #[test]
    fn test_flipped_byte_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.onng");
        small_index().save(&path).unwrap();

        let mut raw = fs::read(&path).unwrap();
        raw[10] ^= 0xFF;
        fs::write(&path, &raw).unwrap();
        match Index::open(&path) {
            Err(IndexError::Io(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::InvalidData);
                assert!(e.to_string().contains("CRC32 mismatch"));
            }
            other => panic!("expected checksum failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_footer_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.onng");
        fs::write(&path, b"not a snapshot").unwrap();
        assert!(matches!(Index::open(&path), Err(IndexError::Io(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        match Index::open(dir.path().join("absent.onng")) {
            Err(IndexError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_inconsistent_snapshot_rejected() {
        // Valid checksum, but an edge points past the last object.
        let snapshot = IndexSnapshot {
            property: Property::new(1),
            objects: vec![0.0, 1.0],
            nodes: vec![
                Node::from_edges(vec![crate::graph::ObjectDistance::new(9, 1.0)]),
                Node::new(),
            ],
            indexed: 2,
        };
        let bytes = bincode::serialize(&snapshot).unwrap();
        let mut raw = bytes.clone();
        raw.extend_from_slice(SNAPSHOT_MAGIC);
        raw.extend_from_slice(&crc32fast::hash(&bytes).to_be_bytes());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.onng");
        fs::write(&path, &raw).unwrap();
        assert!(matches!(
            Index::open(&path),
            Err(IndexError::CorruptGraph { id: 1, .. })
        ));
    }
}
