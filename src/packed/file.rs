//! Packed solver binary format
//!
//! Header (16 bytes):
//!   - Magic: "EMGI" (4 bytes)
//!   - Version: u16 (2 bytes)
//!   - Flags: u16 (2 bytes)
//!   - Triangle count: u32 (4 bytes)
//!   - CRC32: u32 (4 bytes)
//!
//! Body:
//!   - Bincode-serialized [`PackedSolverFile`]
//!
//! Writing streams the body through an on-the-fly CRC and patches the
//! header afterwards; reading validates the CRC before handing bytes to
//! bincode, so corruption fails fast instead of confusing the decoder.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Magic bytes of the packed format
pub const PACKED_MAGIC: [u8; 4] = *b"EMGI";

/// Current format version
pub const PACKED_VERSION: u16 = 1;

/// Errors raised while reading or writing packed files
#[derive(Error, Debug)]
pub enum FileError {
    /// Underlying I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrong magic or malformed header
    #[error("invalid packed file: {0}")]
    InvalidFormat(String),

    /// File written by a newer crate version
    #[error("unsupported packed version {0}")]
    UnsupportedVersion(u16),

    /// Body bytes do not match the stored checksum
    #[error("crc mismatch: header says {expected:#010x}, body hashes to {actual:#010x}")]
    CrcMismatch {
        /// Checksum stored in the header
        expected: u32,
        /// Checksum of the bytes actually read
        actual: u32,
    },

    /// Bincode failed to encode or decode the body
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Fixed-size file header
#[derive(Debug, Clone, Copy)]
pub struct PackedHeader {
    /// Always [`PACKED_MAGIC`]
    pub magic: [u8; 4],
    /// Format version
    pub version: u16,
    /// Reserved, zero
    pub flags: u16,
    /// Triangles covered by the factor tables
    pub triangle_count: u32,
    /// CRC32 of the body
    pub crc32: u32,
}

impl PackedHeader {
    /// Header for a file about to be written
    pub fn new(file: &PackedSolverFile, body_crc: u32) -> Self {
        PackedHeader {
            magic: PACKED_MAGIC,
            version: PACKED_VERSION,
            flags: 0,
            triangle_count: file.triangle_count,
            crc32: body_crc,
        }
    }

    /// Serialize to the 16-byte wire layout
    #[inline]
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.flags.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.triangle_count.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.crc32.to_le_bytes());
        bytes
    }

    /// Parse and validate the 16-byte wire layout
    pub fn from_bytes(bytes: &[u8; 16]) -> Result<Self, FileError> {
        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != PACKED_MAGIC {
            return Err(FileError::InvalidFormat(format!(
                "invalid magic bytes: {:?}",
                magic
            )));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version > PACKED_VERSION {
            return Err(FileError::UnsupportedVersion(version));
        }
        let flags = u16::from_le_bytes([bytes[6], bytes[7]]);
        let triangle_count = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let crc32 = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        Ok(PackedHeader {
            magic,
            version,
            flags,
            triangle_count,
            crc32,
        })
    }
}

/// One transport edge stored shard-local
///
/// `dest_local` indexes the owning shard's energy arrays; the global
/// triangle is `dest_local * num_shards + shard`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PackedFactor {
    /// Destination index inside the owning shard
    pub dest_local: u32,
    /// Fraction of shot energy arriving there
    pub visibility: f32,
}

/// Factors owned by one shard
///
/// Destinations are partitioned over shards by `dest % num_shards`, so
/// parallel workers each replay one shard and never write the same
/// energy slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackedShard {
    /// Per-source ranges into `factors`; length `triangle_count + 1`
    pub offsets: Vec<u32>,
    /// Edges whose destination lives in this shard, grouped by source
    pub factors: Vec<PackedFactor>,
}

impl PackedShard {
    /// Factors shot by `source` into this shard
    #[inline]
    pub fn factors_of(&self, source: u32) -> &[PackedFactor] {
        let lo = self.offsets[source as usize] as usize;
        let hi = self.offsets[source as usize + 1] as usize;
        &self.factors[lo..hi]
    }
}

/// One triangle corner feeding an interpolation node
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PackedCorner {
    /// Contributing triangle
    pub triangle: u32,
    /// Contribution weight
    pub weight: f32,
}

/// Flattened interpolation graph
///
/// Nodes are contiguous ranges into `corners`; triangles name their
/// corner nodes by arena index, `u32::MAX` meaning none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackedSmoothing {
    /// Per-node ranges into `corners`; length `node_count + 1`
    pub node_offsets: Vec<u32>,
    /// All corners, grouped by node
    pub corners: Vec<PackedCorner>,
    /// Interpolation node of each triangle corner
    pub triangle_nodes: Vec<[u32; 3]>,
}

impl PackedSmoothing {
    /// Number of interpolation nodes
    #[inline]
    pub fn node_count(&self) -> usize {
        self.node_offsets.len().saturating_sub(1)
    }

    /// Corners of one node
    #[inline]
    pub fn corners_of(&self, node: u32) -> &[PackedCorner] {
        let lo = self.node_offsets[node as usize] as usize;
        let hi = self.node_offsets[node as usize + 1] as usize;
        &self.corners[lo..hi]
    }
}

/// Everything a packed runtime needs, serialized as one bincode body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackedSolverFile {
    /// Triangles in the source scene
    pub triangle_count: u32,
    /// Number of destination shards
    pub num_shards: u32,
    /// Factor tables, one per shard
    pub shards: Vec<PackedShard>,
    /// Per-triangle surface area (m^2)
    pub areas: Vec<f32>,
    /// Detail-level-0 flags carried from the source scene
    pub is_lod0: Vec<bool>,
    /// Flattened interpolation graph
    pub smoothing: PackedSmoothing,
}

impl PackedSolverFile {
    /// Approximate resident size of the tables, for host memory UIs
    pub fn memory_bytes(&self) -> usize {
        use std::mem::size_of;
        let shard_bytes: usize = self
            .shards
            .iter()
            .map(|s| {
                s.offsets.len() * size_of::<u32>()
                    + s.factors.len() * size_of::<PackedFactor>()
            })
            .sum();
        shard_bytes
            + self.areas.len() * size_of::<f32>()
            + self.is_lod0.len()
            + self.smoothing.node_offsets.len() * size_of::<u32>()
            + self.smoothing.corners.len() * size_of::<PackedCorner>()
            + self.smoothing.triangle_nodes.len() * size_of::<[u32; 3]>()
    }

    /// Internal indices all in range?
    pub fn validate(&self) -> Result<(), FileError> {
        if self.num_shards == 0 || self.shards.len() != self.num_shards as usize {
            return Err(FileError::InvalidFormat(format!(
                "expected {} shards, found {}",
                self.num_shards,
                self.shards.len()
            )));
        }
        let count = self.triangle_count as usize;
        if self.areas.len() != count || self.is_lod0.len() != count {
            return Err(FileError::InvalidFormat(
                "per-triangle table length mismatch".into(),
            ));
        }
        if self.smoothing.triangle_nodes.len() != count {
            return Err(FileError::InvalidFormat(
                "smoothing table length mismatch".into(),
            ));
        }
        for (s, shard) in self.shards.iter().enumerate() {
            if shard.offsets.len() != count + 1 {
                return Err(FileError::InvalidFormat(format!(
                    "shard {s} offset table length mismatch"
                )));
            }
            if shard.offsets.windows(2).any(|w| w[0] > w[1])
                || shard.offsets[count] as usize != shard.factors.len()
            {
                return Err(FileError::InvalidFormat(format!(
                    "shard {s} offset table does not cover its factors"
                )));
            }
            let shard_len = self.shard_len(s as u32) as u32;
            if shard.factors.iter().any(|f| f.dest_local >= shard_len) {
                return Err(FileError::InvalidFormat(format!(
                    "shard {s} factor destination out of range"
                )));
            }
        }
        let node_offsets = &self.smoothing.node_offsets;
        if node_offsets.is_empty()
            || node_offsets.windows(2).any(|w| w[0] > w[1])
            || *node_offsets.last().unwrap_or(&0) as usize != self.smoothing.corners.len()
        {
            return Err(FileError::InvalidFormat(
                "smoothing offset table does not cover its corners".into(),
            ));
        }
        let nodes = self.smoothing.node_count() as u32;
        for corners in self.smoothing.triangle_nodes.iter() {
            for &n in corners {
                if n != u32::MAX && n >= nodes {
                    return Err(FileError::InvalidFormat(
                        "triangle corner names a missing node".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Triangles owned by shard `s`
    #[inline]
    pub fn shard_len(&self, s: u32) -> usize {
        let count = self.triangle_count as usize;
        let shards = self.num_shards as usize;
        (count + shards - 1 - s as usize) / shards
    }
}

/// Writer wrapper hashing everything it forwards
struct CrcWriter<W: Write> {
    inner: W,
    hasher: crc32fast::Hasher,
}

impl<W: Write> CrcWriter<W> {
    #[inline]
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    #[inline]
    fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl<W: Write> Write for CrcWriter<W> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    #[inline]
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Save packed tables: placeholder header, streamed body with running
/// CRC, header patched in place once the checksum is known
pub fn save_packed(file: &PackedSolverFile, path: impl AsRef<Path>) -> Result<(), FileError> {
    let out = File::create(path)?;
    let mut writer = BufWriter::new(out);

    let placeholder = PackedHeader {
        magic: PACKED_MAGIC,
        version: PACKED_VERSION,
        flags: 0,
        triangle_count: file.triangle_count,
        crc32: 0,
    };
    writer.write_all(&placeholder.to_bytes())?;

    let mut crc_writer = CrcWriter::new(&mut writer);
    bincode::serialize_into(&mut crc_writer, file)
        .map_err(|e| FileError::Serialization(e.to_string()))?;
    let crc = crc_writer.finalize();

    writer.seek(SeekFrom::Start(0))?;
    writer.write_all(&PackedHeader::new(file, crc).to_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Load packed tables, validating the CRC before deserialization
pub fn load_packed(path: impl AsRef<Path>) -> Result<PackedSolverFile, FileError> {
    let input = File::open(path)?;
    let mut reader = BufReader::new(input);

    let mut header_bytes = [0u8; 16];
    reader.read_exact(&mut header_bytes)?;
    let header = PackedHeader::from_bytes(&header_bytes)?;

    let mut body = Vec::new();
    reader.read_to_end(&mut body)?;

    let actual = crc32fast::hash(&body);
    if actual != header.crc32 {
        return Err(FileError::CrcMismatch {
            expected: header.crc32,
            actual,
        });
    }

    let file: PackedSolverFile =
        bincode::deserialize(&body).map_err(|e| FileError::Serialization(e.to_string()))?;
    if file.triangle_count != header.triangle_count {
        return Err(FileError::InvalidFormat(
            "header and body disagree on triangle count".into(),
        ));
    }
    file.validate()?;
    Ok(file)
}

/// Read only the header, for cheap inspection of large files
pub fn read_header(path: impl AsRef<Path>) -> Result<PackedHeader, FileError> {
    let mut file = File::open(path)?;
    let mut header_bytes = [0u8; 16];
    file.read_exact(&mut header_bytes)?;
    PackedHeader::from_bytes(&header_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("ember_gi_packed_{}", name));
        path
    }

    fn small_file() -> PackedSolverFile {
        // Two triangles, one shard: 0 illuminates 1 fully
        PackedSolverFile {
            triangle_count: 2,
            num_shards: 1,
            shards: vec![PackedShard {
                offsets: vec![0, 1, 1],
                factors: vec![PackedFactor {
                    dest_local: 1,
                    visibility: 1.0,
                }],
            }],
            areas: vec![0.5, 0.5],
            is_lod0: vec![true, true],
            smoothing: PackedSmoothing {
                node_offsets: vec![0, 1, 2],
                corners: vec![
                    PackedCorner {
                        triangle: 0,
                        weight: 1.0,
                    },
                    PackedCorner {
                        triangle: 1,
                        weight: 1.0,
                    },
                ],
                triangle_nodes: vec![[0, 0, 0], [1, 1, 1]],
            },
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let file = small_file();
        let header = PackedHeader::new(&file, 0xdeadbeef);
        let parsed = PackedHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed.magic, PACKED_MAGIC);
        assert_eq!(parsed.version, PACKED_VERSION);
        assert_eq!(parsed.triangle_count, 2);
        assert_eq!(parsed.crc32, 0xdeadbeef);
    }

    #[test]
    fn test_invalid_magic() {
        let bytes = [b'X'; 16];
        assert!(matches!(
            PackedHeader::from_bytes(&bytes),
            Err(FileError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&PACKED_MAGIC);
        bytes[4..6].copy_from_slice(&(PACKED_VERSION + 1).to_le_bytes());
        assert!(matches!(
            PackedHeader::from_bytes(&bytes),
            Err(FileError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let file = small_file();
        let path = temp_path("roundtrip.emgi");

        save_packed(&file, &path).unwrap();
        let loaded = load_packed(&path).unwrap();

        assert_eq!(loaded.triangle_count, 2);
        assert_eq!(loaded.shards[0].factors, file.shards[0].factors);
        assert_eq!(loaded.areas, file.areas);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_crc_detects_corruption() {
        let file = small_file();
        let path = temp_path("corrupt.emgi");

        save_packed(&file, &path).unwrap();
        let mut data = fs::read(&path).unwrap();
        let mid = data.len() / 2;
        data[mid.max(16)] ^= 0xff;
        fs::write(&path, &data).unwrap();

        assert!(matches!(
            load_packed(&path),
            Err(FileError::CrcMismatch { .. })
        ));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_read_header_only() {
        let file = small_file();
        let path = temp_path("header_only.emgi");
        save_packed(&file, &path).unwrap();
        let header = read_header(&path).unwrap();
        assert_eq!(header.triangle_count, 2);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_validate_rejects_bad_destination() {
        let mut file = small_file();
        file.shards[0].factors[0].dest_local = 99;
        assert!(matches!(
            file.validate(),
            Err(FileError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_offsets() {
        // A CRC-valid blob can still carry a broken offset table; it
        // must fail validation, not panic during replay
        let mut file = small_file();
        file.shards[0].offsets[1] = file.shards[0].factors.len() as u32 + 5;
        assert!(matches!(
            file.validate(),
            Err(FileError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_validate_rejects_non_monotonic_offsets() {
        let mut file = small_file();
        file.shards[0].offsets = vec![1, 0, 1];
        assert!(matches!(
            file.validate(),
            Err(FileError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_smoothing_offsets() {
        let mut file = small_file();
        file.smoothing.node_offsets[2] = file.smoothing.corners.len() as u32 + 3;
        assert!(matches!(
            file.validate(),
            Err(FileError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_shard_len_partition() {
        let file = PackedSolverFile {
            triangle_count: 7,
            num_shards: 3,
            shards: Vec::new(),
            areas: Vec::new(),
            is_lod0: Vec::new(),
            smoothing: PackedSmoothing {
                node_offsets: vec![0],
                corners: Vec::new(),
                triangle_nodes: Vec::new(),
            },
        };
        // 7 triangles over 3 shards: shard 0 owns {0,3,6}, 1 owns {1,4}, 2 owns {2,5}
        assert_eq!(file.shard_len(0), 3);
        assert_eq!(file.shard_len(1), 2);
        assert_eq!(file.shard_len(2), 2);
    }

    #[test]
    fn test_memory_bytes_positive() {
        assert!(small_file().memory_bytes() > 0);
    }
}
