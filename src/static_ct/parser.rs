// Tile Path and Data Tile Parsing
//
// Tile addressing and the big-endian leaf encoding of Static CT API data
// tiles.

use super::Result;
use crate::error::SearchError;
use serde::{Deserialize, Serialize};

/// Entries in a full data tile.
pub const TILE_ENTRY_COUNT: usize = 256;

const ENTRY_TYPE_X509: u16 = 0;
const ENTRY_TYPE_PRECERT: u16 = 1;

/// Converts an integer index to a tile path string.
///
/// The three least significant decimal digits become the final zero-padded
/// segment; each next-higher group of three digits is prepended as an
/// `xDDD/` segment until the remainder is zero. Index 0 maps to `000`,
/// 1000 to `x001/000`, and 1_000_000 to `x001/x000/000`.
pub fn tile_path_from_index(tile_index: u64) -> String {
    let mut path = format!("{:03}", tile_index % 1000);
    let mut remainder = tile_index / 1000;

    while remainder != 0 {
        path = format!("x{:03}/{}", remainder % 1000, path);
        remainder /= 1000;
    }

    path
}

/// Parses a tile path string back into the index it was derived from.
pub fn tile_index_from_path(path: &str) -> Result<u64> {
    let mut index: u64 = 0;
    let mut segments = path.split('/').peekable();

    while let Some(segment) = segments.next() {
        let digits = if segments.peek().is_none() {
            segment
        } else {
            segment.strip_prefix('x').ok_or_else(|| SearchError::TilePath {
                message: format!("segment {segment:?} is missing the x prefix"),
            })?
        };

        if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SearchError::TilePath {
                message: format!("segment {segment:?} is not three decimal digits"),
            });
        }

        let value: u64 = digits.parse().map_err(|_| SearchError::TilePath {
            message: format!("segment {segment:?} is not a number"),
        })?;

        index = index
            .checked_mul(1000)
            .and_then(|i| i.checked_add(value))
            .ok_or_else(|| SearchError::TilePath {
                message: "tile index overflows".to_string(),
            })?;
    }

    Ok(index)
}

/// A single entry parsed from a data tile.
///
/// Exactly one of `certificate` and `pre_certificate` is meaningful,
/// selected by `is_precert`: precertificate entries store the
/// TBSCertificate in `certificate` and the full precertificate in
/// `pre_certificate`, while final-certificate entries store the DER
/// certificate in `certificate` and leave `pre_certificate` empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileEntry {
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    pub is_precert: bool,
    pub certificate: Vec<u8>,
    pub pre_certificate: Vec<u8>,
    /// SHA-256 of the issuing certificate's public key; only set on
    /// precertificate entries.
    pub issuer_key_hash: [u8; 32],
}

/// Big-endian byte reader over a tile body.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.data.len() < n {
            return Err(SearchError::Tile {
                message: format!("truncated {what}"),
            });
        }
        let (head, rest) = self.data.split_at(n);
        self.data = rest;
        Ok(head)
    }

    fn read_u64(&mut self, what: &str) -> Result<u64> {
        let bytes = self.take(8, what)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(buf))
    }

    fn read_u16(&mut self, what: &str) -> Result<u16> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u24(&mut self, what: &str) -> Result<usize> {
        let bytes = self.take(3, what)?;
        Ok(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize)
    }

    fn read_u16_prefixed(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.read_u16(what)? as usize;
        self.take(len, what)
    }

    fn read_u24_prefixed(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.read_u24(what)?;
        self.take(len, what)
    }
}

/// Reads one leaf from the front of a data tile body, returning the parsed
/// entry and the remaining bytes.
///
/// Leaf layout (all integers big-endian): a u64 timestamp and a u16 entry
/// type, then for final certificates a u24-length-prefixed certificate,
/// u16-length-prefixed extensions, and a u16-length-prefixed fingerprint
/// chain; precertificate entries carry a 32-byte issuer key hash, the
/// u24-length-prefixed TBSCertificate, u16-length-prefixed extensions, the
/// u24-length-prefixed precertificate, and the u16-length-prefixed
/// fingerprint chain.
pub fn read_tile_leaf(data: &[u8]) -> Result<(TileEntry, &[u8])> {
    let mut reader = Reader { data };

    let timestamp = reader.read_u64("timestamp")?;
    if timestamp > i64::MAX as u64 {
        return Err(SearchError::Tile {
            message: format!("timestamp {timestamp} out of range"),
        });
    }

    let entry = match reader.read_u16("entry type")? {
        ENTRY_TYPE_X509 => {
            let certificate = reader.read_u24_prefixed("certificate")?.to_vec();
            reader.read_u16_prefixed("extensions")?;
            reader.read_u16_prefixed("fingerprint chain")?;

            TileEntry {
                timestamp: timestamp as i64,
                is_precert: false,
                certificate,
                pre_certificate: Vec::new(),
                issuer_key_hash: [0; 32],
            }
        }
        ENTRY_TYPE_PRECERT => {
            let mut issuer_key_hash = [0u8; 32];
            issuer_key_hash.copy_from_slice(reader.take(32, "issuer key hash")?);
            let certificate = reader.read_u24_prefixed("tbs certificate")?.to_vec();
            reader.read_u16_prefixed("extensions")?;
            let pre_certificate = reader.read_u24_prefixed("precertificate")?.to_vec();
            reader.read_u16_prefixed("fingerprint chain")?;

            TileEntry {
                timestamp: timestamp as i64,
                is_precert: true,
                certificate,
                pre_certificate,
                issuer_key_hash,
            }
        }
        other => {
            return Err(SearchError::Tile {
                message: format!("unknown entry type {other}"),
            });
        }
    };

    Ok((entry, reader.data))
}

/// Parses exactly [`TILE_ENTRY_COUNT`] entries from a data tile body.
///
/// Fails if fewer well-formed entries are present; trailing bytes after the
/// final entry are ignored.
pub fn decode_tile(data: &[u8]) -> Result<Vec<TileEntry>> {
    let mut entries = Vec::with_capacity(TILE_ENTRY_COUNT);
    let mut rest = data;

    for _ in 0..TILE_ENTRY_COUNT {
        let (entry, remaining) =
            read_tile_leaf(rest).map_err(|err| err.context("reading entry from tile"))?;
        entries.push(entry);
        rest = remaining;
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Serializes one leaf the way a compliant log would
    fn encode_leaf(entry: &TileEntry) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(entry.timestamp as u64).to_be_bytes());

        if entry.is_precert {
            out.extend_from_slice(&ENTRY_TYPE_PRECERT.to_be_bytes());
            out.extend_from_slice(&entry.issuer_key_hash);
            out.extend_from_slice(&(entry.certificate.len() as u32).to_be_bytes()[1..]);
            out.extend_from_slice(&entry.certificate);
            out.extend_from_slice(&0u16.to_be_bytes()); // extensions
            out.extend_from_slice(&(entry.pre_certificate.len() as u32).to_be_bytes()[1..]);
            out.extend_from_slice(&entry.pre_certificate);
            out.extend_from_slice(&0u16.to_be_bytes()); // fingerprint chain
        } else {
            out.extend_from_slice(&ENTRY_TYPE_X509.to_be_bytes());
            out.extend_from_slice(&(entry.certificate.len() as u32).to_be_bytes()[1..]);
            out.extend_from_slice(&entry.certificate);
            out.extend_from_slice(&0u16.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes());
        }

        out
    }

    #[test]
    fn test_tile_path_from_index() {
        assert_eq!(tile_path_from_index(0), "000");
        assert_eq!(tile_path_from_index(1), "001");
        assert_eq!(tile_path_from_index(999), "999");
        assert_eq!(tile_path_from_index(1000), "x001/000");
        assert_eq!(tile_path_from_index(999_999), "x999/999");
        assert_eq!(tile_path_from_index(1_000_000), "x001/x000/000");
    }

    #[test]
    fn test_tile_path_round_trip() {
        for index in [
            0u64,
            1,
            255,
            999,
            1000,
            1001,
            999_999,
            1_000_000,
            123_456_789,
        ] {
            let path = tile_path_from_index(index);
            assert_eq!(tile_index_from_path(&path).unwrap(), index, "path {path}");
        }
    }

    #[test]
    fn test_tile_index_from_path_rejects_malformed() {
        for path in ["", "12", "1234", "abc", "001/000", "x1/000", "x001/00x"] {
            assert!(tile_index_from_path(path).is_err(), "path {path:?}");
        }
    }

    #[test]
    fn test_read_tile_leaf_x509_entry() {
        let entry = TileEntry {
            timestamp: 1_700_000_000_000,
            is_precert: false,
            certificate: vec![0x30, 0x82, 0x01, 0x02],
            pre_certificate: Vec::new(),
            issuer_key_hash: [0; 32],
        };

        let mut encoded = encode_leaf(&entry);
        encoded.extend_from_slice(b"rest");

        let (parsed, rest) = read_tile_leaf(&encoded).unwrap();
        assert_eq!(parsed, entry);
        assert_eq!(rest, b"rest");
    }

    #[test]
    fn test_read_tile_leaf_precert_entry() {
        let entry = TileEntry {
            timestamp: 42,
            is_precert: true,
            certificate: vec![0xAA; 8],
            pre_certificate: vec![0xBB; 16],
            issuer_key_hash: [7; 32],
        };

        let encoded = encode_leaf(&entry);
        let (parsed, rest) = read_tile_leaf(&encoded).unwrap();
        assert_eq!(parsed, entry);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_read_tile_leaf_rejects_unknown_entry_type() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u64.to_be_bytes());
        data.extend_from_slice(&2u16.to_be_bytes());

        let err = read_tile_leaf(&data).unwrap_err();
        assert!(err.to_string().contains("unknown entry type"));
    }

    #[test]
    fn test_read_tile_leaf_rejects_truncated_data() {
        let entry = TileEntry {
            timestamp: 42,
            is_precert: false,
            certificate: vec![1, 2, 3],
            pre_certificate: Vec::new(),
            issuer_key_hash: [0; 32],
        };

        let encoded = encode_leaf(&entry);
        for len in 0..encoded.len() {
            assert!(read_tile_leaf(&encoded[..len]).is_err(), "prefix {len}");
        }
    }

    #[test]
    fn test_decode_tile_requires_full_tile() {
        let entry = TileEntry {
            timestamp: 1,
            is_precert: false,
            certificate: vec![0x30],
            pre_certificate: Vec::new(),
            issuer_key_hash: [0; 32],
        };

        let mut tile = Vec::new();
        for _ in 0..TILE_ENTRY_COUNT {
            tile.extend_from_slice(&encode_leaf(&entry));
        }

        assert_eq!(decode_tile(&tile).unwrap().len(), TILE_ENTRY_COUNT);

        // One entry short
        let short = &tile[..tile.len() - 1];
        assert!(decode_tile(short).is_err());
    }
}
