use sha1::{Digest, Sha1};

use super::Pieces;
use crate::bencode::BencodeValue;
use crate::error::{ConfigError, DrizzleError, Result};

/// A file entry in a multi-file torrent
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: Vec<String>,
    pub length: u64,
}

/// The parsed `info` dictionary
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// Suggested name for the target file or directory
    pub name: String,
    /// Nominal number of bytes per piece
    pub piece_length: u64,
    /// SHA1 hashes of all pieces, in index order
    pub pieces: Pieces,
    /// Files in the torrent
    pub files: Vec<FileInfo>,
    /// Total length of all files
    pub total_length: u64,
}

impl TorrentInfo {
    fn from_bencode(value: &BencodeValue) -> Result<Self> {
        let dict = value
            .as_dict()
            .ok_or_else(|| DrizzleError::InvalidTorrent("Info must be a dict".to_string()))?;

        let name = dict
            .get(b"name".as_ref())
            .and_then(|v| v.as_str())
            .ok_or_else(|| DrizzleError::InvalidTorrent("Missing 'name' field".to_string()))?
            .to_string();

        let piece_length = dict
            .get(b"piece length".as_ref())
            .and_then(|v| v.as_integer())
            .ok_or_else(|| {
                DrizzleError::InvalidTorrent("Missing 'piece length' field".to_string())
            })? as u64;

        let pieces_bytes = dict
            .get(b"pieces".as_ref())
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| DrizzleError::InvalidTorrent("Missing 'pieces' field".to_string()))?;

        let pieces = Pieces::from_bytes(pieces_bytes)?;

        let (files, total_length) = parse_files(dict, &name)?;

        let info = TorrentInfo {
            name,
            piece_length,
            pieces,
            files,
            total_length,
        };
        info.validate()?;

        Ok(info)
    }

    /// The metadata must be internally consistent before any session
    /// state is created: the declared length has to land inside the
    /// last of the hashed pieces.
    fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.piece_length == 0 {
            return Err(ConfigError::InvalidPieceLength(self.piece_length));
        }

        let count = self.pieces.len() as u64;
        let floor = self.piece_length * count.saturating_sub(1);
        let ceiling = self.piece_length * count;

        if self.total_length <= floor || self.total_length > ceiling {
            return Err(ConfigError::InconsistentLength {
                length: self.total_length,
                piece_length: self.piece_length,
                hashes: self.pieces.len(),
            });
        }

        Ok(())
    }
}

fn parse_files(
    dict: &std::collections::BTreeMap<Vec<u8>, BencodeValue>,
    name: &str,
) -> Result<(Vec<FileInfo>, u64)> {
    if let Some(length_value) = dict.get(b"length".as_ref()) {
        // Single-file mode
        let length = length_value
            .as_integer()
            .ok_or_else(|| DrizzleError::InvalidTorrent("Invalid 'length' field".to_string()))?
            as u64;

        let file = FileInfo {
            path: vec![name.to_string()],
            length,
        };

        return Ok((vec![file], length));
    }

    // Multi-file mode
    let files_list = dict
        .get(b"files".as_ref())
        .and_then(|v| v.as_list())
        .ok_or_else(|| {
            DrizzleError::InvalidTorrent("Missing 'length' or 'files' field".to_string())
        })?;

    let mut files = Vec::new();
    let mut total = 0u64;

    for file_value in files_list {
        let file_dict = file_value.as_dict().ok_or_else(|| {
            DrizzleError::InvalidTorrent("File entry must be a dict".to_string())
        })?;

        let length = file_dict
            .get(b"length".as_ref())
            .and_then(|v| v.as_integer())
            .ok_or_else(|| DrizzleError::InvalidTorrent("Missing file 'length'".to_string()))?
            as u64;

        let path = file_dict
            .get(b"path".as_ref())
            .and_then(|v| v.as_list())
            .ok_or_else(|| DrizzleError::InvalidTorrent("Missing file 'path'".to_string()))?
            .iter()
            .map(|v| {
                v.as_str()
                    .ok_or_else(|| {
                        DrizzleError::InvalidTorrent("Invalid path component".to_string())
                    })
                    .map(String::from)
            })
            .collect::<Result<Vec<_>>>()?;

        total += length;
        files.push(FileInfo { path, length });
    }

    Ok((files, total))
}

/// Top-level metainfo from a `.torrent` file
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// URL of the tracker
    pub announce: String,
    /// Information about the torrent contents
    pub info: TorrentInfo,
    /// SHA1 hash of the bencoded info dictionary
    pub info_hash: [u8; 20],
}

impl Metainfo {
    pub fn from_bencode(value: BencodeValue, raw_data: &[u8]) -> Result<Self> {
        let dict = value
            .as_dict()
            .ok_or_else(|| DrizzleError::InvalidTorrent("Torrent must be a dict".to_string()))?;

        let announce = dict
            .get(b"announce".as_ref())
            .and_then(|v| v.as_str())
            .ok_or_else(|| DrizzleError::InvalidTorrent("Missing 'announce' field".to_string()))?
            .to_string();

        let info_value = dict
            .get(b"info".as_ref())
            .ok_or_else(|| DrizzleError::InvalidTorrent("Missing 'info' field".to_string()))?;

        let info = TorrentInfo::from_bencode(info_value)?;
        let info_hash = calculate_info_hash(raw_data)?;

        Ok(Metainfo {
            announce,
            info,
            info_hash,
        })
    }

    /// The info hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }
}

/// SHA1 over the raw bencoded `info` dictionary, located inside the
/// original file bytes so the digest matches what the uploader hashed.
fn calculate_info_hash(raw_data: &[u8]) -> Result<[u8; 20]> {
    let info_key = b"4:info";
    let info_start = raw_data
        .windows(info_key.len())
        .position(|window| window == info_key)
        .ok_or_else(|| DrizzleError::InvalidTorrent("Info dict not found".to_string()))?
        + info_key.len();

    let info_dict_bytes = info_dict_span(&raw_data[info_start..])?;

    let mut hasher = Sha1::new();
    hasher.update(info_dict_bytes);
    let hash = hasher.finalize();

    let mut result = [0u8; 20];
    result.copy_from_slice(&hash);
    Ok(result)
}

/// The byte span of the bencoded info dictionary, found by walking the
/// container nesting depth.
fn info_dict_span(data: &[u8]) -> Result<&[u8]> {
    if data.first() != Some(&b'd') {
        return Err(DrizzleError::InvalidTorrent(
            "Info dict must start with 'd'".to_string(),
        ));
    }

    let mut pos = 0usize;
    let mut depth = 0i32;
    let mut i = 0usize;

    while i < data.len() {
        match data[i] {
            b'd' | b'l' => {
                depth += 1;
                i += 1;
            }
            b'i' => {
                // Skip the integer to its closing 'e'
                while i < data.len() && data[i] != b'e' {
                    i += 1;
                }
                i += 1;
            }
            b'0'..=b'9' => {
                // Byte string: <len>:<bytes>
                let len_start = i;
                while i < data.len() && data[i] != b':' {
                    i += 1;
                }
                let len: usize = std::str::from_utf8(&data[len_start..i])
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| {
                        DrizzleError::InvalidTorrent("Invalid string length in info".to_string())
                    })?;
                i += 1 + len;
            }
            b'e' => {
                depth -= 1;
                i += 1;
                if depth == 0 {
                    pos = i;
                    break;
                }
            }
            _ => {
                return Err(DrizzleError::InvalidTorrent(
                    "Unexpected byte in info dict".to_string(),
                ))
            }
        }
    }

    if pos == 0 {
        return Err(DrizzleError::InvalidTorrent(
            "Unterminated info dict".to_string(),
        ));
    }

    Ok(&data[..pos])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    fn single_file_torrent(length: u64, piece_length: u64, num_hashes: usize) -> Vec<u8> {
        let hashes = vec![b'h'; num_hashes * 20];
        let mut data = Vec::new();
        data.extend_from_slice(b"d8:announce20:http://tracker/trace4:infod6:lengthi");
        data.extend_from_slice(length.to_string().as_bytes());
        data.extend_from_slice(b"e4:name8:test.bin12:piece lengthi");
        data.extend_from_slice(piece_length.to_string().as_bytes());
        data.extend_from_slice(b"e6:pieces");
        data.extend_from_slice(hashes.len().to_string().as_bytes());
        data.push(b':');
        data.extend_from_slice(&hashes);
        data.extend_from_slice(b"ee");
        data
    }

    fn parse(raw: &[u8]) -> Result<Metainfo> {
        Metainfo::from_bencode(decode(raw)?, raw)
    }

    #[test]
    fn test_single_file_metainfo() {
        let raw = single_file_torrent(1000, 300, 4);
        let metainfo = parse(&raw).unwrap();

        assert_eq!(metainfo.announce, "http://tracker/trace");
        assert_eq!(metainfo.info.name, "test.bin");
        assert_eq!(metainfo.info.total_length, 1000);
        assert_eq!(metainfo.info.piece_length, 300);
        assert_eq!(metainfo.info.pieces.len(), 4);
        assert_eq!(metainfo.info_hash_hex().len(), 40);
    }

    #[test]
    fn test_inconsistent_length_rejected() {
        // 4 hashes of 300-byte pieces cannot describe 2000 bytes
        let raw = single_file_torrent(2000, 300, 4);
        assert!(matches!(
            parse(&raw),
            Err(DrizzleError::Config(ConfigError::InconsistentLength { .. }))
        ));

        // Nor can they describe 900 (that is 3 pieces' worth)
        let raw = single_file_torrent(900, 300, 4);
        assert!(parse(&raw).is_err());
    }

    #[test]
    fn test_evenly_divisible_length_accepted() {
        let raw = single_file_torrent(1200, 300, 4);
        assert!(parse(&raw).is_ok());
    }

    #[test]
    fn test_info_hash_covers_exactly_the_info_dict() {
        let raw = single_file_torrent(1000, 300, 4);
        let metainfo = parse(&raw).unwrap();

        // Recompute by hand over the raw info dict bytes
        let start = raw.windows(6).position(|w| w == b"4:info").unwrap() + 6;
        let end = raw.len() - 1; // outer dict's trailing 'e'
        let mut hasher = Sha1::new();
        hasher.update(&raw[start..end]);
        let expected: [u8; 20] = hasher.finalize().into();

        assert_eq!(metainfo.info_hash, expected);
    }
}
