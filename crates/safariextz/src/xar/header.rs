//! Fixed-size xar header.
//!
//! All fields are big-endian:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | magic `xar!` |
//! | 4 | 2 | header size |
//! | 6 | 2 | version |
//! | 8 | 8 | compressed TOC length |
//! | 16 | 8 | uncompressed TOC length |
//! | 24 | 4 | checksum algorithm |

use crate::{Error, Result};

/// `xar!`
pub const XAR_MAGIC: u32 = 0x7861_7221;

/// Minimum header length; larger headers carry extra fields we skip.
pub const HEADER_LEN: usize = 28;

pub const XAR_CHECKSUM_NONE: u32 = 0;
pub const XAR_CHECKSUM_SHA1: u32 = 1;
pub const XAR_CHECKSUM_MD5: u32 = 2;
pub const XAR_CHECKSUM_OTHER: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub size: u16,
    pub version: u16,
    pub toc_length_compressed: u64,
    pub toc_length_uncompressed: u64,
    pub checksum_algorithm: u32,
}

fn read_be_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn read_be_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn read_be_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

impl Header {
    /// Parse and validate a header.
    ///
    /// Rejects a wrong magic, any version other than 1, and MD5 checksums.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::Xar(format!(
                "Header too short: {} bytes",
                data.len()
            )));
        }

        let header = Header {
            magic: read_be_u32(data, 0),
            size: read_be_u16(data, 4),
            version: read_be_u16(data, 6),
            toc_length_compressed: read_be_u64(data, 8),
            toc_length_uncompressed: read_be_u64(data, 16),
            checksum_algorithm: read_be_u32(data, 24),
        };

        if header.magic != XAR_MAGIC {
            return Err(Error::Xar(format!(
                "Not a xar archive (magic {:#010x})",
                header.magic
            )));
        }

        if header.version != 1 {
            return Err(Error::Xar(format!(
                "Unsupported archive version {}",
                header.version
            )));
        }

        if (header.size as usize) < HEADER_LEN {
            return Err(Error::Xar(format!("Invalid header size {}", header.size)));
        }

        match header.checksum_algorithm {
            XAR_CHECKSUM_NONE | XAR_CHECKSUM_SHA1 | XAR_CHECKSUM_OTHER => {}
            XAR_CHECKSUM_MD5 => {
                return Err(Error::Xar("Unsupported checksum type md5".into()));
            }
            other => {
                return Err(Error::Xar(format!("Unsupported checksum type {other}")));
            }
        }

        Ok(header)
    }

    /// Serialize to the 28-byte on-disk form.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.magic.to_be_bytes());
        out[4..6].copy_from_slice(&self.size.to_be_bytes());
        out[6..8].copy_from_slice(&self.version.to_be_bytes());
        out[8..16].copy_from_slice(&self.toc_length_compressed.to_be_bytes());
        out[16..24].copy_from_slice(&self.toc_length_uncompressed.to_be_bytes());
        out[24..28].copy_from_slice(&self.checksum_algorithm.to_be_bytes());
        out
    }

    /// Offset of the heap: header followed by the compressed TOC.
    ///
    /// `None` when the declared lengths overflow.
    pub fn heap_offset(&self) -> Option<u64> {
        (self.size as u64).checked_add(self.toc_length_compressed)
    }
}
