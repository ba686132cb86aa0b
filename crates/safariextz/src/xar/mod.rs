//! Reading xar containers.
//!
//! A `.safariextz` file is a xar archive: a fixed header, a zlib-compressed XML
//! table of contents, then a heap holding the TOC checksum, the signature and
//! the file data. This module reads that layout; writing and signing archives
//! is left to the `xar` binary.
//!
//! # Examples
//!
//! ```no_run
//! use safariextz::xar::XarArchive;
//!
//! let mut archive = XarArchive::open_path("test.safariextz")?;
//! archive.verify()?;
//! for path in archive.entry_paths() {
//!     println!("{path}");
//! }
//! # Ok::<(), safariextz::Error>(())
//! ```

pub mod header;
pub mod toc;

#[cfg(test)]
pub(crate) mod test_support;

pub use header::Header;
pub use toc::{Encoding, Entry, EntryType, HeapData, HeapRef, Toc};

use crate::{Error, Result};
use flate2::read::ZlibDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use toc::{ChecksumStyle, FileChecksum};
use tracing::debug;

/// Embedded archive signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub style: String,
    pub certificates: Vec<String>,
    pub data: Vec<u8>,
}

/// An opened xar archive.
pub struct XarArchive<R: Read + Seek> {
    source: R,
    stream_len: u64,
    header: Header,
    compressed_toc: Vec<u8>,
    toc: Toc,
}

/// Read `len` bytes at `offset`, rejecting ranges past the end of the stream
/// before anything is allocated.
fn read_at<R: Read + Seek>(
    source: &mut R,
    stream_len: u64,
    offset: u64,
    len: u64,
) -> Result<Vec<u8>> {
    match offset.checked_add(len) {
        Some(end) if end <= stream_len => {}
        _ => {
            return Err(Error::Xar(format!(
                "Block of {len} bytes at offset {offset} exceeds archive size {stream_len}"
            )))
        }
    }
    let len = usize::try_from(len)
        .map_err(|_| Error::Xar(format!("Heap block too large: {len} bytes")))?;
    let mut data = vec![0u8; len];
    source.seek(SeekFrom::Start(offset))?;
    source.read_exact(&mut data).map_err(|e| {
        Error::Xar(format!(
            "Truncated archive reading {len} bytes at offset {offset}: {e}"
        ))
    })?;
    Ok(data)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::Xar(format!("Failed to decompress: {e}")))?;
    Ok(out)
}

impl XarArchive<BufReader<File>> {
    /// Open an archive file.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::open(BufReader::new(file))
    }
}

impl<R: Read + Seek> XarArchive<R> {
    /// Read the header and the table of contents.
    pub fn open(mut source: R) -> Result<Self> {
        let stream_len = source.seek(SeekFrom::End(0))?;
        let mut fixed = [0u8; header::HEADER_LEN];
        source.seek(SeekFrom::Start(0))?;
        source
            .read_exact(&mut fixed)
            .map_err(|e| Error::Xar(format!("Failed to read header: {e}")))?;
        let header = Header::parse(&fixed)?;

        let compressed_toc = read_at(
            &mut source,
            stream_len,
            header.size as u64,
            header.toc_length_compressed,
        )?;
        let toc_xml = inflate(&compressed_toc)?;
        if toc_xml.len() as u64 != header.toc_length_uncompressed {
            debug!(
                expected = header.toc_length_uncompressed,
                actual = toc_xml.len(),
                "TOC length differs from header"
            );
        }
        let toc_xml = String::from_utf8(toc_xml)
            .map_err(|e| Error::Xar(format!("TOC is not UTF-8: {e}")))?;
        let toc = Toc::parse(&toc_xml)?;

        Ok(Self {
            source,
            stream_len,
            header,
            compressed_toc,
            toc,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn toc(&self) -> &Toc {
        &self.toc
    }

    /// The table of contents exactly as stored, still compressed.
    ///
    /// This is the data covered by the archive signature.
    pub fn compressed_toc(&self) -> &[u8] {
        &self.compressed_toc
    }

    fn read_heap(&mut self, location: HeapRef, len: u64) -> Result<Vec<u8>> {
        let offset = self
            .header
            .heap_offset()
            .and_then(|heap| heap.checked_add(location.offset))
            .ok_or_else(|| {
                Error::Xar(format!("Heap offset {} out of range", location.offset))
            })?;
        read_at(&mut self.source, self.stream_len, offset, len)
    }

    /// Read the embedded signature, if the archive is signed.
    pub fn signature(&mut self) -> Result<Option<Signature>> {
        let Some(info) = self.toc.signature.clone() else {
            return Ok(None);
        };
        let data = self.read_heap(info.location, info.location.size)?;
        Ok(Some(Signature {
            style: info.style,
            certificates: info.certificates,
            data,
        }))
    }

    /// Slash-separated path of every entry, parents before children.
    pub fn entry_paths(&self) -> Vec<String> {
        fn walk(entries: &[Entry], prefix: &str, out: &mut Vec<String>) {
            for entry in entries {
                let path = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", prefix, entry.name)
                };
                out.push(path.clone());
                walk(&entry.children, &path, out);
            }
        }

        let mut out = Vec::new();
        walk(&self.toc.files, "", &mut out);
        out
    }

    /// Find an entry by its slash-separated path.
    pub fn find(&self, path: &str) -> Option<&Entry> {
        let mut entries = &self.toc.files;
        let mut found = None;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let entry = entries.iter().find(|e| e.name == part)?;
            entries = &entry.children;
            found = Some(entry);
        }
        found
    }

    /// Read and decode the contents of a file entry.
    pub fn read_file(&mut self, entry: &Entry) -> Result<Vec<u8>> {
        let Some(ref data) = entry.data else {
            return Ok(Vec::new());
        };
        let archived = self.read_heap(data.location, data.length)?;
        match data.encoding {
            Encoding::Gzip => inflate(&archived),
            Encoding::Stored => Ok(archived),
            Encoding::Other(ref style) => Err(Error::Xar(format!(
                "Unsupported encoding {} for {}",
                style, entry.name
            ))),
        }
    }

    /// Check the TOC checksum and every file's archived and extracted
    /// checksums.
    ///
    /// All mismatches are collected and reported together in one
    /// [`Error::Xar`].
    pub fn verify(&mut self) -> Result<()> {
        let mut errors = Vec::new();

        if let Some(checksum) = self.toc.checksum.clone() {
            let style = ChecksumStyle::from_style(&checksum.style).ok_or_else(|| {
                Error::Xar(format!("Unsupported TOC checksum style {:?}", checksum.style))
            })?;
            let stored = self.read_heap(checksum.location, checksum.location.size)?;
            let actual = style.digest(&self.compressed_toc);
            if stored != actual {
                errors.push(format!(
                    "Checksum mismatch. Expected {}, actual {}",
                    hex::encode(&stored),
                    hex::encode(&actual)
                ));
            }
        }

        let files = self.toc.files.clone();
        for entry in &files {
            self.verify_entry(entry, "", &mut errors)?;
        }

        if !errors.is_empty() {
            return Err(Error::Xar(errors.join(", ")));
        }

        Ok(())
    }

    fn verify_entry(&mut self, entry: &Entry, prefix: &str, errors: &mut Vec<String>) -> Result<()> {
        let path = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{}/{}", prefix, entry.name)
        };

        match entry.entry_type {
            EntryType::Directory => {
                for child in &entry.children {
                    self.verify_entry(child, &path, errors)?;
                }
            }
            EntryType::File => {
                if let Some(ref data) = entry.data {
                    let archived = self.read_heap(data.location, data.length)?;
                    check_digest(&path, "archived", data.archived_checksum.as_ref(), &archived, errors);

                    match self.read_file(entry) {
                        Ok(extracted) => check_digest(
                            &path,
                            "extracted",
                            data.extracted_checksum.as_ref(),
                            &extracted,
                            errors,
                        ),
                        Err(e) => errors.push(format!("{path}: {e}")),
                    }
                }
            }
            EntryType::Other(_) => {}
        }

        Ok(())
    }
}

fn check_digest(
    path: &str,
    kind: &str,
    expected: Option<&FileChecksum>,
    data: &[u8],
    errors: &mut Vec<String>,
) {
    let Some(expected) = expected else {
        return;
    };
    let Some(style) = ChecksumStyle::from_style(&expected.style) else {
        errors.push(format!(
            "Unsupported {} checksum style {:?} for {}",
            kind, expected.style, path
        ));
        return;
    };
    let actual = hex::encode(style.digest(data));
    if actual != expected.value {
        errors.push(format!(
            "Digest mismatch ({}) for {}. Expected {}, actual {}",
            kind, path, expected.value, actual
        ));
    }
}

/// Write the compressed table of contents of `archive` to `dest`.
///
/// Returns the number of bytes written. This is what `xartool` produces as
/// `toc.dat`.
pub fn extract_toc(archive: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<u64> {
    let archive = XarArchive::open_path(archive)?;
    let toc = archive.compressed_toc();
    fs::write(dest.as_ref(), toc)?;
    Ok(toc.len() as u64)
}
