//! Builds small in-memory xar archives for tests.

use super::header::{Header, HEADER_LEN, XAR_CHECKSUM_SHA1, XAR_MAGIC};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};
use std::io::Write;

struct TestFile {
    name: String,
    content: Vec<u8>,
    gzip: bool,
}

/// An archive with the given TOC XML and heap, checksum fields untouched.
pub(crate) fn raw_archive(xml: &str, heap: &[u8]) -> Vec<u8> {
    let compressed = zlib(xml.as_bytes());
    let header = Header {
        magic: XAR_MAGIC,
        size: HEADER_LEN as u16,
        version: 1,
        toc_length_compressed: compressed.len() as u64,
        toc_length_uncompressed: xml.len() as u64,
        checksum_algorithm: XAR_CHECKSUM_SHA1,
    };

    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(&compressed);
    out.extend_from_slice(heap);
    out
}

pub(crate) struct ArchiveBuilder {
    root: String,
    files: Vec<TestFile>,
    signature: Option<(Vec<u8>, Vec<String>)>,
    corrupt_toc_checksum: bool,
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

impl ArchiveBuilder {
    /// An archive with a single top-level directory `root`.
    pub(crate) fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            files: Vec::new(),
            signature: None,
            corrupt_toc_checksum: false,
        }
    }

    /// Add a gzip-encoded file under the root directory.
    pub(crate) fn file(mut self, name: &str, content: &[u8]) -> Self {
        self.files.push(TestFile {
            name: name.to_string(),
            content: content.to_vec(),
            gzip: true,
        });
        self
    }

    /// Add an uncompressed file under the root directory.
    pub(crate) fn stored_file(mut self, name: &str, content: &[u8]) -> Self {
        self.files.push(TestFile {
            name: name.to_string(),
            content: content.to_vec(),
            gzip: false,
        });
        self
    }

    pub(crate) fn signature(mut self, data: &[u8], certs: &[&str]) -> Self {
        self.signature = Some((
            data.to_vec(),
            certs.iter().map(|c| c.to_string()).collect(),
        ));
        self
    }

    pub(crate) fn corrupt_toc_checksum(mut self) -> Self {
        self.corrupt_toc_checksum = true;
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let mut heap = vec![0u8; 20];
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<xar>\n <toc>\n");
        xml.push_str("  <checksum style=\"sha1\"><offset>0</offset><size>20</size></checksum>\n");

        if let Some((ref data, ref certs)) = self.signature {
            xml.push_str(&format!(
                "  <signature style=\"RSA\"><offset>{}</offset><size>{}</size>\
                 <KeyInfo xmlns=\"http://www.w3.org/2000/09/xmldsig#\"><X509Data>",
                heap.len(),
                data.len()
            ));
            for cert in certs {
                xml.push_str(&format!("<X509Certificate>{cert}</X509Certificate>"));
            }
            xml.push_str("</X509Data></KeyInfo></signature>\n");
            heap.extend_from_slice(data);
        }

        xml.push_str(&format!(
            "  <file id=\"1\"><name>{}</name><type>directory</type>\n",
            self.root
        ));
        for (i, file) in self.files.iter().enumerate() {
            let archived = if file.gzip {
                zlib(&file.content)
            } else {
                file.content.clone()
            };
            let encoding = if file.gzip {
                "application/x-gzip"
            } else {
                "application/octet-stream"
            };
            xml.push_str(&format!(
                "   <file id=\"{}\"><name>{}</name><type>file</type><data>\
                 <length>{}</length><offset>{}</offset><size>{}</size>\
                 <encoding style=\"{}\"/>\
                 <archived-checksum style=\"sha1\">{}</archived-checksum>\
                 <extracted-checksum style=\"sha1\">{}</extracted-checksum>\
                 </data></file>\n",
                i + 2,
                file.name,
                archived.len(),
                heap.len(),
                file.content.len(),
                encoding,
                sha1_hex(&archived),
                sha1_hex(&file.content),
            ));
            heap.extend_from_slice(&archived);
        }
        xml.push_str("  </file>\n </toc>\n</xar>\n");

        let compressed = zlib(xml.as_bytes());
        let mut checksum = Sha1::digest(&compressed).to_vec();
        if self.corrupt_toc_checksum {
            checksum[0] ^= 0xff;
        }
        heap[..20].copy_from_slice(&checksum);

        let header = Header {
            magic: XAR_MAGIC,
            size: HEADER_LEN as u16,
            version: 1,
            toc_length_compressed: compressed.len() as u64,
            toc_length_uncompressed: xml.len() as u64,
            checksum_algorithm: XAR_CHECKSUM_SHA1,
        };

        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(&compressed);
        out.extend_from_slice(&heap);
        out
    }
}
