//! Table-of-contents parsing.
//!
//! The TOC is a zlib-compressed XML document rooted at `<xar><toc>`. It
//! describes where the TOC checksum and the signature live in the heap and
//! lists the archived file tree.

use crate::{Error, Result};
use roxmltree::{Document, Node};
use sha1::{Digest, Sha1};
use sha2::Sha256;

/// A reference to a location within the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapRef {
    pub offset: u64,
    pub size: u64,
}

/// Hash algorithm named by a `style` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumStyle {
    Sha1,
    Sha256,
}

impl ChecksumStyle {
    pub fn from_style(style: &str) -> Option<Self> {
        match style.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Some(ChecksumStyle::Sha1),
            "sha256" | "sha-256" => Some(ChecksumStyle::Sha256),
            _ => None,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            ChecksumStyle::Sha1 => Sha1::digest(data).to_vec(),
            ChecksumStyle::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// `<checksum>` element of the TOC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocChecksum {
    pub location: HeapRef,
    pub style: String,
}

/// `<signature>` element of the TOC, without the signature bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    pub location: HeapRef,
    pub style: String,
    /// Base64 text of each embedded certificate, leaf first.
    pub certificates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// `application/x-gzip`, stored as a zlib stream.
    Gzip,
    /// `application/octet-stream` or no encoding element.
    Stored,
    Other(String),
}

/// A hex digest with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChecksum {
    pub style: String,
    pub value: String,
}

/// `<data>` element of a file entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapData {
    /// Offset in the heap and size after extraction.
    pub location: HeapRef,
    /// Length of the archived (possibly compressed) bytes.
    pub length: u64,
    pub encoding: Encoding,
    pub archived_checksum: Option<FileChecksum>,
    pub extracted_checksum: Option<FileChecksum>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub entry_type: EntryType,
    pub data: Option<HeapData>,
    pub children: Vec<Entry>,
}

/// Parsed table of contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toc {
    pub checksum: Option<TocChecksum>,
    pub signature: Option<SignatureInfo>,
    pub files: Vec<Entry>,
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
}

fn text<'a>(node: Node<'a, '_>) -> &'a str {
    node.text().map(str::trim).unwrap_or("")
}

fn child_u64(node: Node<'_, '_>, name: &str) -> Result<u64> {
    let elt = child(node, name).ok_or_else(|| {
        Error::Xar(format!(
            "<{}> is missing <{}>",
            node.tag_name().name(),
            name
        ))
    })?;
    text(elt).parse::<u64>().map_err(|e| {
        Error::Xar(format!("Invalid <{}> value {:?}: {}", name, text(elt), e))
    })
}

fn parse_heap_ref(node: Node<'_, '_>) -> Result<HeapRef> {
    Ok(HeapRef {
        offset: child_u64(node, "offset")?,
        size: child_u64(node, "size")?,
    })
}

fn style(node: Node<'_, '_>) -> String {
    node.attribute("style").unwrap_or_default().to_string()
}

fn parse_checksum(node: Node<'_, '_>) -> Result<TocChecksum> {
    Ok(TocChecksum {
        location: parse_heap_ref(node)?,
        style: style(node),
    })
}

fn parse_signature(node: Node<'_, '_>) -> Result<SignatureInfo> {
    let certificates = child(node, "KeyInfo")
        .and_then(|key_info| child(key_info, "X509Data"))
        .map(|x509| {
            x509.children()
                .filter(|c| c.is_element())
                .map(|c| text(c).split_whitespace().collect::<String>())
                .collect()
        })
        .unwrap_or_default();

    Ok(SignatureInfo {
        location: parse_heap_ref(node)?,
        style: style(node),
        certificates,
    })
}

fn parse_file_checksum(node: Node<'_, '_>, name: &str) -> Option<FileChecksum> {
    child(node, name).map(|elt| FileChecksum {
        style: style(elt),
        value: text(elt).to_ascii_lowercase(),
    })
}

fn parse_heap_data(node: Node<'_, '_>) -> Result<HeapData> {
    let encoding = match child(node, "encoding").and_then(|e| e.attribute("style")) {
        Some("application/x-gzip") => Encoding::Gzip,
        Some("application/octet-stream") | None => Encoding::Stored,
        Some(other) => Encoding::Other(other.to_string()),
    };

    Ok(HeapData {
        location: parse_heap_ref(node)?,
        length: child_u64(node, "length")?,
        encoding,
        archived_checksum: parse_file_checksum(node, "archived-checksum"),
        extracted_checksum: parse_file_checksum(node, "extracted-checksum"),
    })
}

fn parse_entry(node: Node<'_, '_>) -> Result<Entry> {
    let mut entry = Entry {
        name: String::new(),
        entry_type: EntryType::Other(String::new()),
        data: None,
        children: Vec::new(),
    };

    for elt in node.children().filter(|c| c.is_element()) {
        match elt.tag_name().name() {
            "file" => entry.children.push(parse_entry(elt)?),
            "name" => entry.name = text(elt).to_string(),
            "type" => {
                entry.entry_type = match text(elt) {
                    "file" => EntryType::File,
                    "directory" => EntryType::Directory,
                    other => EntryType::Other(other.to_string()),
                }
            }
            "data" => entry.data = Some(parse_heap_data(elt)?),
            _ => {}
        }
    }

    if entry.name.is_empty() {
        return Err(Error::Xar("File entry without a name".into()));
    }

    Ok(entry)
}

impl Toc {
    /// Parse the uncompressed TOC XML.
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = Document::parse(xml)
            .map_err(|e| Error::Xar(format!("Failed to parse TOC: {e}")))?;

        let xar = doc.root_element();
        if xar.tag_name().name() != "xar" {
            return Err(Error::Xar(format!(
                "Unexpected TOC root <{}>",
                xar.tag_name().name()
            )));
        }
        let toc_root = child(xar, "toc").ok_or_else(|| Error::Xar("Missing <toc>".into()))?;

        let mut toc = Toc::default();
        for elt in toc_root.children().filter(|c| c.is_element()) {
            match elt.tag_name().name() {
                "checksum" => toc.checksum = Some(parse_checksum(elt)?),
                "signature" => toc.signature = Some(parse_signature(elt)?),
                "file" => toc.files.push(parse_entry(elt)?),
                _ => {}
            }
        }

        Ok(toc)
    }
}
