//! The file index: where archives live inside a ROM.
//!
//! Text form, one entry per line:
//!
//! ```text
//! <hex-offset>:[&][%]<hex-size>=<hex-ptr>,<hex-ptr>,...
//! ```
//!
//! `&` marks a compressed entry, `%` an entry with a size header. `//`,
//! `;` and `#` comment to end of line; `/* ... */` nests and may span
//! lines. Hex numbers take an optional `0x` prefix.
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};

/// One archive location inside the file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileIndexEntry {
    /// Byte offset of the archive.
    pub offset: u32,
    /// Size in bytes; 0 means unknown.
    pub size: u32,
    /// Whether the payload is LZ77-compressed.
    pub compressed: bool,
    /// Whether the payload carries a 4-byte size header.
    pub size_header: bool,
    /// Offsets of pointers to this archive, deduplicated.
    pub pointers: BTreeSet<u32>,
}

impl FileIndexEntry {
    /// Creates an entry with no flags or pointers.
    pub fn new(offset: u32, size: u32) -> Self {
        Self {
            offset,
            size,
            compressed: false,
            size_header: false,
            pointers: BTreeSet::new(),
        }
    }

    /// One past the last byte of the entry.
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }

    /// Whether the half-open intervals of two entries intersect.
    pub fn overlaps(&self, other: &FileIndexEntry) -> bool {
        (self.offset as u64).max(other.offset as u64) < self.end().min(other.end())
    }
}

/// A set of index entries, keyed by their unique offsets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileIndex {
    entries: BTreeMap<u32, FileIndexEntry>,
}

impl FileIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry, replacing any entry at the same offset.
    pub fn insert(&mut self, entry: FileIndexEntry) -> Option<FileIndexEntry> {
        self.entries.insert(entry.offset, entry)
    }

    /// Removes the entry at `offset`.
    pub fn remove(&mut self, offset: u32) -> Option<FileIndexEntry> {
        self.entries.remove(&offset)
    }

    /// The entry at `offset`.
    pub fn get(&self, offset: u32) -> Option<&FileIndexEntry> {
        self.entries.get(&offset)
    }

    /// The entry at `offset`, mutably.
    pub fn get_mut(&mut self, offset: u32) -> Option<&mut FileIndexEntry> {
        self.entries.get_mut(&offset)
    }

    /// Looks up the entry a text archive belongs to: the archive
    /// identifier parses as a hexadecimal offset.
    pub fn by_identifier(&self, identifier: &str) -> Option<&FileIndexEntry> {
        let identifier = identifier
            .strip_prefix("0x")
            .or_else(|| identifier.strip_prefix("0X"))
            .unwrap_or(identifier);
        let offset = u32::from_str_radix(identifier, 16).ok()?;
        self.get(offset)
    }

    /// Iterates over the entries in offset order.
    pub fn entries(&self) -> impl Iterator<Item = &FileIndexEntry> {
        self.entries.values()
    }

    /// Iterates over the entries in offset order, mutably.
    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut FileIndexEntry> {
        self.entries.values_mut()
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses the text form.
    pub fn parse(text: &str) -> Result<Self> {
        let mut index = FileIndex::new();
        for (lineno, line) in strip_comments(text)?.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry = parse_entry(line)
                .map_err(|e| anyhow::anyhow!("Invalid index entry on line {}: {}", lineno + 1, e))?;
            if index.insert(entry).is_some() {
                return Err(anyhow::anyhow!(
                    "Duplicate index entry on line {}",
                    lineno + 1
                ));
            }
        }
        Ok(index)
    }

    /// Loads the text form from a file.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Self::parse(&crate::utils::files::read_file_to_string(path)?)
    }

    /// Serializes to the text form. Parsing the output reproduces the
    /// index exactly.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for entry in self.entries.values() {
            out.push_str(&format!("{:X}:", entry.offset));
            if entry.compressed {
                out.push('&');
            }
            if entry.size_header {
                out.push('%');
            }
            out.push_str(&format!("{:X}", entry.size));
            if !entry.pointers.is_empty() {
                out.push('=');
                let pointers: Vec<String> =
                    entry.pointers.iter().map(|p| format!("{:X}", p)).collect();
                out.push_str(&pointers.join(","));
            }
            out.push('\n');
        }
        out
    }
}

/// Removes `//`, `;`, `#` line comments and nested `/* */` block comments.
fn strip_comments(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut block_depth = 0usize;
    while let Some(c) = chars.next() {
        if block_depth > 0 {
            match c {
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    block_depth += 1;
                }
                '*' if chars.peek() == Some(&'/') => {
                    chars.next();
                    block_depth -= 1;
                }
                '\n' => out.push('\n'),
                _ => {}
            }
            continue;
        }
        match c {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                block_depth += 1;
            }
            '/' if chars.peek() == Some(&'/') => {
                skip_line(&mut chars);
                out.push('\n');
            }
            ';' | '#' => {
                skip_line(&mut chars);
                out.push('\n');
            }
            _ => out.push(c),
        }
    }
    if block_depth > 0 {
        return Err(anyhow::anyhow!("Unterminated block comment"));
    }
    Ok(out)
}

fn skip_line(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    for c in chars {
        if c == '\n' {
            break;
        }
    }
}

fn parse_hex(token: &str) -> Result<u32> {
    let token = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    if token.is_empty() {
        return Err(anyhow::anyhow!("empty hex number"));
    }
    u32::from_str_radix(token, 16).map_err(|_| anyhow::anyhow!("bad hex number {:?}", token))
}

fn parse_entry(line: &str) -> Result<FileIndexEntry> {
    let (offset, rest) = line
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("missing ':'"))?;
    let mut entry = FileIndexEntry::new(parse_hex(offset)?, 0);
    let mut rest = rest;
    loop {
        if let Some(r) = rest.strip_prefix('&') {
            entry.compressed = true;
            rest = r;
        } else if let Some(r) = rest.strip_prefix('%') {
            entry.size_header = true;
            rest = r;
        } else {
            break;
        }
    }
    let (size, pointers) = match rest.split_once('=') {
        Some((size, pointers)) => (size, Some(pointers)),
        None => (rest, None),
    };
    entry.size = parse_hex(size)?;
    if let Some(pointers) = pointers {
        if !pointers.is_empty() {
            for pointer in pointers.split(',') {
                entry.pointers.insert(parse_hex(pointer)?);
            }
        }
    }
    Ok(entry)
}

#[test]
fn test_overlap_law() {
    let a = FileIndexEntry::new(0x100, 0x40);
    let mut b = FileIndexEntry::new(0x120, 0x40);
    assert!(a.overlaps(&b));
    assert!(b.overlaps(&a));
    b.offset = 0x140;
    assert!(!a.overlaps(&b));
    // Zero-size entries overlap nothing.
    let empty = FileIndexEntry::new(0x110, 0);
    assert!(!a.overlaps(&empty));
}

#[test]
fn test_parse_entry_forms() {
    let index = FileIndex::parse(
        "// archives\n0E0000:&%1F40=3C0,3C8\n/* block\n   comment */\n0F0000:200\n10AB00:0x80=0x4C0\n",
    )
    .unwrap();
    assert_eq!(index.len(), 3);
    let entry = index.get(0x0E0000).unwrap();
    assert!(entry.compressed);
    assert!(entry.size_header);
    assert_eq!(entry.size, 0x1F40);
    assert_eq!(entry.pointers.iter().copied().collect::<Vec<_>>(), vec![0x3C0, 0x3C8]);
    let entry = index.get(0x0F0000).unwrap();
    assert!(!entry.compressed);
    assert!(entry.pointers.is_empty());
    assert_eq!(index.get(0x10AB00).unwrap().pointers.len(), 1);
}

#[test]
fn test_nested_block_comments() {
    let index = FileIndex::parse("/* a /* nested */ still comment */\n100:0\n").unwrap();
    assert_eq!(index.len(), 1);
    assert!(FileIndex::parse("/* unterminated\n100:0\n").is_err());
}

#[test]
fn test_serialize_parse_idempotent() {
    let mut index = FileIndex::new();
    let mut entry = FileIndexEntry::new(0x0E0000, 0x1F40);
    entry.compressed = true;
    entry.size_header = true;
    entry.pointers.insert(0x3C8);
    entry.pointers.insert(0x3C0);
    index.insert(entry);
    index.insert(FileIndexEntry::new(0x0F0000, 0));
    let text = index.serialize();
    let parsed = FileIndex::parse(&text).unwrap();
    assert_eq!(parsed, index);
    assert_eq!(parsed.serialize(), text);
}

#[test]
fn test_lookup_by_identifier() {
    let mut index = FileIndex::new();
    index.insert(FileIndexEntry::new(0x0E0000, 0x40));
    assert!(index.by_identifier("0E0000").is_some());
    assert!(index.by_identifier("0x0E0000").is_some());
    assert!(index.by_identifier("0F0000").is_none());
    assert!(index.by_identifier("not-hex").is_none());
}
