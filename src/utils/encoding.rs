//! Encoding utilities.
//!
//! Script text is handled through [TextCodec], which exposes the two
//! operations the codecs need: conservative decoding (whole code points
//! only, so a reader never consumes half a glyph) and fallback-counting
//! encoding/decoding (unmappable symbols are substituted and counted,
//! never thrown).
use anyhow::Result;
use encoding::{DecoderTrap, EncoderTrap, Encoding as EncodingTrait};
use std::collections::HashMap;

/// Sentinel substituted for undecodable input in ignore-fallback mode.
pub const REPLACEMENT: char = '\u{FFFD}';

/// A text codec for script contents.
#[derive(Debug, Clone)]
pub enum TextCodec {
    /// UTF-8
    Utf8,
    /// Shift-JIS (CP932)
    Sjis,
    /// Game-specific character table
    Table(CharTable),
}

impl TextCodec {
    /// Returns the maximum number of bytes a single code point may occupy.
    pub fn max_bytes_per_char(&self) -> usize {
        match self {
            TextCodec::Utf8 => 4,
            TextCodec::Sjis => 2,
            TextCodec::Table(table) => table.max_key_len,
        }
    }

    /// Returns an upper bound on the number of characters `bytes` bytes can
    /// decode to.
    pub fn max_chars_per_bytes(&self, bytes: usize) -> usize {
        match self {
            TextCodec::Utf8 | TextCodec::Sjis => bytes,
            TextCodec::Table(table) => bytes * table.max_text_len,
        }
    }

    /// Tries to read a single code point from the start of `buf`.
    ///
    /// Returns the decoded text and the number of bytes consumed, or `None`
    /// if the buffer starts with an invalid or incomplete code point.
    /// Never consumes a partial code point.
    pub fn try_read_code_point(&self, buf: &[u8]) -> Option<(String, usize)> {
        if buf.is_empty() {
            return None;
        }
        match self {
            TextCodec::Utf8 => {
                let len = match buf[0] {
                    0x00..=0x7F => 1,
                    0xC2..=0xDF => 2,
                    0xE0..=0xEF => 3,
                    0xF0..=0xF4 => 4,
                    _ => return None,
                };
                if buf.len() < len {
                    return None;
                }
                std::str::from_utf8(&buf[..len])
                    .ok()
                    .map(|s| (s.to_string(), len))
            }
            TextCodec::Sjis => {
                let len = match buf[0] {
                    0x81..=0x9F | 0xE0..=0xFC => 2,
                    _ => 1,
                };
                if buf.len() < len {
                    return None;
                }
                encoding::codec::japanese::Windows31JEncoding
                    .decode(&buf[..len], DecoderTrap::Strict)
                    .ok()
                    .map(|s| (s, len))
            }
            TextCodec::Table(table) => table.longest_match(buf),
        }
    }

    /// Decodes a whole buffer, substituting [REPLACEMENT] for undecodable
    /// input. Returns the decoded string and the fallback count.
    pub fn decode(&self, data: &[u8]) -> (String, usize) {
        let mut result = String::new();
        let mut fallbacks = 0;
        let mut pos = 0;
        while pos < data.len() {
            match self.try_read_code_point(&data[pos..]) {
                Some((s, len)) => {
                    result.push_str(&s);
                    pos += len;
                }
                None => {
                    result.push(REPLACEMENT);
                    fallbacks += 1;
                    pos += 1;
                }
            }
        }
        (result, fallbacks)
    }

    /// Decodes a whole buffer, failing if any input is undecodable.
    pub fn decode_strict(&self, data: &[u8]) -> Result<String> {
        let (s, fallbacks) = self.decode(data);
        if fallbacks != 0 {
            return Err(anyhow::anyhow!(
                "Could not decode {} byte(s) in {:?}",
                fallbacks,
                data
            ));
        }
        Ok(s)
    }

    /// Encodes a string, substituting `?` for unmappable characters.
    /// Returns the encoded bytes and the fallback count.
    pub fn encode(&self, data: &str) -> (Vec<u8>, usize) {
        match self {
            TextCodec::Utf8 => (data.as_bytes().to_vec(), 0),
            TextCodec::Sjis => {
                let mut result = Vec::new();
                let mut fallbacks = 0;
                for c in data.chars() {
                    let mut tmp = [0u8; 4];
                    match encoding::codec::japanese::Windows31JEncoding
                        .encode(c.encode_utf8(&mut tmp), EncoderTrap::Strict)
                    {
                        Ok(bytes) => result.extend(bytes),
                        Err(_) => {
                            result.push(b'?');
                            fallbacks += 1;
                        }
                    }
                }
                (result, fallbacks)
            }
            TextCodec::Table(table) => table.encode(data),
        }
    }

    /// Encodes a string, failing if any character is unmappable.
    pub fn encode_strict(&self, data: &str) -> Result<Vec<u8>> {
        let (bytes, fallbacks) = self.encode(data);
        if fallbacks != 0 {
            return Err(anyhow::anyhow!(
                "Could not encode {} character(s) in {:?}",
                fallbacks,
                data
            ));
        }
        Ok(bytes)
    }
}

/// A game-specific character table mapping byte sequences to text.
///
/// Tables are parsed from the `HH[HH...]=text` line format commonly used by
/// ROM-hacking tools. `;`, `#` and `//` start a comment.
#[derive(Debug, Clone)]
pub struct CharTable {
    by_bytes: HashMap<Vec<u8>, String>,
    // Sorted by text length descending so encode can match greedily.
    by_text: Vec<(String, Vec<u8>)>,
    max_key_len: usize,
    max_text_len: usize,
}

impl CharTable {
    /// Parses a character table from its text form.
    pub fn parse(text: &str) -> Result<Self> {
        let mut by_bytes = HashMap::new();
        let mut by_text = Vec::new();
        let mut max_key_len = 1;
        let mut max_text_len = 1;
        for (lineno, line) in text.lines().enumerate() {
            // Comments are full-line only; values may contain any character.
            let line = line.trim_end_matches(['\r', '\n']);
            let trimmed = line.trim_start();
            if trimmed.is_empty()
                || trimmed.starts_with(';')
                || trimmed.starts_with('#')
                || trimmed.starts_with("//")
            {
                continue;
            }
            let (key, value) = trimmed.split_once('=').ok_or_else(|| {
                anyhow::anyhow!("Invalid table entry on line {}: missing '='", lineno + 1)
            })?;
            let key = key.trim();
            if key.is_empty() || key.len() % 2 != 0 {
                return Err(anyhow::anyhow!(
                    "Invalid hex key on line {}: {:?}",
                    lineno + 1,
                    key
                ));
            }
            let mut bytes = Vec::with_capacity(key.len() / 2);
            for i in (0..key.len()).step_by(2) {
                let b = u8::from_str_radix(&key[i..i + 2], 16).map_err(|_| {
                    anyhow::anyhow!("Invalid hex key on line {}: {:?}", lineno + 1, key)
                })?;
                bytes.push(b);
            }
            if value.is_empty() {
                return Err(anyhow::anyhow!("Empty text on line {}", lineno + 1));
            }
            max_key_len = max_key_len.max(bytes.len());
            max_text_len = max_text_len.max(value.chars().count());
            if by_bytes.insert(bytes.clone(), value.to_string()).is_some() {
                return Err(anyhow::anyhow!(
                    "Duplicate key {:?} on line {}",
                    key,
                    lineno + 1
                ));
            }
            by_text.push((value.to_string(), bytes));
        }
        if by_bytes.is_empty() {
            return Err(anyhow::anyhow!("Character table has no entries"));
        }
        by_text.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Ok(Self {
            by_bytes,
            by_text,
            max_key_len,
            max_text_len,
        })
    }

    /// Loads a character table from a file.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Self::parse(&super::files::read_file_to_string(path)?)
    }

    fn longest_match(&self, buf: &[u8]) -> Option<(String, usize)> {
        let max = self.max_key_len.min(buf.len());
        for len in (1..=max).rev() {
            if let Some(text) = self.by_bytes.get(&buf[..len]) {
                return Some((text.clone(), len));
            }
        }
        None
    }

    fn encode(&self, data: &str) -> (Vec<u8>, usize) {
        let mut result = Vec::new();
        let mut fallbacks = 0;
        let mut rest = data;
        'outer: while !rest.is_empty() {
            for (text, bytes) in &self.by_text {
                if rest.starts_with(text.as_str()) {
                    result.extend_from_slice(bytes);
                    rest = &rest[text.len()..];
                    continue 'outer;
                }
            }
            let c = rest.chars().next().unwrap();
            rest = &rest[c.len_utf8()..];
            fallbacks += 1;
        }
        (result, fallbacks)
    }
}

#[test]
fn test_utf8_code_points() {
    let codec = TextCodec::Utf8;
    assert_eq!(
        codec.try_read_code_point("中文".as_bytes()),
        Some(("中".to_string(), 3))
    );
    assert_eq!(codec.try_read_code_point(b"A rest"), Some(("A".to_string(), 1)));
    // Truncated multi-byte sequence is not consumed.
    assert_eq!(codec.try_read_code_point(&[0xE4, 0xB8]), None);
    assert_eq!(codec.try_read_code_point(&[0xFF]), None);
}

#[test]
fn test_sjis_code_points() {
    let codec = TextCodec::Sjis;
    assert_eq!(
        codec.try_read_code_point(&[130, 171, 130, 225]),
        Some(("き".to_string(), 2))
    );
    assert_eq!(codec.try_read_code_point(&[130]), None);
    let (bytes, fallbacks) = codec.encode("きゃ");
    assert_eq!(bytes, vec![130, 171, 130, 225]);
    assert_eq!(fallbacks, 0);
}

#[test]
fn test_decode_counts_fallbacks() {
    let codec = TextCodec::Utf8;
    let (s, fallbacks) = codec.decode(&[b'A', 0xFF, b'B']);
    assert_eq!(s, format!("A{}B", REPLACEMENT));
    assert_eq!(fallbacks, 1);
    assert!(codec.decode_strict(&[b'A', 0xFF]).is_err());
}

#[test]
fn test_char_table() {
    let table = CharTable::parse("; test table\n00=A\n01=B\nFE01=[br]\n02=ul\n").unwrap();
    let codec = TextCodec::Table(table);
    assert_eq!(
        codec.try_read_code_point(&[0xFE, 0x01, 0x00]),
        Some(("[br]".to_string(), 2))
    );
    assert_eq!(codec.try_read_code_point(&[0x00]), Some(("A".to_string(), 1)));
    assert_eq!(codec.try_read_code_point(&[0xFF]), None);
    let (s, fallbacks) = codec.decode(&[0x00, 0x01, 0xFE, 0x01, 0x02]);
    assert_eq!(s, "AB[br]ul");
    assert_eq!(fallbacks, 0);
    // Longest text match wins on encode.
    let (bytes, fallbacks) = codec.encode("AB[br]ulZ");
    assert_eq!(bytes, vec![0x00, 0x01, 0xFE, 0x01, 0x02]);
    assert_eq!(fallbacks, 1);
}
