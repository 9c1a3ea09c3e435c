//! Command decoding.
use crate::db::command::CommandDefinition;
use crate::db::param::{OffsetType, ParameterDefinition, StringUnit};
use crate::db::CommandDatabase;
use crate::ext::io::*;
use crate::script::element::Command;
use crate::utils::encoding::TextCodec;
use anyhow::Result;
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

/// Decodes commands from a byte stream against one database.
///
/// Matching is greedy: the stream is stepped through the lookup trie one
/// byte at a time and the deepest usable definition wins, unless a
/// definition reaches its priority length first. Data-dependent parse
/// failures are not errors; they yield no match so the caller can fall
/// back to text or raw bytes.
pub struct CommandReader<'a> {
    db: &'a CommandDatabase,
    codec: &'a TextCodec,
}

impl<'a> CommandReader<'a> {
    /// Creates a reader over a database and text codec.
    pub fn new(db: &'a CommandDatabase, codec: &'a TextCodec) -> Self {
        Self { db, codec }
    }

    /// The database this reader matches against.
    pub fn database(&self) -> &CommandDatabase {
        self.db
    }

    /// Reads one command from the current stream position.
    ///
    /// Returns `Ok(None)` and restores the position when no definition
    /// matches or every matching definition fails to parse.
    pub fn read_command<T: Read + Seek>(&self, stream: &mut T) -> Result<Option<Command>> {
        let start = stream.stream_position()?;
        let matched = self.match_definition(stream)?;
        let primary = match matched {
            Some(primary) => primary,
            None => {
                stream.seek(SeekFrom::Start(start))?;
                return Ok(None);
            }
        };
        let mut candidates = vec![primary];
        candidates.extend_from_slice(self.db.alternatives(primary));
        for index in candidates {
            stream.seek(SeekFrom::Start(start))?;
            if let Some(cmd) = self.read_with_def(stream, self.db.get(index))? {
                return Ok(Some(cmd));
            }
        }
        stream.seek(SeekFrom::Start(start))?;
        Ok(None)
    }

    /// Walks the trie over the stream and picks a definition.
    ///
    /// Stops when no live branch can continue (using the best candidate so
    /// far) or when the stream runs out mid-match (no match). A priority
    /// candidate beats the deepest terminal; ties between priority
    /// candidates at one depth are ambiguous and decide nothing.
    fn match_definition<T: Read + Seek>(&self, stream: &mut T) -> Result<Option<usize>> {
        let mut walker = self.db.walker();
        let mut best_terminal = None;
        let mut priority = None;
        loop {
            if walker.at_end() {
                break;
            }
            let mut byte = [0u8; 1];
            if stream.read(&mut byte)? == 0 {
                return Ok(None);
            }
            if !walker.step(byte[0]) {
                break;
            }
            let depth = walker.depth();
            let mut priority_here = None;
            let mut ambiguous = false;
            for index in walker.current_values() {
                let def = self.db.get(index);
                if !def.look_ahead {
                    best_terminal = Some(index);
                }
                if def.priority_length > 0 && depth >= def.priority_length {
                    if priority_here.is_none() {
                        priority_here = Some(index);
                    } else {
                        ambiguous = true;
                    }
                }
            }
            if !ambiguous && priority_here.is_some() {
                priority = priority_here;
            }
        }
        Ok(priority.or(best_terminal))
    }

    /// Parses one command with a fixed definition; `Ok(None)` on any
    /// data-dependent failure.
    fn read_with_def<T: Read + Seek>(
        &self,
        stream: &mut T,
        def: &Arc<CommandDefinition>,
    ) -> Result<Option<Command>> {
        let start = stream.stream_position()?;
        let mut bytes = vec![0u8; def.base.len()];
        if stream.read_most(&mut bytes)? < def.base.len() {
            return Ok(None);
        }
        for (byte, mb) in bytes.iter().zip(&def.base) {
            if !mb.matches_byte(*byte) {
                return Ok(None);
            }
        }
        let mut cmd = Command::new(def.clone());
        let mut labels: HashMap<String, i64> = HashMap::new();
        for (index, edef) in def.elements.iter().enumerate() {
            let count = match &edef.length {
                Some(ldef) => {
                    match self.read_number(stream, &mut bytes, ldef, &mut labels)? {
                        Some(value) if value >= 0 => value as usize,
                        _ => return Ok(None),
                    }
                }
                None => 1,
            };
            for group in edef.data_groups() {
                for i in 0..count {
                    cmd.elements_mut()[index].ensure_entries(i + 1);
                    for pdef in group {
                        let value = if pdef.is_string() {
                            match self.read_string(stream, &mut bytes, pdef, &mut labels)? {
                                Some(s) => Value::String(s),
                                None => return Ok(None),
                            }
                        } else {
                            match self.read_number(stream, &mut bytes, pdef, &mut labels)? {
                                Some(n) => Value::Number(n),
                                None => return Ok(None),
                            }
                        };
                        let entry = cmd.elements_mut()[index].entry_mut(i).unwrap();
                        let param = entry
                            .param_mut(&pdef.name)
                            .ok_or_else(|| anyhow::anyhow!("Missing parameter {:?}", pdef.name))?;
                        match value {
                            Value::Number(n) => param.set_number(n)?,
                            Value::String(s) => param.set_string(s)?,
                        }
                    }
                }
            }
        }
        if def.rewind as usize > bytes.len() {
            return Ok(None);
        }
        stream.seek(SeekFrom::Start(start + bytes.len() as u64 - def.rewind as u64))?;
        Ok(Some(cmd))
    }

    fn resolve_base(
        &self,
        pdef: &ParameterDefinition,
        buffer_len: usize,
        labels: &HashMap<String, i64>,
    ) -> Option<i64> {
        match pdef.offset_type {
            OffsetType::Start => Some(0),
            OffsetType::End => Some(buffer_len as i64),
            OffsetType::Label => labels.get(pdef.relative_label.as_deref()?).copied(),
        }
    }

    /// Reads a number field, extending the buffer from the stream as
    /// needed. `Ok(None)` on unresolved label or insufficient bytes.
    fn read_number<T: Read + Seek>(
        &self,
        stream: &mut T,
        bytes: &mut Vec<u8>,
        pdef: &ParameterDefinition,
        labels: &mut HashMap<String, i64>,
    ) -> Result<Option<i64>> {
        let base = match self.resolve_base(pdef, bytes.len(), labels) {
            Some(base) => base,
            None => return Ok(None),
        };
        let field_start = base + pdef.offset;
        let field_end = field_start + pdef.min_bytes() as i64;
        if field_start < 0 || !extend(stream, bytes, field_end as usize)? {
            return Ok(None);
        }
        let value = pdef.read_value(bytes, base)?;
        labels.insert(pdef.name.clone(), field_start);
        Ok(Some(value))
    }

    /// Reads an inline string. `Ok(None)` on invalid code points, nonzero
    /// fallback count, insufficient bytes, or a negative length field.
    fn read_string<T: Read + Seek>(
        &self,
        stream: &mut T,
        bytes: &mut Vec<u8>,
        pdef: &ParameterDefinition,
        labels: &mut HashMap<String, i64>,
    ) -> Result<Option<String>> {
        let base = match self.resolve_base(pdef, bytes.len(), labels) {
            Some(base) => base,
            None => return Ok(None),
        };
        let sdef = pdef.string_def.as_ref().unwrap();
        let mut limit = usize::MAX;
        if pdef.bits > 0 {
            let field_end = base + pdef.offset + pdef.min_bytes() as i64;
            if base + pdef.offset < 0 || !extend(stream, bytes, field_end as usize)? {
                return Ok(None);
            }
            let value = pdef.read_value(bytes, base)?;
            if value < 0 {
                return Ok(None);
            }
            limit = value as usize;
        }
        let length = match sdef.fixed_length {
            0 => limit,
            fixed => limit.min(fixed),
        };
        if length == usize::MAX {
            return Ok(None);
        }
        let string_start = base + pdef.offset + sdef.offset;
        if string_start < 0 {
            return Ok(None);
        }
        let string_start = string_start as usize;
        // Fast-forward over any gap before the string.
        if !extend(stream, bytes, string_start)? {
            return Ok(None);
        }
        let text = match sdef.unit {
            StringUnit::Char => {
                let mut text = String::new();
                let mut pos = string_start;
                for _ in 0..length {
                    let code_point = loop {
                        if let Some(found) = self.codec.try_read_code_point(&bytes[pos..]) {
                            break Some(found);
                        }
                        if bytes.len() - pos >= self.codec.max_bytes_per_char()
                            || !extend(stream, bytes, bytes.len() + 1)?
                        {
                            break None;
                        }
                    };
                    match code_point {
                        Some((s, used)) => {
                            text.push_str(&s);
                            pos += used;
                        }
                        None => return Ok(None),
                    }
                }
                text
            }
            StringUnit::Byte => {
                if !extend(stream, bytes, string_start + length)? {
                    return Ok(None);
                }
                let (text, fallbacks) =
                    self.codec.decode(&bytes[string_start..string_start + length]);
                if fallbacks != 0 {
                    return Ok(None);
                }
                text
            }
        };
        labels.insert(pdef.name.clone(), base + pdef.offset);
        Ok(Some(text))
    }
}

enum Value {
    Number(i64),
    String(String),
}

/// Extends `bytes` from the stream up to `len` bytes; false if the stream
/// ends first.
fn extend<T: Read>(stream: &mut T, bytes: &mut Vec<u8>, len: usize) -> Result<bool> {
    if bytes.len() >= len {
        return Ok(true);
    }
    let missing = len - bytes.len();
    let mut extra = vec![0u8; missing];
    let got = stream.read_most(&mut extra)?;
    bytes.extend_from_slice(&extra[..got]);
    Ok(got == missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::command::{CommandDefinition, CommandElementDefinition, EndType};
    use crate::db::mask::MaskedByte;
    use crate::db::param::{ParameterDefinition, StringSubDefinition, StringUnit};
    use crate::ext::io::MemReader;

    fn codec() -> TextCodec {
        TextCodec::Utf8
    }

    fn end_def() -> CommandDefinition {
        CommandDefinition::builder("end")
            .base(vec![MaskedByte::exact(0xE6)])
            .end_type(EndType::Always)
            .build()
            .unwrap()
    }

    #[test]
    fn reads_simple_parameter() {
        let mut db = CommandDatabase::new("test");
        db.add(
            CommandDefinition::builder("wait")
                .base(vec![MaskedByte::exact(0xE0)])
                .element(CommandElementDefinition::single(
                    ParameterDefinition::number("frames", 1, 0, 16),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
        let codec = codec();
        let reader = CommandReader::new(&db, &codec);
        let mut stream = MemReader::new(vec![0xE0, 0x34, 0x12, 0xFF]);
        let cmd = reader.read_command(&mut stream).unwrap().unwrap();
        assert_eq!(cmd.name(), "wait");
        let frames = cmd.element("frames").unwrap().entries()[0]
            .param("frames")
            .unwrap()
            .number()
            .unwrap();
        assert_eq!(frames, 0x1234);
        assert_eq!(stream.pos, 3);
    }

    #[test]
    fn no_match_restores_position() {
        let mut db = CommandDatabase::new("test");
        db.add(end_def()).unwrap();
        let codec = codec();
        let reader = CommandReader::new(&db, &codec);
        let mut stream = MemReader::new(vec![0x41, 0xE6]);
        assert!(reader.read_command(&mut stream).unwrap().is_none());
        assert_eq!(stream.pos, 0);
    }

    #[test]
    fn eof_mid_match_is_no_match() {
        let mut db = CommandDatabase::new("test");
        db.add(
            CommandDefinition::builder("two")
                .base(vec![MaskedByte::exact(0xAA), MaskedByte::exact(0xBB)])
                .build()
                .unwrap(),
        )
        .unwrap();
        let codec = codec();
        let reader = CommandReader::new(&db, &codec);
        let mut stream = MemReader::new(vec![0xAA]);
        assert!(reader.read_command(&mut stream).unwrap().is_none());
        assert_eq!(stream.pos, 0);
    }

    #[test]
    fn priority_beats_deeper_walk() {
        // D1 matches any AA; D2 matches AA BB and wins via priority once
        // two bytes are in.
        let mut db = CommandDatabase::new("test");
        db.add(
            CommandDefinition::builder("d1")
                .base(vec![MaskedByte::exact(0xAA)])
                .build()
                .unwrap(),
        )
        .unwrap();
        db.add(
            CommandDefinition::builder("d2")
                .base(vec![MaskedByte::exact(0xAA), MaskedByte::exact(0xBB)])
                .priority_length(2)
                .build()
                .unwrap(),
        )
        .unwrap();
        let codec = codec();
        let reader = CommandReader::new(&db, &codec);
        let mut stream = MemReader::new(vec![0xAA, 0xBB, 0xCC]);
        let cmd = reader.read_command(&mut stream).unwrap().unwrap();
        assert_eq!(cmd.name(), "d2");
        let mut stream = MemReader::new(vec![0xAA, 0xCC, 0x00]);
        let cmd = reader.read_command(&mut stream).unwrap().unwrap();
        assert_eq!(cmd.name(), "d1");
        assert_eq!(stream.pos, 1);
    }

    #[test]
    fn look_ahead_definitions_never_match_terminally() {
        let mut db = CommandDatabase::new("test");
        db.add(
            CommandDefinition::builder("peek")
                .base(vec![MaskedByte::exact(0xAA)])
                .look_ahead()
                .build()
                .unwrap(),
        )
        .unwrap();
        let codec = codec();
        let reader = CommandReader::new(&db, &codec);
        let mut stream = MemReader::new(vec![0xAA, 0xBB]);
        assert!(reader.read_command(&mut stream).unwrap().is_none());
        assert_eq!(stream.pos, 0);
    }

    #[test]
    fn alternatives_tried_in_order() {
        // Both share base 0xE1; the first needs two more bytes, the second
        // only one, so short input falls through to the alternative.
        let mut db = CommandDatabase::new("test");
        db.add(
            CommandDefinition::builder("long")
                .base(vec![MaskedByte::exact(0xE1)])
                .element(CommandElementDefinition::single(
                    ParameterDefinition::number("value", 1, 0, 16),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
        db.add(
            CommandDefinition::builder("short")
                .base(vec![MaskedByte::exact(0xE1)])
                .element(CommandElementDefinition::single(
                    ParameterDefinition::number("value", 1, 0, 8),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
        let codec = codec();
        let reader = CommandReader::new(&db, &codec);
        let mut stream = MemReader::new(vec![0xE1, 0x05]);
        let cmd = reader.read_command(&mut stream).unwrap().unwrap();
        assert_eq!(cmd.name(), "short");
    }

    #[test]
    fn reads_data_groups() {
        // count, then `count` a-values followed by `count` b-values.
        let mut a = ParameterDefinition::number("a", 0, 0, 8);
        a.offset_type = crate::db::param::OffsetType::End;
        let mut b = ParameterDefinition::number("b", 0, 0, 8);
        b.offset_type = crate::db::param::OffsetType::End;
        let mut db = CommandDatabase::new("test");
        db.add(
            CommandDefinition::builder("menu")
                .base(vec![MaskedByte::exact(0xE2)])
                .element(CommandElementDefinition::multi(
                    ParameterDefinition::number("count", 1, 0, 8),
                    vec![a, b],
                    vec![1, 1],
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
        let codec = codec();
        let reader = CommandReader::new(&db, &codec);
        let mut stream = MemReader::new(vec![0xE2, 0x02, 0x0A, 0x0B, 0x14, 0x15]);
        let cmd = reader.read_command(&mut stream).unwrap().unwrap();
        let element = cmd.element("count").unwrap();
        assert_eq!(element.entries().len(), 2);
        assert_eq!(
            element.entries()[0].param("a").unwrap().number().unwrap(),
            0x0A
        );
        assert_eq!(
            element.entries()[1].param("a").unwrap().number().unwrap(),
            0x0B
        );
        assert_eq!(
            element.entries()[0].param("b").unwrap().number().unwrap(),
            0x14
        );
        assert_eq!(
            element.entries()[1].param("b").unwrap().number().unwrap(),
            0x15
        );
        assert!(stream.is_eof());
    }

    #[test]
    fn reads_variable_length_string() {
        let param = ParameterDefinition {
            string_def: Some(StringSubDefinition {
                offset: 1,
                unit: StringUnit::Char,
                fixed_length: 0,
            }),
            ..ParameterDefinition::number("text", 1, 0, 8)
        };
        let mut db = CommandDatabase::new("test");
        db.add(
            CommandDefinition::builder("say")
                .base(vec![MaskedByte::exact(0xE5)])
                .element(CommandElementDefinition::single(param))
                .build()
                .unwrap(),
        )
        .unwrap();
        let codec = codec();
        let reader = CommandReader::new(&db, &codec);
        let mut stream = MemReader::new(vec![0xE5, 0x02, b'h', b'i', b'!']);
        let cmd = reader.read_command(&mut stream).unwrap().unwrap();
        let text = cmd.element("text").unwrap().entries()[0]
            .param("text")
            .unwrap()
            .string()
            .unwrap()
            .to_string();
        assert_eq!(text, "hi");
        assert_eq!(stream.pos, 4);
    }

    #[test]
    fn rewind_moves_stream_back() {
        let mut db = CommandDatabase::new("test");
        db.add(
            CommandDefinition::builder("peek")
                .base(vec![MaskedByte::exact(0xE3)])
                .element(CommandElementDefinition::single(
                    ParameterDefinition::number("next", 1, 0, 8),
                ))
                .rewind(1)
                .build()
                .unwrap(),
        )
        .unwrap();
        let codec = codec();
        let reader = CommandReader::new(&db, &codec);
        let mut stream = MemReader::new(vec![0xE3, 0x42]);
        let cmd = reader.read_command(&mut stream).unwrap().unwrap();
        assert_eq!(
            cmd.element("next").unwrap().entries()[0]
                .param("next")
                .unwrap()
                .number()
                .unwrap(),
            0x42
        );
        // The peeked byte stays in the stream.
        assert_eq!(stream.pos, 1);
    }

    #[test]
    fn label_offsets_resolve_against_earlier_parameter() {
        let first = ParameterDefinition::number("first", 1, 0, 8);
        let second = ParameterDefinition {
            offset_type: crate::db::param::OffsetType::Label,
            relative_label: Some("first".to_string()),
            ..ParameterDefinition::number("second", 2, 0, 8)
        };
        let mut db = CommandDatabase::new("test");
        db.add(
            CommandDefinition::builder("pair")
                .base(vec![MaskedByte::exact(0xE4)])
                .element(CommandElementDefinition::single(first))
                .element(CommandElementDefinition::single(second))
                .build()
                .unwrap(),
        )
        .unwrap();
        let codec = codec();
        let reader = CommandReader::new(&db, &codec);
        // first sits at offset 1 and records label 1; second reads at
        // label(1) + 2 = 3.
        let mut stream = MemReader::new(vec![0xE4, 0x11, 0x00, 0x33]);
        let cmd = reader.read_command(&mut stream).unwrap().unwrap();
        assert_eq!(
            cmd.element("second").unwrap().entries()[0]
                .param("second")
                .unwrap()
                .number()
                .unwrap(),
            0x33
        );
        assert_eq!(stream.pos, 4);
    }
}
