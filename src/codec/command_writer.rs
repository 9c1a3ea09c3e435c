//! Command encoding.
use crate::db::param::{OffsetType, ParameterDefinition, StringUnit};
use crate::script::element::{Command, Parameter};
use crate::utils::encoding::TextCodec;
use anyhow::Result;
use std::collections::HashMap;

/// Encodes commands into byte buffers.
///
/// The dual of the command reader: base bytes first, then each element's
/// parameters in storage order, with label offsets recorded as parameters
/// are emitted.
pub struct CommandWriter<'a> {
    codec: &'a TextCodec,
}

impl<'a> CommandWriter<'a> {
    /// Creates a writer using the given text codec for inline strings.
    pub fn new(codec: &'a TextCodec) -> Self {
        Self { codec }
    }

    /// Encodes a command, returning its bytes.
    pub fn write_command(&self, cmd: &Command) -> Result<Vec<u8>> {
        let def = cmd.def();
        let mut bytes: Vec<u8> = def.base.iter().map(|mb| mb.value & mb.mask).collect();
        let mut labels: HashMap<String, i64> = HashMap::new();
        for (edef, element) in def.elements.iter().zip(cmd.elements()) {
            if let Some(ldef) = &edef.length {
                let count = element.entries().len() as i64;
                self.write_number(&mut bytes, ldef, count, &mut labels)?;
            }
            for group in edef.data_groups() {
                for entry in element.entries() {
                    for pdef in group {
                        let param = entry.param(&pdef.name).ok_or_else(|| {
                            anyhow::anyhow!(
                                "Command {:?} is missing parameter {:?}",
                                def.name,
                                pdef.name
                            )
                        })?;
                        if pdef.is_string() {
                            self.write_string(&mut bytes, pdef, param, &mut labels)?;
                        } else {
                            self.write_number(&mut bytes, pdef, param.number()?, &mut labels)?;
                        }
                    }
                }
            }
        }
        let rewind = cmd.def().rewind as usize;
        if rewind > bytes.len() {
            return Err(anyhow::anyhow!(
                "Command {:?} rewinds {} bytes but only wrote {}",
                def.name,
                rewind,
                bytes.len()
            ));
        }
        bytes.truncate(bytes.len() - rewind);
        Ok(bytes)
    }

    fn resolve_base(
        &self,
        pdef: &ParameterDefinition,
        buffer_len: usize,
        labels: &HashMap<String, i64>,
    ) -> Result<i64> {
        match pdef.offset_type {
            OffsetType::Start => Ok(0),
            OffsetType::End => Ok(buffer_len as i64),
            OffsetType::Label => {
                let label = pdef.relative_label.as_deref().unwrap_or_default();
                labels.get(label).copied().ok_or_else(|| {
                    anyhow::anyhow!(
                        "Parameter {:?} references unknown label {:?}",
                        pdef.name,
                        label
                    )
                })
            }
        }
    }

    fn write_number(
        &self,
        bytes: &mut Vec<u8>,
        pdef: &ParameterDefinition,
        value: i64,
        labels: &mut HashMap<String, i64>,
    ) -> Result<()> {
        let base = self.resolve_base(pdef, bytes.len(), labels)?;
        pdef.write_value(bytes, base, value)?;
        labels.insert(pdef.name.clone(), base + pdef.offset);
        Ok(())
    }

    /// Encodes the string into a local buffer first so its length is known
    /// before the paired length field is written, then splices it in.
    fn write_string(
        &self,
        bytes: &mut Vec<u8>,
        pdef: &ParameterDefinition,
        param: &Parameter,
        labels: &mut HashMap<String, i64>,
    ) -> Result<()> {
        let base = self.resolve_base(pdef, bytes.len(), labels)?;
        let sdef = pdef.string_def.as_ref().unwrap();
        let text = param.string()?;
        let encoded = self.codec.encode_strict(text)?;
        let length = match sdef.unit {
            StringUnit::Byte => {
                if sdef.fixed_length > 0 && encoded.len() != sdef.fixed_length {
                    return Err(anyhow::anyhow!(
                        "String of parameter {:?} encodes to {} bytes; exactly {} required",
                        pdef.name,
                        encoded.len(),
                        sdef.fixed_length
                    ));
                }
                encoded.len()
            }
            StringUnit::Char => {
                let chars = text.chars().count();
                if sdef.fixed_length > 0 && chars > sdef.fixed_length {
                    return Err(anyhow::anyhow!(
                        "String of parameter {:?} has {} characters; at most {} fit",
                        pdef.name,
                        chars,
                        sdef.fixed_length
                    ));
                }
                chars
            }
        };
        if pdef.bits > 0 {
            pdef.write_value(bytes, base, length as i64)?;
        }
        let string_start = base + pdef.offset + sdef.offset;
        if string_start < 0 {
            return Err(anyhow::anyhow!(
                "String of parameter {:?} resolves to negative offset {}",
                pdef.name,
                string_start
            ));
        }
        let string_start = string_start as usize;
        if bytes.len() < string_start + encoded.len() {
            bytes.resize(string_start + encoded.len(), 0);
        }
        bytes[string_start..string_start + encoded.len()].copy_from_slice(&encoded);
        labels.insert(pdef.name.clone(), base + pdef.offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::command_reader::CommandReader;
    use crate::db::command::{CommandDefinition, CommandElementDefinition};
    use crate::db::mask::MaskedByte;
    use crate::db::param::StringSubDefinition;
    use crate::db::CommandDatabase;
    use crate::ext::io::MemReader;
    use std::sync::Arc;

    #[test]
    fn writes_base_with_masked_bits_zeroed() {
        let def = CommandDefinition::builder("cmd")
            .base(vec![MaskedByte::new(0xE0, 0xF0), MaskedByte::exact(0x12)])
            .build()
            .unwrap();
        let codec = TextCodec::Utf8;
        let writer = CommandWriter::new(&codec);
        let cmd = Command::new(Arc::new(def));
        assert_eq!(writer.write_command(&cmd).unwrap(), vec![0xE0, 0x12]);
    }

    #[test]
    fn rejects_entry_count_beyond_length_field() {
        let def = CommandDefinition::builder("cmd")
            .base(vec![MaskedByte::exact(0xE0)])
            .element(CommandElementDefinition::multi(
                ParameterDefinition::number("count", 1, 0, 2),
                vec![ParameterDefinition::number("x", 0, 0, 8)],
                vec![1],
            ))
            .build()
            .unwrap();
        let codec = TextCodec::Utf8;
        let writer = CommandWriter::new(&codec);
        let mut cmd = Command::new(Arc::new(def));
        cmd.element_mut("count").unwrap().ensure_entries(3);
        assert!(writer.write_command(&cmd).is_ok());
        // A 2-bit length field cannot hold four entries.
        cmd.element_mut("count").unwrap().ensure_entries(4);
        assert!(writer.write_command(&cmd).is_err());
    }

    #[test]
    fn oversize_rewind_is_an_error() {
        let def = CommandDefinition::builder("cmd")
            .base(vec![MaskedByte::exact(0xE0)])
            .rewind(2)
            .build()
            .unwrap();
        let codec = TextCodec::Utf8;
        let writer = CommandWriter::new(&codec);
        let cmd = Command::new(Arc::new(def));
        assert!(writer.write_command(&cmd).is_err());
    }

    fn roundtrip_db() -> CommandDatabase {
        let mut db = CommandDatabase::new("test");
        let mut option = ParameterDefinition::number("option", 0, 0, 16);
        option.offset_type = OffsetType::End;
        db.add(
            CommandDefinition::builder("menu")
                .base(vec![MaskedByte::exact(0xE2)])
                .element(CommandElementDefinition::multi(
                    ParameterDefinition::number("count", 1, 0, 8),
                    vec![option],
                    vec![1],
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
        let text = ParameterDefinition {
            string_def: Some(StringSubDefinition {
                offset: 1,
                unit: StringUnit::Char,
                fixed_length: 0,
            }),
            ..ParameterDefinition::number("text", 1, 0, 8)
        };
        db.add(
            CommandDefinition::builder("say")
                .base(vec![MaskedByte::exact(0xE5)])
                .element(CommandElementDefinition::single(text))
                .build()
                .unwrap(),
        )
        .unwrap();
        db
    }

    #[test]
    fn command_roundtrip() {
        let db = roundtrip_db();
        let codec = TextCodec::Utf8;
        let reader = CommandReader::new(&db, &codec);
        let writer = CommandWriter::new(&codec);
        for input in [
            vec![0xE2, 0x00],
            vec![0xE2, 0x03, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00],
            vec![0xE5, 0x05, b'h', b'e', b'l', b'l', b'o'],
        ] {
            let mut stream = MemReader::new(input.clone());
            let cmd = reader.read_command(&mut stream).unwrap().unwrap();
            assert!(stream.is_eof());
            assert_eq!(writer.write_command(&cmd).unwrap(), input);
        }
    }

    #[test]
    fn unencodable_string_is_an_error() {
        let db = roundtrip_db();
        let table = crate::utils::encoding::CharTable::parse("41=A\n42=B\n").unwrap();
        let codec = TextCodec::Table(table);
        let writer = CommandWriter::new(&codec);
        let say = db.find_by_name("say")[0].clone();
        let mut cmd = Command::new(say);
        cmd.element_mut("text")
            .unwrap()
            .entry_mut(0)
            .unwrap()
            .param_mut("text")
            .unwrap()
            .set_string("AZ")
            .unwrap();
        assert!(writer.write_command(&cmd).is_err());
    }
}
