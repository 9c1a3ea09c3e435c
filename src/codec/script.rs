//! Script decoding and encoding.
use super::command_reader::CommandReader;
use super::command_writer::CommandWriter;
use crate::db::CommandDatabase;
use crate::ext::io::*;
use crate::script::{Script, ScriptElement};
use crate::types::DecodeSettings;
use crate::utils::encoding::TextCodec;
use anyhow::Result;
use std::io::{Read, Seek, SeekFrom, Write};

/// Decodes scripts, trying a list of command databases in order of
/// preference.
///
/// A database must explain the whole script; a pass that produced raw byte
/// elements is discarded and the next database tried. Only the last
/// database may keep its byte elements, and only when the most-compatible
/// fallback is accepted.
pub struct ScriptReader<'a> {
    databases: Vec<&'a CommandDatabase>,
    codec: &'a TextCodec,
    settings: DecodeSettings,
}

impl<'a> ScriptReader<'a> {
    /// Creates a reader over the given databases, in order of preference.
    pub fn new(
        databases: Vec<&'a CommandDatabase>,
        codec: &'a TextCodec,
        settings: DecodeSettings,
    ) -> Self {
        Self {
            databases,
            codec,
            settings,
        }
    }

    /// The decode settings.
    pub fn settings(&self) -> DecodeSettings {
        self.settings
    }

    /// The name of the most preferred database.
    pub fn preferred_database_name(&self) -> &str {
        self.databases.first().map(|db| db.name()).unwrap_or("")
    }

    /// Reads one script from the stream. The stream's end bounds the
    /// script; pass a [StreamRegion] for scripts with a byte budget.
    pub fn read_script<T: Read + Seek>(&self, stream: &mut T) -> Result<Script> {
        if self.databases.is_empty() {
            return Err(anyhow::anyhow!("No command databases to decode with"));
        }
        let start = stream.stream_position()?;
        let last = self.databases.len() - 1;
        for (i, db) in self.databases.iter().enumerate() {
            stream.seek(SeekFrom::Start(start))?;
            let script = self.read_with_db(stream, db)?;
            if script.byte_element_count() == 0 {
                return Ok(script);
            }
            if i == last && self.settings.accept_most_compatible_fallback {
                crate::get_counter().inc_warning();
                eprintln!(
                    "Warning: {} byte(s) in script could not be decoded with any database",
                    script.byte_element_count()
                );
                return Ok(script);
            }
        }
        Err(anyhow::anyhow!(
            "No command database fully explains the script"
        ))
    }

    fn read_with_db<T: Read + Seek>(&self, stream: &mut T, db: &CommandDatabase) -> Result<Script> {
        let mut script = Script::new(db.name());
        let reader = CommandReader::new(db, self.codec);
        loop {
            if script
                .elements()
                .last()
                .map(|e| e.ends_script())
                .unwrap_or(false)
            {
                break;
            }
            if let Some(cmd) = reader.read_command(stream)? {
                script.push(ScriptElement::Command(cmd));
                continue;
            }
            if let Some(text) = self.read_text_run(stream, &reader)? {
                script.push(ScriptElement::Text(text));
                continue;
            }
            let mut byte = [0u8; 1];
            if stream.read(&mut byte)? == 0 {
                break;
            }
            script.push(ScriptElement::Byte(byte[0]));
        }
        Ok(script)
    }

    /// Reads a maximal text run: whole code points only, stopping where a
    /// command matches or decoding fails.
    fn read_text_run<T: Read + Seek>(
        &self,
        stream: &mut T,
        reader: &CommandReader,
    ) -> Result<Option<String>> {
        let mut result = String::new();
        let mut probe = vec![0u8; self.codec.max_bytes_per_char()];
        loop {
            if !result.is_empty() {
                let pos = stream.stream_position()?;
                if reader.read_command(stream)?.is_some() {
                    stream.seek(SeekFrom::Start(pos))?;
                    break;
                }
            }
            let available = stream.peek(&mut probe)?;
            match self.codec.try_read_code_point(&probe[..available]) {
                Some((text, used)) => {
                    stream.seek(SeekFrom::Current(used as i64))?;
                    result.push_str(&text);
                }
                None => break,
            }
        }
        if result.is_empty() {
            Ok(None)
        } else {
            Ok(Some(result))
        }
    }
}

/// Encodes scripts back into bytes.
pub struct ScriptWriter<'a> {
    codec: &'a TextCodec,
}

impl<'a> ScriptWriter<'a> {
    /// Creates a writer using the given text codec.
    pub fn new(codec: &'a TextCodec) -> Self {
        Self { codec }
    }

    /// Writes a script's binary form. Directives have no binary form and
    /// are skipped.
    pub fn write_script<W: Write>(&self, script: &Script, writer: &mut W) -> Result<()> {
        let command_writer = CommandWriter::new(self.codec);
        for element in script.elements() {
            match element {
                ScriptElement::Command(cmd) => {
                    writer.write_all(&command_writer.write_command(cmd)?)?
                }
                ScriptElement::Text(text) => writer.write_all(&self.codec.encode_strict(text)?)?,
                ScriptElement::Byte(byte) => writer.write_u8(*byte)?,
                ScriptElement::Directive(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::command::{CommandDefinition, CommandElementDefinition, EndType};
    use crate::db::mask::MaskedByte;
    use crate::db::param::ParameterDefinition;
    use crate::ext::io::{MemReader, MemWriter};

    fn test_db(name: &str) -> CommandDatabase {
        let mut db = CommandDatabase::new(name);
        db.add(
            CommandDefinition::builder("end")
                .base(vec![MaskedByte::exact(0xE6)])
                .end_type(EndType::Always)
                .build()
                .unwrap(),
        )
        .unwrap();
        let mut target = ParameterDefinition::number("target", 1, 0, 8);
        target.is_jump = true;
        target.jump_continue_values.insert(0);
        db.add(
            CommandDefinition::builder("jump")
                .base(vec![MaskedByte::exact(0xE4)])
                .element(CommandElementDefinition::single(target))
                .build()
                .unwrap(),
        )
        .unwrap();
        db
    }

    #[test]
    fn command_text_and_end() {
        let db = test_db("demo");
        let codec = TextCodec::Utf8;
        let reader = ScriptReader::new(vec![&db], &codec, DecodeSettings::default());
        let mut stream = MemReader::new(vec![b'h', b'i', 0xE6, b'x']);
        let script = reader.read_script(&mut stream).unwrap();
        assert_eq!(script.database_name, "demo");
        assert_eq!(script.len(), 2);
        assert!(matches!(&script.elements()[0], ScriptElement::Text(t) if t == "hi"));
        assert!(script.elements()[1].ends_script());
        // Script ended; the trailing byte is left in the stream.
        assert_eq!(stream.pos, 3);
    }

    #[test]
    fn jump_value_decides_script_end() {
        let db = test_db("demo");
        let codec = TextCodec::Utf8;
        let reader = ScriptReader::new(vec![&db], &codec, DecodeSettings::default());
        // Jump to 0 continues; the script runs on to the end command.
        let mut stream = MemReader::new(vec![0xE4, 0x00, 0xE6]);
        let script = reader.read_script(&mut stream).unwrap();
        assert_eq!(script.len(), 2);
        // Any other target ends the script at the jump.
        let mut stream = MemReader::new(vec![0xE4, 0x05, 0xE6]);
        let script = reader.read_script(&mut stream).unwrap();
        assert_eq!(script.len(), 1);
        assert_eq!(stream.pos, 2);
    }

    #[test]
    fn strict_mode_rejects_unknown_bytes() {
        let db = test_db("demo");
        let codec = TextCodec::Utf8;
        let reader = ScriptReader::new(vec![&db], &codec, DecodeSettings::default());
        let mut stream = MemReader::new(vec![0xFF, 0xE6]);
        assert!(reader.read_script(&mut stream).is_err());
    }

    #[test]
    fn loose_mode_keeps_byte_fallbacks_for_last_database() {
        let db = test_db("demo");
        let codec = TextCodec::Utf8;
        let settings = DecodeSettings {
            accept_most_compatible_fallback: true,
            ..Default::default()
        };
        let reader = ScriptReader::new(vec![&db], &codec, settings);
        let mut stream = MemReader::new(vec![0xFF, 0xE6]);
        let script = reader.read_script(&mut stream).unwrap();
        assert_eq!(script.byte_element_count(), 1);
        assert_eq!(script.len(), 2);
    }

    #[test]
    fn earlier_database_wins_when_it_explains_everything() {
        // The first database cannot explain 0xE7; the second can.
        let first = test_db("first");
        let mut second = test_db("second");
        second
            .add(
                CommandDefinition::builder("extra")
                    .base(vec![MaskedByte::exact(0xE7)])
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let codec = TextCodec::Utf8;
        let reader = ScriptReader::new(vec![&first, &second], &codec, DecodeSettings::default());
        let mut stream = MemReader::new(vec![0xE7, 0xE6]);
        let script = reader.read_script(&mut stream).unwrap();
        assert_eq!(script.database_name, "second");
        let mut stream = MemReader::new(vec![0xE6]);
        let script = reader.read_script(&mut stream).unwrap();
        assert_eq!(script.database_name, "first");
    }

    #[test]
    fn text_run_stops_at_command() {
        let db = test_db("demo");
        let codec = TextCodec::Utf8;
        let reader = ScriptReader::new(vec![&db], &codec, DecodeSettings::default());
        let mut stream = MemReader::new(vec![b'a', b'b', 0xE4, 0x07]);
        let script = reader.read_script(&mut stream).unwrap();
        assert_eq!(script.len(), 2);
        assert!(matches!(&script.elements()[0], ScriptElement::Text(t) if t == "ab"));
        assert!(matches!(&script.elements()[1], ScriptElement::Command(_)));
    }

    #[test]
    fn directives_have_no_binary_form() {
        use crate::script::{DirectiveElement, DirectiveKind};
        let codec = TextCodec::Utf8;
        let mut script = Script::new("demo");
        script.push(ScriptElement::Directive(DirectiveElement {
            kind: DirectiveKind::TextBoxSeparator,
            value: None,
        }));
        script.push(ScriptElement::Byte(0x42));
        let mut out = MemWriter::new();
        ScriptWriter::new(&codec)
            .write_script(&script, &mut out)
            .unwrap();
        assert_eq!(out.into_inner(), vec![0x42]);
    }

    #[test]
    fn script_roundtrip() {
        let db = test_db("demo");
        let codec = TextCodec::Utf8;
        let reader = ScriptReader::new(vec![&db], &codec, DecodeSettings::default());
        let input = vec![b'h', b'i', 0xE4, 0x00, b'!', 0xE6];
        let mut stream = MemReader::new(input.clone());
        let script = reader.read_script(&mut stream).unwrap();
        let mut out = MemWriter::new();
        ScriptWriter::new(&codec)
            .write_script(&script, &mut out)
            .unwrap();
        assert_eq!(out.into_inner(), input);
    }
}
