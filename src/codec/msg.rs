//! MSG text archive decoding and encoding.
//!
//! An archive is a table of little-endian u16 script offsets (relative to
//! the archive start) followed by the scripts themselves in declared
//! order. The declared order is authoritative; offsets need not be
//! monotonic.
use super::script::{ScriptReader, ScriptWriter};
use crate::ext::io::*;
use crate::script::{Script, TextArchive};
use crate::utils::encoding::TextCodec;
use anyhow::Result;
use std::io::{Read, Seek, SeekFrom, Write};

/// Reads a text archive from the current stream position.
///
/// `fixed_size` bounds the archive in bytes; 0 leaves the last script
/// open-ended, reading until one of its elements ends the script.
pub fn read_archive<T: Read + Seek>(
    stream: &mut T,
    fixed_size: u64,
    reader: &ScriptReader,
) -> Result<TextArchive> {
    let start = stream.stream_position()?;
    let mut offsets: Vec<u16> = Vec::new();
    let mut first = u64::MAX;
    let mut read_bytes = 0u64;
    loop {
        if read_bytes == first {
            break;
        }
        if read_bytes > first {
            // A pointer landed inside the table; this is not an archive.
            return Err(anyhow::anyhow!(
                "Not a text archive: pointer table ends mid-entry"
            ));
        }
        let offset = stream
            .read_u16()
            .map_err(|_| anyhow::anyhow!("Not a text archive: pointer table is truncated"))?;
        read_bytes += 2;
        first = first.min(offset as u64);
        offsets.push(offset);
    }
    let script_count = (first / 2) as usize;
    if offsets.first().map(|&o| o as u64) != Some(2 * script_count as u64) {
        return Err(anyhow::anyhow!(
            "Not a text archive: first pointer does not follow the table"
        ));
    }
    let mut archive = TextArchive::with_random_identifier();
    for i in 0..script_count {
        let offset = offsets[i] as u64;
        let budget = if i + 1 < script_count {
            let next = offsets[i + 1] as u64;
            if next < offset {
                return Err(anyhow::anyhow!(
                    "Script {} has negative size ({} before {})",
                    i,
                    next,
                    offset
                ));
            }
            Some(next - offset)
        } else if fixed_size > 0 {
            if fixed_size < offset {
                return Err(anyhow::anyhow!(
                    "Script {} starts at {} beyond the archive size {}",
                    i,
                    offset,
                    fixed_size
                ));
            }
            Some(fixed_size - offset)
        } else {
            None
        };
        let expected = start + offset;
        let pos = stream.stream_position()?;
        if pos != expected {
            if reader.settings().ignore_pointer_sync_errors {
                crate::get_counter().inc_warning();
                eprintln!(
                    "Warning: script {} declared at {} but stream is at {}; repositioning",
                    i, expected, pos
                );
                stream.seek(SeekFrom::Start(expected))?;
            } else {
                return Err(anyhow::anyhow!(
                    "Script {} declared at offset {} but the previous script ended at {}",
                    i,
                    expected,
                    pos
                ));
            }
        }
        let script = match budget {
            Some(budget) => {
                let mut region = StreamRegion::new(&mut *stream, expected, expected + budget)?;
                reader.read_script(&mut region)?
            }
            None => match reader.read_script(stream) {
                Ok(script) => script,
                Err(e) => {
                    crate::get_counter().inc_warning();
                    eprintln!("Warning: last script failed to decode: {}", e);
                    Script::new(reader.preferred_database_name())
                }
            },
        };
        archive.scripts.push(script);
    }
    Ok(archive)
}

/// Writes a text archive: the pointer table first, then every script in
/// order. Empty scripts are written too; their pointers simply coincide
/// with the next script's.
pub fn write_archive<W: Write + Seek>(
    archive: &TextArchive,
    writer: &mut W,
    codec: &TextCodec,
) -> Result<()> {
    let count = archive.scripts.len();
    let start = writer.stream_position()?;
    writer.write_all(&vec![0u8; 2 * count])?;
    let script_writer = ScriptWriter::new(codec);
    let mut offsets = Vec::with_capacity(count);
    for script in &archive.scripts {
        let offset = writer.stream_position()? - start;
        if offset > 0xFFFF {
            return Err(anyhow::anyhow!(
                "Archive {} too large: script offset {} exceeds 0xFFFF",
                archive.identifier(),
                offset
            ));
        }
        offsets.push(offset as u16);
        script_writer.write_script(script, writer)?;
    }
    let end = writer.stream_position()?;
    for (i, offset) in offsets.iter().enumerate() {
        writer.write_u16_at(start + 2 * i as u64, *offset)?;
    }
    writer.seek(SeekFrom::Start(end))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::command::{CommandDefinition, CommandElementDefinition, EndType};
    use crate::db::mask::MaskedByte;
    use crate::db::param::ParameterDefinition;
    use crate::db::CommandDatabase;
    use crate::ext::io::{MemReader, MemWriter};
    use crate::types::DecodeSettings;

    fn test_db() -> CommandDatabase {
        let mut db = CommandDatabase::new("demo");
        db.add(
            CommandDefinition::builder("end")
                .base(vec![MaskedByte::exact(0x08)])
                .end_type(EndType::Always)
                .build()
                .unwrap(),
        )
        .unwrap();
        db.add(
            CommandDefinition::builder("wait")
                .base(vec![MaskedByte::exact(0x01)])
                .element(CommandElementDefinition::single(
                    ParameterDefinition::number("frames", 1, 0, 8),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
        db
    }

    fn reader<'a>(db: &'a CommandDatabase, codec: &'a TextCodec) -> ScriptReader<'a> {
        ScriptReader::new(vec![db], codec, DecodeSettings::default())
    }

    #[test]
    fn minimal_archive() {
        let db = test_db();
        let codec = TextCodec::Utf8;
        let reader = reader(&db, &codec);
        let mut stream = MemReader::new(vec![0x02, 0x00, 0x08]);
        let archive = read_archive(&mut stream, 0, &reader).unwrap();
        assert_eq!(archive.scripts.len(), 1);
        assert_eq!(archive.scripts[0].len(), 1);
        let mut out = MemWriter::new();
        write_archive(&archive, &mut out, &codec).unwrap();
        assert_eq!(out.into_inner(), vec![0x02, 0x00, 0x08]);
    }

    #[test]
    fn rejects_streams_that_are_not_archives() {
        let db = test_db();
        let codec = TextCodec::Utf8;
        let reader = reader(&db, &codec);
        // Truncated pointer table.
        assert!(read_archive(&mut MemReader::new(vec![0x04]), 0, &reader).is_err());
        // Odd first pointer lands mid-entry.
        assert!(read_archive(&mut MemReader::new(vec![0x03, 0x00, 0x00, 0x08]), 0, &reader).is_err());
        // Second pointer points back into the table.
        assert!(read_archive(
            &mut MemReader::new(vec![0x04, 0x00, 0x02, 0x00, 0x08, 0x08]),
            0,
            &reader
        )
        .is_err());
    }

    #[test]
    fn bounded_scripts_use_declared_sizes() {
        let db = test_db();
        let codec = TextCodec::Utf8;
        let reader = reader(&db, &codec);
        // Two scripts: [wait 5, end] and [end].
        let data = vec![0x04, 0x00, 0x07, 0x00, 0x01, 0x05, 0x08, 0x08];
        let mut stream = MemReader::new(data.clone());
        let archive = read_archive(&mut stream, data.len() as u64, &reader).unwrap();
        assert_eq!(archive.scripts.len(), 2);
        assert_eq!(archive.scripts[0].len(), 2);
        assert_eq!(archive.scripts[1].len(), 1);
        let mut out = MemWriter::new();
        write_archive(&archive, &mut out, &codec).unwrap();
        assert_eq!(out.into_inner(), data);
    }

    #[test]
    fn pointer_sync_strict_and_loose() {
        let db = test_db();
        let codec = TextCodec::Utf8;
        // First script's content ends before its declared region does not
        // match the second offset: content is 3 bytes but offsets say 4.
        let data = vec![0x04, 0x00, 0x08, 0x00, 0x01, 0x05, 0x08, 0xFF, 0x08];
        let strict = reader(&db, &codec);
        assert!(read_archive(&mut MemReader::new(data.clone()), 9, &strict).is_err());
        let loose = ScriptReader::new(
            vec![&db],
            &codec,
            DecodeSettings {
                ignore_pointer_sync_errors: true,
                ..Default::default()
            },
        );
        let mut stream = MemReader::new(data);
        let archive = read_archive(&mut stream, 9, &loose).unwrap();
        assert_eq!(archive.scripts.len(), 2);
        assert_eq!(archive.scripts[1].len(), 1);
    }

    #[test]
    fn unbounded_last_script_reads_to_end_marker() {
        let db = test_db();
        let codec = TextCodec::Utf8;
        let reader = reader(&db, &codec);
        let mut stream = MemReader::new(vec![0x02, 0x00, 0x01, 0x07, 0x08, 0xAA, 0xBB]);
        let archive = read_archive(&mut stream, 0, &reader).unwrap();
        assert_eq!(archive.scripts[0].len(), 2);
        // Reading stopped at the end command, leaving trailing bytes.
        assert_eq!(stream.pos, 5);
    }
}
