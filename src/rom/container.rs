//! Placing text archives inside a ROM file.
use super::index::FileIndexEntry;
use super::lz77;
use crate::codec::msg;
use crate::codec::ScriptReader;
use crate::ext::io::*;
use crate::script::TextArchive;
use crate::types::{InsertSettings, Lz77Mode};
use crate::utils::encoding::TextCodec;
use anyhow::{Context, Result};
use std::io::{Read, Seek, SeekFrom, Write};

/// Pointers keep their top 7 bits; only the low 25 address an archive.
const POINTER_MASK: u32 = 0x01FF_FFFF;

/// Formats an archive identifier from its file offset.
pub fn identifier_for_offset(offset: u32) -> String {
    format!("{:06X}", offset)
}

/// Reads the archive an index entry points at.
pub fn read_archive<T: Read + Seek>(
    file: &mut T,
    entry: &FileIndexEntry,
    reader: &ScriptReader,
) -> Result<TextArchive> {
    file.seek(SeekFrom::Start(entry.offset as u64))?;
    let result = if entry.compressed {
        let data = lz77::decompress(file)
            .with_context(|| format!("In archive at {:#X}", entry.offset))?;
        let data = if entry.size_header {
            strip_size_header(&data)?
        } else {
            data
        };
        let size = data.len() as u64;
        msg::read_archive(&mut MemReader::new(data), size, reader)
    } else if entry.size_header {
        let mut header = [0u8; 4];
        file.read_exact(&mut header)?;
        let size = read_size_header(&header)?;
        msg::read_archive(file, size, reader)
    } else {
        msg::read_archive(file, entry.size as u64, reader)
    };
    let mut archive =
        result.with_context(|| format!("In archive at {:#X}", entry.offset))?;
    archive.set_identifier(identifier_for_offset(entry.offset))?;
    Ok(archive)
}

fn read_size_header(header: &[u8; 4]) -> Result<u64> {
    if header[0] != 0 {
        return Err(anyhow::anyhow!(
            "Invalid size header: leading byte is {:#04X}",
            header[0]
        ));
    }
    let size = header[1] as u64 | (header[2] as u64) << 8 | (header[3] as u64) << 16;
    size.checked_sub(4)
        .ok_or_else(|| anyhow::anyhow!("Invalid size header: size {} is under 4", size))
}

fn strip_size_header(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 4 {
        return Err(anyhow::anyhow!("Data too short for a size header"));
    }
    let header: [u8; 4] = data[..4].try_into().unwrap();
    let size = read_size_header(&header)? as usize;
    if 4 + size > data.len() {
        return Err(anyhow::anyhow!(
            "Size header says {} byte(s), but only {} are present",
            size,
            data.len() - 4
        ));
    }
    Ok(data[4..4 + size].to_vec())
}

fn prepend_size_header(payload: Vec<u8>) -> Result<Vec<u8>> {
    let total = payload.len() + 4;
    if total > 0xFFFFFF {
        return Err(anyhow::anyhow!(
            "Archive too large for a size header: {} bytes",
            total
        ));
    }
    let mut out = Vec::with_capacity(total);
    out.extend([
        0x00,
        (total & 0xFF) as u8,
        ((total >> 8) & 0xFF) as u8,
        ((total >> 16) & 0xFF) as u8,
    ]);
    out.extend(payload);
    Ok(out)
}

/// Writes an archive back into the file.
///
/// The payload reuses the entry's offset when it still fits, otherwise it
/// goes to the free-space offset, aligned up to a multiple of 4. Every
/// registered pointer is rewritten to the final offset. The free-space
/// offset, index entry, and archive identifier are only updated once the
/// payload write has succeeded.
pub fn write_archive<T: Read + Write + Seek>(
    file: &mut T,
    entry: &mut FileIndexEntry,
    archive: &mut TextArchive,
    codec: &TextCodec,
    settings: &mut InsertSettings,
) -> Result<()> {
    let mut body = MemWriter::new();
    msg::write_archive(archive, &mut body, codec)?;
    let mut payload = body.into_inner();
    if entry.size_header {
        payload = prepend_size_header(payload)?;
    }
    if entry.compressed {
        payload = match settings.lz77_mode {
            Lz77Mode::Compress => lz77::compress(&payload)?,
            Lz77Mode::Wrap => lz77::wrap(&payload)?,
        };
    }
    let relocated = payload.len() as u64 > entry.size as u64;
    let offset = if relocated {
        (settings.free_space_offset + 3) & !3
    } else {
        entry.offset
    };
    pad_file_to(file, offset as u64)?;
    file.seek(SeekFrom::Start(offset as u64))?;
    file.write_all(&payload)?;
    for &pointer in &entry.pointers {
        let mut word = [0u8; 4];
        file.seek(SeekFrom::Start(pointer as u64))?;
        file.read_exact(&mut word)?;
        let word = u32::from_le_bytes(word);
        let repointed = (word & !POINTER_MASK) | (offset & POINTER_MASK);
        file.write_u32_at(pointer as u64, repointed)?;
    }
    if relocated {
        settings.free_space_offset = offset + payload.len() as u32;
    }
    if settings.update_file_index {
        entry.offset = offset;
        entry.size = payload.len() as u32;
        archive.set_identifier(identifier_for_offset(offset))?;
    }
    Ok(())
}

/// Extends the file with 0xFF padding up to `offset`.
fn pad_file_to<T: Write + Seek>(file: &mut T, offset: u64) -> Result<()> {
    let len = file.stream_length()?;
    if offset > len {
        file.seek(SeekFrom::End(0))?;
        let mut remaining = offset - len;
        let chunk = [0xFFu8; 1024];
        while remaining > 0 {
            let n = remaining.min(chunk.len() as u64) as usize;
            file.write_all(&chunk[..n])?;
            remaining -= n as u64;
        }
    }
    Ok(())
}

/// Scans the file for 4-byte-aligned words whose low 25 bits address the
/// entry, recording their offsets as pointers. Returns how many new
/// pointers were found.
pub fn search_pointers<T: Read + Seek>(file: &mut T, entry: &mut FileIndexEntry) -> Result<usize> {
    file.seek(SeekFrom::Start(0))?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    let target = entry.offset & POINTER_MASK;
    let mut found = 0;
    for pos in (0..data.len().saturating_sub(3)).step_by(4) {
        let word = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
        if word & POINTER_MASK == target && entry.pointers.insert(pos as u32) {
            found += 1;
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::command::{CommandDefinition, CommandElementDefinition, EndType};
    use crate::db::mask::MaskedByte;
    use crate::db::param::ParameterDefinition;
    use crate::db::CommandDatabase;
    use crate::ext::io::MemWriter;
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

    const ARCHIVE: &[u8] = &[0x02, 0x00, 0x01, 0x07, 0x08];

    fn rom_with_archive_at(offset: usize, payload: &[u8]) -> MemWriter {
        let mut data = vec![0u8; offset];
        data.extend_from_slice(payload);
        MemWriter::from_vec(data)
    }

    #[test]
    fn reads_plain_entry() {
        let db = test_db();
        let codec = TextCodec::Utf8;
        let reader = ScriptReader::new(vec![&db], &codec, DecodeSettings::default());
        let mut rom = rom_with_archive_at(0x40, ARCHIVE);
        let entry = FileIndexEntry::new(0x40, ARCHIVE.len() as u32);
        let archive = read_archive(&mut rom, &entry, &reader).unwrap();
        assert_eq!(archive.identifier(), "000040");
        assert_eq!(archive.scripts.len(), 1);
        assert_eq!(archive.scripts[0].len(), 2);
    }

    #[test]
    fn reads_compressed_entry_with_size_header() {
        let db = test_db();
        let codec = TextCodec::Utf8;
        let reader = ScriptReader::new(vec![&db], &codec, DecodeSettings::default());
        let payload = lz77::compress(&prepend_size_header(ARCHIVE.to_vec()).unwrap()).unwrap();
        let mut rom = rom_with_archive_at(0x20, &payload);
        let mut entry = FileIndexEntry::new(0x20, payload.len() as u32);
        entry.compressed = true;
        entry.size_header = true;
        let archive = read_archive(&mut rom, &entry, &reader).unwrap();
        assert_eq!(archive.scripts.len(), 1);
    }

    #[test]
    fn size_header_layout() {
        let with_header = prepend_size_header(vec![0u8; 0x0C]).unwrap();
        assert_eq!(&with_header[..4], &[0x00, 0x10, 0x00, 0x00]);
        assert_eq!(with_header.len(), 0x10);
        assert_eq!(strip_size_header(&with_header).unwrap(), vec![0u8; 0x0C]);
    }

    #[test]
    fn write_reuses_offset_when_payload_fits() {
        let db = test_db();
        let codec = TextCodec::Utf8;
        let reader = ScriptReader::new(vec![&db], &codec, DecodeSettings::default());
        let mut rom = rom_with_archive_at(0x40, ARCHIVE);
        let mut entry = FileIndexEntry::new(0x40, ARCHIVE.len() as u32);
        let mut archive = read_archive(&mut rom, &entry, &reader).unwrap();
        let mut settings = InsertSettings {
            free_space_offset: 0x100,
            ..Default::default()
        };
        write_archive(&mut rom, &mut entry, &mut archive, &codec, &mut settings).unwrap();
        assert_eq!(entry.offset, 0x40);
        assert_eq!(&rom.data[0x40..0x45], ARCHIVE);
        assert_eq!(settings.free_space_offset, 0x100);
    }

    #[test]
    fn write_relocates_and_repoints_when_payload_grew() {
        let db = test_db();
        let codec = TextCodec::Utf8;
        let reader = ScriptReader::new(vec![&db], &codec, DecodeSettings::default());
        let mut rom = rom_with_archive_at(0x40, ARCHIVE);
        // A pointer to the archive lives at 0x10.
        rom.data[0x10..0x14].copy_from_slice(&0xAB00_0040u32.to_le_bytes());
        let mut entry = FileIndexEntry::new(0x40, 0);
        entry.pointers.insert(0x10);
        entry.size = ARCHIVE.len() as u32;
        let mut archive = read_archive(&mut rom, &entry, &reader).unwrap();
        // Grow the archive so it no longer fits.
        let script = archive.scripts[0].clone();
        archive.scripts.push(script);
        let mut settings = InsertSettings {
            free_space_offset: 0x62,
            ..Default::default()
        };
        write_archive(&mut rom, &mut entry, &mut archive, &codec, &mut settings).unwrap();
        // Aligned up from 0x62.
        assert_eq!(entry.offset, 0x64);
        assert_eq!(archive.identifier(), "000064");
        // Padding bytes up to the new offset are 0xFF.
        assert!(rom.data[0x45..0x64].iter().all(|&b| b == 0xFF));
        let word = u32::from_le_bytes(rom.data[0x10..0x14].try_into().unwrap());
        assert_eq!(word, 0xAA00_0064);
        assert_eq!(settings.free_space_offset, 0x64 + entry.size);
    }

    #[test]
    fn pointer_fix_up_preserves_top_bits() {
        use crate::script::{Script, ScriptElement};
        let mut rom = MemWriter::from_vec(vec![0u8; 0x110]);
        rom.data[0x100..0x104].copy_from_slice(&0xAB12_3456u32.to_le_bytes());
        // A size-0 entry fits nothing, so the payload relocates to the
        // free-space offset at 0x200000.
        let mut entry = FileIndexEntry::new(0, 0);
        entry.pointers.insert(0x100);
        let mut archive = TextArchive::new("000000").unwrap();
        let mut script = Script::new("demo");
        script.push(ScriptElement::Byte(0x08));
        archive.scripts.push(script);
        let codec = TextCodec::Utf8;
        let mut settings = InsertSettings {
            free_space_offset: 0x20_0000,
            update_file_index: false,
            ..Default::default()
        };
        write_archive(&mut rom, &mut entry, &mut archive, &codec, &mut settings).unwrap();
        let word = u32::from_le_bytes(rom.data[0x100..0x104].try_into().unwrap());
        assert_eq!(word, 0xAA20_0000);
        // update_file_index is off; the entry still records the old spot.
        assert_eq!(entry.offset, 0);
        assert_eq!(archive.identifier(), "000000");
    }

    #[test]
    fn pointer_search_finds_aligned_references() {
        let mut data = vec![0u8; 0x30];
        data[0x08..0x0C].copy_from_slice(&0x0800_0020u32.to_le_bytes());
        data[0x0D..0x11].copy_from_slice(&0x0000_0020u32.to_le_bytes());
        data[0x14..0x18].copy_from_slice(&0x0000_0020u32.to_le_bytes());
        let mut rom = MemWriter::from_vec(data);
        let mut entry = FileIndexEntry::new(0x20, 0x10);
        let found = search_pointers(&mut rom, &mut entry).unwrap();
        // The misaligned copy at 0x0D is not counted.
        assert_eq!(found, 2);
        assert_eq!(
            entry.pointers.iter().copied().collect::<Vec<_>>(),
            vec![0x08, 0x14]
        );
    }
}
