pub mod args;
pub mod codec;
pub mod db;
pub mod ext;
pub mod rom;
pub mod script;
pub mod types;
pub mod utils;

use anyhow::Result;
use clap::Parser;
use codec::ScriptReader;
use ext::io::MemReader;
use rom::index::FileIndex;
use types::*;
use utils::encoding::{CharTable, TextCodec};

lazy_static::lazy_static! {
    static ref COUNTER: utils::counter::Counter = utils::counter::Counter::new();
}

/// Returns a reference to the global counter instance.
pub fn get_counter() -> &'static utils::counter::Counter {
    &COUNTER
}

fn build_codec(arg: &args::Arg) -> Result<TextCodec> {
    match arg.encoding {
        TextEncoding::Utf8 => Ok(TextCodec::Utf8),
        TextEncoding::Cp932 => Ok(TextCodec::Sjis),
        TextEncoding::Table => {
            let path = arg
                .table
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("--encoding table requires --table"))?;
            Ok(TextCodec::Table(CharTable::from_file(path)?))
        }
    }
}

fn load_databases(arg: &args::Arg) -> Result<Vec<db::CommandDatabase>> {
    if arg.databases.is_empty() {
        return Err(anyhow::anyhow!(
            "At least one command database is required (--db)"
        ));
    }
    arg.databases.iter().map(db::load::from_file).collect()
}

fn decode_settings(arg: &args::Arg) -> DecodeSettings {
    DecodeSettings {
        ignore_pointer_sync_errors: arg.loose,
        accept_most_compatible_fallback: arg.loose,
    }
}

fn unpack(arg: &args::Arg, rom: &str, index: &str, output: &str) -> Result<()> {
    let codec = build_codec(arg)?;
    let databases = load_databases(arg)?;
    let index = FileIndex::from_file(index)?;
    let mut rom = MemReader::new(utils::files::read_file(rom)?);
    let reader = ScriptReader::new(databases.iter().collect(), &codec, decode_settings(arg));
    let output = std::path::Path::new(output);
    for entry in index.entries() {
        let result = rom::container::read_archive(&mut rom, entry, &reader).and_then(|archive| {
            let mut encoded = ext::io::MemWriter::new();
            codec::msg::write_archive(&archive, &mut encoded, &codec)?;
            let path = output.join(format!("{}.msg", archive.identifier()));
            utils::files::write_file(&path, encoded.as_slice())?;
            println!("{} -> {}", archive.identifier(), path.display());
            Ok(())
        });
        match result {
            Ok(()) => COUNTER.inc(ArchiveResult::Ok),
            Err(e) => {
                COUNTER.inc_error();
                eprintln!("Error unpacking archive at {:#X}: {}", entry.offset, e);
                if arg.backtrace {
                    eprintln!("Backtrace: {}", e.backtrace());
                }
            }
        }
    }
    Ok(())
}

fn pack(
    arg: &args::Arg,
    rom_path: &str,
    index_path: &str,
    input: &str,
    output: Option<&str>,
    free_space: Option<u32>,
    wrap: bool,
    write_index: bool,
) -> Result<()> {
    let codec = build_codec(arg)?;
    let databases = load_databases(arg)?;
    let mut index = FileIndex::from_file(index_path)?;
    let mut rom = ext::io::MemWriter::from_vec(utils::files::read_file(rom_path)?);
    let reader = ScriptReader::new(databases.iter().collect(), &codec, decode_settings(arg));
    let mut settings = InsertSettings {
        free_space_offset: free_space.unwrap_or(rom.data.len() as u32),
        update_file_index: true,
        lz77_mode: if wrap { Lz77Mode::Wrap } else { Lz77Mode::Compress },
    };
    let offsets: Vec<u32> = index.entries().map(|e| e.offset).collect();
    for offset in offsets {
        let result = pack_one(&mut rom, &mut index, offset, input, &codec, &reader, &mut settings);
        match result {
            Ok(ArchiveResult::Ignored) => COUNTER.inc(ArchiveResult::Ignored),
            Ok(ok) => {
                COUNTER.inc(ok);
                println!("Packed archive at {:#X}", offset);
            }
            Err(e) => {
                COUNTER.inc_error();
                eprintln!("Error packing archive at {:#X}: {}", offset, e);
                if arg.backtrace {
                    eprintln!("Backtrace: {}", e.backtrace());
                }
            }
        }
    }
    utils::files::write_file(output.unwrap_or(rom_path), &rom.data)?;
    if write_index {
        utils::files::write_file(index_path, index.serialize().as_bytes())?;
    }
    Ok(())
}

fn pack_one(
    rom: &mut ext::io::MemWriter,
    index: &mut FileIndex,
    offset: u32,
    input: &str,
    codec: &TextCodec,
    reader: &ScriptReader,
    settings: &mut InsertSettings,
) -> Result<ArchiveResult> {
    let identifier = rom::container::identifier_for_offset(offset);
    let path = std::path::Path::new(input).join(format!("{}.msg", identifier));
    if !path.exists() {
        return Ok(ArchiveResult::Ignored);
    }
    let data = utils::files::read_file(&path)?;
    let size = data.len() as u64;
    let mut archive = codec::msg::read_archive(&mut MemReader::new(data), size, reader)?;
    archive.set_identifier(identifier)?;
    // The entry is re-inserted under its (possibly new) offset.
    let mut entry = index
        .remove(offset)
        .ok_or_else(|| anyhow::anyhow!("Entry disappeared from the index"))?;
    let result = rom::container::write_archive(rom, &mut entry, &mut archive, codec, settings);
    index.insert(entry);
    result.map(|_| ArchiveResult::Ok)
}

fn scan(arg: &args::Arg, rom: &str, index_path: &str) -> Result<()> {
    let mut index = FileIndex::from_file(index_path)?;
    let mut rom = MemReader::new(utils::files::read_file(rom)?);
    for entry in index.entries_mut() {
        match rom::container::search_pointers(&mut rom, entry) {
            Ok(found) => {
                println!("{:#X}: {} new pointer(s)", entry.offset, found);
                COUNTER.inc(ArchiveResult::Ok);
            }
            Err(e) => {
                COUNTER.inc_error();
                eprintln!("Error scanning for {:#X}: {}", entry.offset, e);
                if arg.backtrace {
                    eprintln!("Backtrace: {}", e.backtrace());
                }
            }
        }
    }
    utils::files::write_file(index_path, index.serialize().as_bytes())?;
    Ok(())
}

fn main() {
    let arg = args::Arg::parse();
    let result = match &arg.command {
        args::Command::Unpack { rom, index, output } => unpack(&arg, rom, index, output),
        args::Command::Pack {
            rom,
            index,
            input,
            output,
            free_space,
            wrap,
            write_index,
        } => pack(
            &arg,
            rom,
            index,
            input,
            output.as_deref(),
            *free_space,
            *wrap,
            *write_index,
        ),
        args::Command::Scan { rom, index } => scan(&arg, rom, index),
    };
    if let Err(e) = result {
        COUNTER.inc_error();
        eprintln!("Error: {}", e);
        if arg.backtrace {
            eprintln!("Backtrace: {}", e.backtrace());
        }
    }
    eprintln!("{}", std::ops::Deref::deref(&COUNTER));
}
