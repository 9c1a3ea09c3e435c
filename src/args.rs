use crate::types::*;
use clap::{ArgAction, Parser, Subcommand};

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let t = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(t, 16).map_err(|_| format!("Invalid hex number: {}", s))
}

/// Tools for extracting and re-inserting MSG text archives
#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "Tools for extracting and re-inserting MSG text archives\nhttps://github.com/lifegpc/textarc"
)]
pub struct Arg {
    #[arg(short = 'd', long = "db", global = true)]
    /// Command database description file(s), most preferred first
    pub databases: Vec<String>,
    #[arg(short = 'e', long, value_enum, global = true, default_value = "utf8")]
    /// Script text encoding
    pub encoding: TextEncoding,
    #[arg(short = 't', long, global = true)]
    /// Character table file (required with --encoding table)
    pub table: Option<String>,
    #[arg(short, long, action = ArgAction::SetTrue, global = true)]
    /// Tolerate off-sync script pointers and keep undecodable bytes as raw
    /// byte elements
    pub loose: bool,
    #[arg(global = true, action = ArgAction::SetTrue, short, long)]
    /// Print backtrace on error
    pub backtrace: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract every indexed text archive from a ROM into .msg files
    Unpack {
        /// ROM file
        rom: String,
        /// File index
        #[arg(short, long)]
        index: String,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: String,
    },
    /// Insert .msg text archives back into a ROM
    Pack {
        /// ROM file
        rom: String,
        /// File index
        #[arg(short, long)]
        index: String,
        /// Directory holding <identifier>.msg files
        #[arg(short = 'I', long)]
        input: String,
        /// Patched ROM path; the input ROM is overwritten if omitted
        #[arg(short, long)]
        output: Option<String>,
        /// Where relocated archives go, as a hex offset
        #[arg(short, long, value_parser = parse_hex_u32)]
        free_space: Option<u32>,
        /// Store compressed entries in an uncompressed LZ77 wrapper
        #[arg(short, long, action = ArgAction::SetTrue)]
        wrap: bool,
        /// Rewrite the file index with the new offsets and sizes
        #[arg(short = 'W', long, action = ArgAction::SetTrue)]
        write_index: bool,
    },
    /// Search the ROM for pointers to indexed archives and record them in
    /// the file index
    Scan {
        /// ROM file
        rom: String,
        /// File index, rewritten in place
        #[arg(short, long)]
        index: String,
    },
}
