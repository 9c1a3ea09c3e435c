//! Basic types
use clap::ValueEnum;

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
/// Text encoding (for CLI)
pub enum TextEncoding {
    /// UTF-8 encoding
    Utf8,
    #[value(alias("jis"))]
    /// Shift-JIS encoding
    Cp932,
    /// Game-specific character table (requires --table)
    Table,
}

impl Default for TextEncoding {
    fn default() -> Self {
        TextEncoding::Utf8
    }
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
/// How archive payloads are stored inside the file
pub enum Lz77Mode {
    /// LZ77 compression (GBA BIOS format)
    Compress,
    /// Uncompressed data in an LZ77 container (literal runs only)
    Wrap,
}

impl Default for Lz77Mode {
    fn default() -> Self {
        Lz77Mode::Compress
    }
}

/// Options for decoding archives and scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeSettings {
    /// Reposition to the declared script offset instead of failing when the
    /// stream is off-sync after the previous script.
    pub ignore_pointer_sync_errors: bool,
    /// Allow the last command database to emit raw byte elements for input
    /// it cannot otherwise explain.
    pub accept_most_compatible_fallback: bool,
}

/// Options for inserting archives into a file.
#[derive(Debug, Clone, Copy)]
pub struct InsertSettings {
    /// Where to place archives that no longer fit at their original offset.
    /// Advanced past every allocation made through it.
    pub free_space_offset: u32,
    /// Update the file index entry (offset/size) after a successful write.
    pub update_file_index: bool,
    /// Compression mode for entries flagged as compressed.
    pub lz77_mode: Lz77Mode,
}

impl Default for InsertSettings {
    fn default() -> Self {
        Self {
            free_space_offset: 0,
            update_file_index: true,
            lz77_mode: Lz77Mode::Compress,
        }
    }
}

/// Result of an archive operation, for the exit summary.
pub enum ArchiveResult {
    /// Operation completed successfully.
    Ok,
    /// Operation completed without any changes.
    Ignored,
}
