//! File utilities.
use anyhow::Result;

/// Reads a whole file into a vector of bytes.
pub fn read_file<P: AsRef<std::path::Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|e| anyhow::anyhow!("Failed to read file {}: {}", path.display(), e))
}

/// Writes a whole buffer to a file, creating parent directories as needed.
pub fn write_file<P: AsRef<std::path::Path>>(path: P, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, data)
        .map_err(|e| anyhow::anyhow!("Failed to write file {}: {}", path.display(), e))
}

/// Reads a whole file into a string.
pub fn read_file_to_string<P: AsRef<std::path::Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read file {}: {}", path.display(), e))
}
