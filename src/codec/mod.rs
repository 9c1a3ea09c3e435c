//! Binary codecs: commands, scripts, and MSG text archives.
pub mod command_reader;
pub mod command_writer;
pub mod msg;
pub mod script;

pub use command_reader::CommandReader;
pub use command_writer::CommandWriter;
pub use script::{ScriptReader, ScriptWriter};
