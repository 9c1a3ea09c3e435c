//! A Rust library for decoding, editing, and re-inserting MSG text archives
//! in GBA cartridge images.
//!
//! For more information, please visit the [GitHub repository](https://github.com/lifegpc/textarc).
pub mod codec;
pub mod db;
pub mod ext;
pub mod rom;
pub mod script;
pub mod types;
pub mod utils;

lazy_static::lazy_static! {
    static ref COUNTER: utils::counter::Counter = utils::counter::Counter::new();
}

/// Returns a reference to the global counter instance.
pub fn get_counter() -> &'static utils::counter::Counter {
    &COUNTER
}
