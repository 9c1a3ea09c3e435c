//! Reading and writing archives inside a surrounding ROM file.
pub mod container;
pub mod index;
pub mod lz77;
