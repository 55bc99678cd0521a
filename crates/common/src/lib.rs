//! Shared ground for the harbor crates: the `~/.harbor/` layout and the
//! private JSON persistence every file-backed store goes through.

pub mod paths;
pub mod store;

pub use store::{StoreError, read_json, write_json_private};
