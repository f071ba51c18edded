//! photoshelf: media indexer and thumbnail cache for large photo libraries.
//!
//! The [`library::Library`] ties together the SQLite catalog, the scanner
//! that fills it, the on-disk WebP thumbnail cache and the pregeneration
//! engine that warms that cache in the background.

pub mod config;
pub mod db;
pub mod library;
pub mod logging;
pub mod pregen;
pub mod scanner;
pub mod tasks;
pub mod thumbnails;

pub use config::Config;
pub use db::Database;
pub use library::Library;
