//! Ground-station configuration, stored at `~/.rangelink/config.ini`.
//!
//! Settings structs live in [`settings`], INI parsing in `parser`,
//! serialization in `writer`, and the load/save lifecycle in [`file`].
//! The store is plain data passed to whoever needs it; nothing in the
//! library reads it implicitly.

pub mod file;
mod parser;
pub mod settings;
mod writer;

pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{ConfigFile, FrequencySettings, LinkSettings, LoggingSettings};
