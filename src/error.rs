//! Crate error type.
//!
//! Per spec §7, only a handful of conditions are fatal: failure to open the
//! rules file, allocation failure, and corrupt startup configuration. Every
//! other error kind in the table (malformed XML, unknown action, dangling
//! reference, duplicate id, ...) is a *counted, logged* condition handled at
//! its call site rather than surfaced as an `Err` — see the modules that
//! produce those counters ([`stats`](crate::stats), [`reverse_index`]).

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed xml at line {line}: {msg}")]
    Xml { line: u64, msg: String },

    #[error("rules file could not be opened: {0}")]
    RulesUnreadable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("allocation failure: {0}")]
    Alloc(String),
}
