//! Core types and configuration shared by the LINE agent bridge crates.

pub mod config;
pub mod types;

pub use self::config::*;
pub use self::types::*;
