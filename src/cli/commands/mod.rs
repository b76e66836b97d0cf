//! Subcommand implementations.

pub mod config;
pub mod consume;
pub mod inspect;
pub mod migrate;
pub mod process;
