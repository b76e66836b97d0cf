//! Adapters implementing the domain ports.

pub mod fs;
pub mod http;
pub mod memory;
pub mod sqlite;
