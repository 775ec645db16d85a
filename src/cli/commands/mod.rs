//! Command implementations.

pub mod completions;
pub mod demo;
pub mod explain;
pub mod version;
