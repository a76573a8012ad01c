//! Subcommand implementations

pub mod ask;
pub mod build;
pub mod resolve;
pub mod status;
