//! # Skein Node
//!
//! Settings for the `skein-node` binary, which runs one mesh node over
//! TCP links.

pub mod config;

pub use config::{Cli, NodeConfigError, NodeFileConfig, NodeSettings};
