//! Common crate
//!
//! Shared types, error handling and configuration for colbench.
//!
//! # Example
//! ```rust
//! use colbench_common::Format;
//! assert_eq!(Format::from_path("lineitem.tbl").unwrap(), Format::Tbl);
//! ```

pub mod config;
pub mod dataset;
pub mod error;
pub mod source;

pub use config::{RemoteSettings, Settings};
pub use dataset::{Dataset, Format, Location, Variant};
pub use error::{Error, Result};
pub use source::{BatchSource, BatchStream, DEFAULT_CHUNK_SIZE};
