// src/package/mod.rs
//! Data package assembly and extraction
//!
//! A package is a tar.gz, tar.bz2 or zip archive of a data directory,
//! optionally wrapped in an OpenPGP message. [`PackageWriter`] walks a data
//! directory into a package; [`PackageReader`] extracts one.

mod pipeline;
mod reader;
mod writer;

pub use pipeline::{OutputLayer, Sink, Source};
pub use reader::{PackageReader, UnpackSummary};
pub use writer::{PackSummary, PackageWriter};
