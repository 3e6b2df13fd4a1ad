//! A read-only extractor for the 7z archive container.
//!
//! This crate parses a 7z archive's metadata (signature header, encoded or
//! plain header, streams info, coders info, substreams info, files info) and
//! decompresses arbitrary subsets of its content through the codec pipeline
//! a folder declares.
//!
//! This is a metadata-and-extraction core only: it does not write 7z
//! archives, does not decrypt AES-256/SHA-256 encrypted content, and does
//! not materialize entries onto a filesystem. Callers drive extraction
//! through [`ArchiveReader::for_each_entries`] or the [`sink::ExtractSink`]
//! trait and are responsible for persisting the bytes they receive.
//!
//! ## Supported codecs & filters
//!
//! | Codec / filter | Decompression |
//! |-----------------|---------------|
//! | COPY             | ✓ |
//! | LZMA             | ✓ |
//! | LZMA2            | ✓ |
//! | ZSTD (*)         | ✓ |
//! | BCJ X86          | ✓ |
//!
//! (*) Requires the `zstd` cargo feature, enabled by default.
#![warn(missing_docs)]

pub(crate) mod archive;
pub(crate) mod bitmap;
pub(crate) mod bitset;
pub(crate) mod block;
mod codec;
pub(crate) mod cursor;
mod error;
pub(crate) mod metadata;
mod reader;
pub mod sink;
mod time;

pub use archive::*;
pub use block::*;
pub use error::Error;
pub use reader::{ArchiveReader, BlockDecoder};
pub use sink::ExtractSink;
pub use time::NtTime;
