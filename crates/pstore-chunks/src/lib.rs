//! pstore-chunks: content ids, verification, and file splitting
//!
//! # Overview
//! - `hash`: BLAKE3 content ids for byte slices and files, plus verification
//! - `fastcdc`: content-defined splitting of plaintext files into chunks
//! - `filemap`: the JSON document mapping a stored file to its chunk ids

pub mod fastcdc;
pub mod filemap;
pub mod hash;

pub use fastcdc::{chunk_data, ChunkSizes, PlainChunk};
pub use filemap::{FileMap, FileMapEntry};
pub use hash::{hash_bytes, id_of, id_of_file, matches, verify, Hash, VerifyError};
