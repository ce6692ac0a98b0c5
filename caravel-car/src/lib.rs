//! Single-root [CARv1](https://ipld.io/specs/transport/car/carv1/) archives.
//!
//! A backup archive declares exactly one root (the database manifest) and
//! carries every block of the backed-up log. The reader re-hashes each block
//! against the multihash declared in its CID, so a tampered archive fails
//! instead of silently restoring forged bytes.

mod error;
mod header;
mod reader;
mod util;
mod writer;

pub use crate::error::Error;
pub use crate::header::CarHeader;
pub use crate::reader::CarReader;
pub use crate::writer::CarWriter;
