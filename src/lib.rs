//! menc - Passphrase-based streaming file encryption
//!
//! Files are split into fixed-size chunks, encrypted with ChaCha20 under a
//! key derived from the passphrase, and authenticated as a whole by a single
//! tag covering the header and every chunk.

#![forbid(unsafe_code)]

pub mod cipher;
pub mod container;
pub mod error;
pub mod file_ops;
pub mod kdf;
pub mod passphrase;
pub mod stream;

pub use container::Header;
pub use error::{ErrorCategory, ErrorKind, MencError, Result};
pub use stream::{decrypt_stream, encrypt_stream};
