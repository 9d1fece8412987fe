//! Container header codec
//!
//! The container layout is:
//! - magic: 4 bytes ("MENC")
//! - version: 1 byte
//! - salt: 16 bytes
//! - nonce: 12 bytes
//! - chunk count: 4 bytes (big-endian u32)
//! - ciphertext chunks: `CHUNK_SIZE` bytes each, the last one possibly shorter
//! - tag: 16 bytes
//!
//! All header fields are fixed width, so parsing never allocates.

use std::io::{self, Read};

use crate::cipher::NONCE_LEN;
use crate::error::{ErrorCategory, ErrorKind, MencError, Result};
use crate::kdf::SALT_LEN;

/// Magic marker at the start of every container
pub const MAGIC: [u8; 4] = *b"MENC";

/// Version written by this build
pub const VERSION: u8 = 1;

/// Length of the serialized header in bytes
pub const HEADER_LEN: usize = MAGIC.len() + 1 + SALT_LEN + NONCE_LEN + 4;

/// Length of the trailing authentication tag in bytes
pub const TAG_LEN: usize = 16;

/// Plaintext bytes per chunk. Ciphertext chunks have the same size.
pub const CHUNK_SIZE: usize = 64 * 1024;

const VERSION_OFFSET: usize = 4;
const SALT_OFFSET: usize = 5;
const NONCE_OFFSET: usize = SALT_OFFSET + SALT_LEN;
const COUNT_OFFSET: usize = NONCE_OFFSET + NONCE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub chunk_count: u32,
}

impl Header {
    /// Header for a container written by this build.
    pub fn new(salt: [u8; SALT_LEN], nonce: [u8; NONCE_LEN], chunk_count: u32) -> Self {
        Self {
            version: VERSION,
            salt,
            nonce,
            chunk_count,
        }
    }

    /// Total container size for a payload of `plaintext_len` bytes.
    pub fn container_len(plaintext_len: u64) -> u64 {
        HEADER_LEN as u64 + plaintext_len + TAG_LEN as u64
    }

    /// Whether chunk `index` is the final one. Only the final chunk may be
    /// shorter than `CHUNK_SIZE`.
    pub fn is_last_chunk(&self, index: u32) -> bool {
        index.checked_add(1) == Some(self.chunk_count)
    }
}

pub fn write_header(header: &Header) -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    out[..VERSION_OFFSET].copy_from_slice(&MAGIC);
    out[VERSION_OFFSET] = header.version;
    out[SALT_OFFSET..NONCE_OFFSET].copy_from_slice(&header.salt);
    out[NONCE_OFFSET..COUNT_OFFSET].copy_from_slice(&header.nonce);
    out[COUNT_OFFSET..].copy_from_slice(&header.chunk_count.to_be_bytes());
    out
}

/// Parse and validate a header from the start of `bytes`.
///
/// Bytes beyond `HEADER_LEN` are ignored.
pub fn read_header(bytes: &[u8]) -> Result<Header> {
    if bytes.len() < MAGIC.len() {
        return Err(MencError::malformed(
            "input size smaller than magic marker; likely truncated",
        ));
    }
    if bytes[..VERSION_OFFSET] != MAGIC {
        return Err(MencError::malformed("input unrecognized as menc data"));
    }
    if bytes.len() < HEADER_LEN {
        return Err(MencError::malformed(
            "input likely truncated while reading header",
        ));
    }

    let version = bytes[VERSION_OFFSET];
    if version != VERSION {
        return Err(MencError::new(
            ErrorCategory::User,
            ErrorKind::UnsupportedVersion,
            format!(
                "input claims to be menc, but version {} is not one we support",
                version
            ),
        ));
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&bytes[SALT_OFFSET..NONCE_OFFSET]);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&bytes[NONCE_OFFSET..COUNT_OFFSET]);
    let mut count = [0u8; 4];
    count.copy_from_slice(&bytes[COUNT_OFFSET..HEADER_LEN]);

    Ok(Header {
        version,
        salt,
        nonce,
        chunk_count: u32::from_be_bytes(count),
    })
}

/// Read a header off the front of a stream, returning the raw bytes as well
/// since they are authenticated along with the body.
pub fn read_header_from<R: Read>(reader: &mut R) -> Result<([u8; HEADER_LEN], Header)> {
    let mut raw = [0u8; HEADER_LEN];
    let filled = read_up_to(reader, &mut raw)
        .map_err(|e| MencError::io(e, "failed to read container header"))?;
    let header = read_header(&raw[..filled])?;
    Ok((raw, header))
}

/// Fill `buf` from `reader`, stopping early only at end of input.
///
/// Returns the number of bytes read.
pub(crate) fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Number of chunks needed for `len` plaintext bytes.
pub fn chunk_count_for_len(len: u64) -> Result<u32> {
    let count = len.div_ceil(CHUNK_SIZE as u64);
    u32::try_from(count).map_err(|_| {
        MencError::invalid_parameters(format!(
            "input of {} bytes exceeds the maximum of {} chunks",
            len,
            u32::MAX
        ))
    })
}
