//! Streaming encryption and decryption pipelines
//!
//! Both directions work on one chunk at a time, so memory use is bounded
//! by `CHUNK_SIZE` regardless of how large the input is. The caller may
//! abort between chunks simply by dropping the pipeline.

use std::io::{Read, Write};

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::cipher::{NONCE_LEN, StreamOpener, StreamSealer, generate_nonce};
use crate::container::{
    CHUNK_SIZE, HEADER_LEN, Header, TAG_LEN, chunk_count_for_len, read_header_from, read_up_to,
    write_header,
};
use crate::error::{ErrorCategory, ErrorKind, MencError, Result};
use crate::kdf::{SALT_LEN, derive_key, generate_salt, iterations_for_version};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptState {
    Idle,
    HeaderWritten,
    Streaming,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptState {
    Idle,
    HeaderRead,
    Streaming,
    Verified,
    Rejected,
}

/// Writes a container one chunk at a time.
///
/// The plaintext length must be known up front because the chunk count is
/// part of the header.
pub struct Encryptor<W: Write> {
    writer: W,
    header: Header,
    header_bytes: [u8; HEADER_LEN],
    sealer: Option<StreamSealer>,
    state: EncryptState,
    next_index: u32,
}

impl<W: Write> Encryptor<W> {
    /// Derives the key under a fresh random salt and nonce.
    pub fn new(writer: W, passphrase: &[u8], plaintext_len: u64) -> Result<Self> {
        Self::with_salt_and_nonce(
            writer,
            passphrase,
            plaintext_len,
            generate_salt(),
            generate_nonce(),
        )
    }

    /// Like `new`, but with caller-provided salt and nonce.
    ///
    /// This function is ONLY for testing purposes to generate deterministic output.
    /// NEVER use this in production - always use `new()` which generates random salt/nonce.
    pub fn with_salt_and_nonce(
        writer: W,
        passphrase: &[u8],
        plaintext_len: u64,
        salt: [u8; SALT_LEN],
        nonce: [u8; NONCE_LEN],
    ) -> Result<Self> {
        let chunk_count = chunk_count_for_len(plaintext_len)?;
        let header = Header::new(salt, nonce, chunk_count);
        let header_bytes = write_header(&header);
        let key = derive_key(passphrase, &salt, iterations_for_version(header.version)?)?;
        let sealer = StreamSealer::new(key, nonce, &header_bytes)?;

        Ok(Self {
            writer,
            header,
            header_bytes,
            sealer: Some(sealer),
            state: EncryptState::Idle,
            next_index: 0,
        })
    }

    pub fn state(&self) -> EncryptState {
        self.state
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn write_header(&mut self) -> Result<()> {
        if self.state != EncryptState::Idle {
            return Err(MencError::invariant(format!(
                "cannot write header in state {:?}",
                self.state
            )));
        }
        self.writer
            .write_all(&self.header_bytes)
            .map_err(|e| MencError::io(e, "failed to write container header"))?;
        self.state = EncryptState::HeaderWritten;
        debug!(
            chunk_count = self.header.chunk_count,
            "container header written"
        );
        Ok(())
    }

    /// Encrypt `chunk` in place and append it to the container.
    ///
    /// Every chunk but the last must be exactly `CHUNK_SIZE` bytes.
    pub fn write_chunk(&mut self, chunk: &mut [u8]) -> Result<()> {
        if !matches!(
            self.state,
            EncryptState::HeaderWritten | EncryptState::Streaming
        ) {
            return Err(MencError::invariant(format!(
                "cannot write chunk in state {:?}",
                self.state
            )));
        }
        if self.next_index >= self.header.chunk_count {
            return Err(MencError::invalid_parameters(format!(
                "header announced {} chunks; refusing to write more",
                self.header.chunk_count
            )));
        }
        if !self.header.is_last_chunk(self.next_index) && chunk.len() != CHUNK_SIZE {
            return Err(MencError::invalid_parameters(format!(
                "chunk {} is {} bytes; only the final chunk may be shorter than {}",
                self.next_index,
                chunk.len(),
                CHUNK_SIZE
            )));
        }

        let sealer = self
            .sealer
            .as_mut()
            .ok_or_else(|| MencError::invariant("cipher state missing while streaming"))?;
        sealer.encrypt_chunk(self.next_index, chunk)?;
        self.writer
            .write_all(chunk)
            .map_err(|e| MencError::io(e, format!("failed to write chunk {}", self.next_index)))?;

        self.next_index += 1;
        self.state = EncryptState::Streaming;
        Ok(())
    }

    /// Append the tag once every announced chunk has been written.
    pub fn finalize(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            EncryptState::HeaderWritten | EncryptState::Streaming
        ) {
            return Err(MencError::invariant(format!(
                "cannot finalize in state {:?}",
                self.state
            )));
        }
        if self.next_index != self.header.chunk_count {
            return Err(MencError::invalid_parameters(format!(
                "only {} of {} announced chunks were written",
                self.next_index, self.header.chunk_count
            )));
        }

        let sealer = self
            .sealer
            .take()
            .ok_or_else(|| MencError::invariant("cipher state missing at finalization"))?;
        let tag = sealer.finish();
        self.writer
            .write_all(&tag)
            .map_err(|e| MencError::io(e, "failed to write authentication tag"))?;
        self.writer
            .flush()
            .map_err(|e| MencError::io(e, "failed to flush container"))?;

        self.state = EncryptState::Finalized;
        debug!(chunk_count = self.header.chunk_count, "container finalized");
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Reads and authenticates a container one chunk at a time.
///
/// Chunks handed out before the state reaches `Verified` are unauthenticated;
/// a caller that persists them must be prepared to discard them.
pub struct Decryptor<R: Read> {
    reader: R,
    header: Option<Header>,
    opener: Option<StreamOpener>,
    state: DecryptState,
    next_index: u32,
    buf: Zeroizing<Vec<u8>>,
}

impl<R: Read> Decryptor<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            header: None,
            opener: None,
            state: DecryptState::Idle,
            next_index: 0,
            // Room for a full final chunk, the tag, and one probe byte to
            // detect trailing data.
            buf: Zeroizing::new(vec![0u8; CHUNK_SIZE + TAG_LEN + 1]),
        }
    }

    pub fn state(&self) -> DecryptState {
        self.state
    }

    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    /// Parse the header and derive the key from `passphrase`.
    pub fn read_header(&mut self, passphrase: &[u8]) -> Result<Header> {
        if self.state != DecryptState::Idle {
            return Err(MencError::invariant(format!(
                "cannot read header in state {:?}",
                self.state
            )));
        }

        match self.open(passphrase) {
            Ok((header, opener)) => {
                debug!(
                    version = header.version,
                    chunk_count = header.chunk_count,
                    "container header read"
                );
                self.header = Some(header);
                self.opener = Some(opener);
                self.state = DecryptState::HeaderRead;
                Ok(header)
            }
            Err(e) => {
                self.state = DecryptState::Rejected;
                Err(e)
            }
        }
    }

    fn open(&mut self, passphrase: &[u8]) -> Result<(Header, StreamOpener)> {
        let (raw, header) = read_header_from(&mut self.reader)?;
        let iterations = iterations_for_version(header.version)?;
        let key = derive_key(passphrase, &header.salt, iterations)?;
        let opener = StreamOpener::new(key, header.nonce, &raw)?;
        Ok((header, opener))
    }

    /// Decrypt the next chunk.
    ///
    /// The final chunk is only returned after the tag has been verified.
    /// Returns `Ok(None)` once the whole container has been verified.
    pub fn next_chunk(&mut self) -> Result<Option<&[u8]>> {
        match self.state {
            DecryptState::HeaderRead | DecryptState::Streaming => {}
            DecryptState::Verified => return Ok(None),
            other => {
                return Err(MencError::invariant(format!(
                    "cannot read chunk in state {:?}",
                    other
                )));
            }
        }

        match self.step() {
            Ok(Some(len)) => Ok(Some(&self.buf[..len])),
            Ok(None) => Ok(None),
            Err(e) => {
                if e.kind == ErrorKind::AuthenticationFailed {
                    warn!(
                        chunks_read = self.next_index,
                        "container failed authentication"
                    );
                }
                self.state = DecryptState::Rejected;
                Err(e)
            }
        }
    }

    fn step(&mut self) -> Result<Option<usize>> {
        let header = self
            .header
            .ok_or_else(|| MencError::invariant("header missing while streaming"))?;

        if header.chunk_count == 0 {
            let n = read_up_to(&mut self.reader, &mut self.buf[..TAG_LEN + 1])
                .map_err(|e| MencError::io(e, "failed to read authentication tag"))?;
            check_tail_len(n, TAG_LEN, TAG_LEN)?;
            self.verify_tag(0..n)?;
            return Ok(None);
        }

        let index = self.next_index;
        let len = if header.is_last_chunk(index) {
            let n = read_up_to(&mut self.reader, &mut self.buf[..])
                .map_err(|e| MencError::io(e, format!("failed to read chunk {}", index)))?;
            check_tail_len(n, TAG_LEN + 1, CHUNK_SIZE + TAG_LEN)?;
            let len = n - TAG_LEN;
            self.decrypt_in_place(index, len)?;
            self.verify_tag(len..n)?;
            len
        } else {
            self.reader
                .read_exact(&mut self.buf[..CHUNK_SIZE])
                .map_err(|e| {
                    MencError::from_container_io(
                        e,
                        format!("input likely truncated while reading chunk {}", index),
                    )
                })?;
            self.decrypt_in_place(index, CHUNK_SIZE)?;
            self.state = DecryptState::Streaming;
            CHUNK_SIZE
        };

        self.next_index += 1;
        Ok(Some(len))
    }

    fn decrypt_in_place(&mut self, index: u32, len: usize) -> Result<()> {
        let opener = self
            .opener
            .as_mut()
            .ok_or_else(|| MencError::invariant("cipher state missing while streaming"))?;
        opener.decrypt_chunk(index, &mut self.buf[..len])
    }

    fn verify_tag(&mut self, range: std::ops::Range<usize>) -> Result<()> {
        let opener = self
            .opener
            .take()
            .ok_or_else(|| MencError::invariant("cipher state missing at verification"))?;
        opener.verify(&self.buf[range])?;
        self.state = DecryptState::Verified;
        debug!("container verified");
        Ok(())
    }
}

/// Validate the size of the final read against what the header announced.
fn check_tail_len(n: usize, min: usize, max: usize) -> Result<()> {
    if n < min {
        return Err(MencError::malformed(
            "input likely truncated while reading final chunk and tag",
        ));
    }
    if n > max {
        return Err(MencError::malformed(
            "invalid input: unexpected data after authentication tag",
        ));
    }
    Ok(())
}

/// Encrypt `plaintext_len` bytes from `reader` into a container on `writer`.
pub fn encrypt_stream<R: Read, W: Write>(
    reader: R,
    writer: W,
    passphrase: &[u8],
    plaintext_len: u64,
) -> Result<()> {
    let encryptor = Encryptor::new(writer, passphrase, plaintext_len)?;
    drive_encryption(reader, encryptor, plaintext_len)
}

/// Encrypt with caller-provided salt and nonce.
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `encrypt_stream()`.
pub fn encrypt_stream_deterministic<R: Read, W: Write>(
    reader: R,
    writer: W,
    passphrase: &[u8],
    plaintext_len: u64,
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
) -> Result<()> {
    let encryptor = Encryptor::with_salt_and_nonce(writer, passphrase, plaintext_len, salt, nonce)?;
    drive_encryption(reader, encryptor, plaintext_len)
}

fn drive_encryption<R: Read, W: Write>(
    mut reader: R,
    mut encryptor: Encryptor<W>,
    plaintext_len: u64,
) -> Result<()> {
    encryptor.write_header()?;

    let mut buf = Zeroizing::new(vec![0u8; CHUNK_SIZE]);
    let mut remaining = plaintext_len;
    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let got = read_up_to(&mut reader, &mut buf[..want])
            .map_err(|e| MencError::io(e, "failed to read plaintext"))?;
        if got < want {
            return Err(size_changed(plaintext_len, "fewer"));
        }
        encryptor.write_chunk(&mut buf[..want])?;
        remaining -= want as u64;
    }

    let mut probe = [0u8; 1];
    let extra = read_up_to(&mut reader, &mut probe)
        .map_err(|e| MencError::io(e, "failed to read plaintext"))?;
    if extra != 0 {
        return Err(size_changed(plaintext_len, "more"));
    }

    encryptor.finalize()
}

fn size_changed(expected: u64, direction: &str) -> MencError {
    MencError::new(
        ErrorCategory::Internal,
        ErrorKind::Io,
        format!(
            "input produced {} than the {} bytes announced; did it change during encryption?",
            direction, expected
        ),
    )
}

/// Decrypt a container from `reader`, writing plaintext to `writer`.
///
/// Plaintext is written as it is decrypted, so on error `writer` may hold
/// unauthenticated data that the caller must discard.
pub fn decrypt_stream<R: Read, W: Write>(
    reader: R,
    mut writer: W,
    passphrase: &[u8],
) -> Result<Header> {
    let mut decryptor = Decryptor::new(reader);
    let header = decryptor.read_header(passphrase)?;
    while let Some(plaintext) = decryptor.next_chunk()? {
        writer
            .write_all(plaintext)
            .map_err(|e| MencError::io(e, "failed to write plaintext"))?;
    }
    writer
        .flush()
        .map_err(|e| MencError::io(e, "failed to flush plaintext"))?;
    Ok(header)
}
