//! Chunked ChaCha20 with a streaming HMAC-SHA256 tag
//!
//! The derived key is expanded with HKDF-SHA256 into a cipher key and a MAC
//! key. Chunk `i` is encrypted with ChaCha20 under a nonce formed by XORing
//! `i` (big-endian u32) into the last four bytes of the base nonce. A single
//! tag covers the header followed by every ciphertext chunk in order, so
//! reordered, dropped or modified chunks all fail verification.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{ChaCha20, Key, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::container::{CHUNK_SIZE, TAG_LEN};
use crate::error::{ErrorCategory, ErrorKind, MencError, Result};
use crate::kdf::{DerivedKey, KEY_LEN};

type HmacSha256 = Hmac<Sha256>;

/// Length of nonce in bytes
pub const NONCE_LEN: usize = 12;

/// Truncated stream authentication tag
pub type Tag = [u8; TAG_LEN];

const CIPHER_KEY_INFO: &[u8] = b"menc v1 chacha20 key";
const MAC_KEY_INFO: &[u8] = b"menc v1 hmac-sha256 key";

/// Generate a fresh random base nonce
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Nonce used for chunk `chunk_index` of a stream with the given base nonce.
pub fn chunk_nonce(base: &[u8; NONCE_LEN], chunk_index: u32) -> [u8; NONCE_LEN] {
    let mut nonce = *base;
    for (byte, ctr) in nonce[NONCE_LEN - 4..]
        .iter_mut()
        .zip(chunk_index.to_be_bytes())
    {
        *byte ^= ctr;
    }
    nonce
}

/// State shared by both directions: subkeys, the base nonce, the running
/// MAC and the index of the next chunk expected.
struct ChunkStream {
    cipher_key: Zeroizing<[u8; KEY_LEN]>,
    base_nonce: [u8; NONCE_LEN],
    mac: HmacSha256,
    next_index: u64,
}

impl ChunkStream {
    /// Takes ownership of the derived key; it is wiped once the subkeys
    /// have been expanded from it.
    fn new(key: DerivedKey, base_nonce: [u8; NONCE_LEN], header: &[u8]) -> Result<Self> {
        let hk = Hkdf::<Sha256>::new(None, key.as_bytes());
        drop(key);

        let mut cipher_key = Zeroizing::new([0u8; KEY_LEN]);
        let mut mac_key = Zeroizing::new([0u8; KEY_LEN]);
        hk.expand(CIPHER_KEY_INFO, &mut *cipher_key)
            .map_err(|_| MencError::invariant("failed to expand cipher key"))?;
        hk.expand(MAC_KEY_INFO, &mut *mac_key)
            .map_err(|_| MencError::invariant("failed to expand mac key"))?;

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&*mac_key)
            .map_err(|_| MencError::invariant("failed to key hmac"))?;
        mac.update(header);

        Ok(Self {
            cipher_key,
            base_nonce,
            mac,
            next_index: 0,
        })
    }

    fn check_chunk(&self, chunk_index: u32, len: usize) -> Result<()> {
        if u64::from(chunk_index) != self.next_index {
            return Err(MencError::invalid_parameters(format!(
                "chunk {} supplied out of order; expected chunk {}",
                chunk_index, self.next_index
            )));
        }
        if len == 0 || len > CHUNK_SIZE {
            return Err(MencError::invalid_parameters(format!(
                "chunk length {} outside 1..={}",
                len, CHUNK_SIZE
            )));
        }
        Ok(())
    }

    fn apply_keystream(&self, chunk_index: u32, buf: &mut [u8]) {
        let nonce = chunk_nonce(&self.base_nonce, chunk_index);
        let mut cipher = ChaCha20::new(
            Key::from_slice(&*self.cipher_key),
            Nonce::from_slice(&nonce),
        );
        cipher.apply_keystream(buf);
    }
}

/// Encrypting half of the cipher engine.
pub struct StreamSealer {
    inner: ChunkStream,
}

impl StreamSealer {
    /// `header` is the serialized container header; it is covered by the tag.
    pub fn new(key: DerivedKey, base_nonce: [u8; NONCE_LEN], header: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: ChunkStream::new(key, base_nonce, header)?,
        })
    }

    /// Encrypt one chunk in place. Chunks must arrive in order from 0.
    pub fn encrypt_chunk(&mut self, chunk_index: u32, chunk: &mut [u8]) -> Result<()> {
        self.inner.check_chunk(chunk_index, chunk.len())?;
        self.inner.apply_keystream(chunk_index, chunk);
        self.inner.mac.update(chunk);
        self.inner.next_index += 1;
        Ok(())
    }

    pub fn chunks_processed(&self) -> u64 {
        self.inner.next_index
    }

    /// Finish the stream and produce its tag.
    pub fn finish(self) -> Tag {
        let full = self.inner.mac.finalize().into_bytes();
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&full[..TAG_LEN]);
        tag
    }
}

/// Decrypting half of the cipher engine.
///
/// Plaintext returned by `decrypt_chunk` must not be trusted until `verify`
/// has succeeded.
pub struct StreamOpener {
    inner: ChunkStream,
}

impl StreamOpener {
    pub fn new(key: DerivedKey, base_nonce: [u8; NONCE_LEN], header: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: ChunkStream::new(key, base_nonce, header)?,
        })
    }

    /// Decrypt one chunk in place. Chunks must arrive in order from 0.
    pub fn decrypt_chunk(&mut self, chunk_index: u32, chunk: &mut [u8]) -> Result<()> {
        self.inner.check_chunk(chunk_index, chunk.len())?;
        self.inner.mac.update(chunk);
        self.inner.apply_keystream(chunk_index, chunk);
        self.inner.next_index += 1;
        Ok(())
    }

    pub fn chunks_processed(&self) -> u64 {
        self.inner.next_index
    }

    /// Check the stream tag in constant time.
    pub fn verify(self, tag: &[u8]) -> Result<()> {
        if tag.len() != TAG_LEN {
            return Err(MencError::invalid_parameters(format!(
                "tag must be {} bytes, got {}",
                TAG_LEN,
                tag.len()
            )));
        }
        self.inner.mac.verify_truncated_left(tag).map_err(|_| {
            MencError::new(
                ErrorCategory::User,
                ErrorKind::AuthenticationFailed,
                "corrupt input, tampered-with data, or bad passphrase",
            )
        })
    }
}
