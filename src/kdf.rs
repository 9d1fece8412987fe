//! Passphrase key derivation using PBKDF2-HMAC-SHA256
//!
//! The iteration count is not recorded in the container; it is fixed by
//! the container version.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ErrorCategory, ErrorKind, MencError, Result};

/// Length of salt in bytes
pub const SALT_LEN: usize = 16;

/// Length of derived key in bytes
pub const KEY_LEN: usize = 32;

/// Lowest iteration count accepted by `derive_key`
pub const MIN_ITERATIONS: u32 = 100_000;

/// Iteration count used by version 1 containers
pub const V1_ITERATIONS: u32 = 600_000;

/// A 256-bit key derived from a passphrase.
///
/// Wiped from memory on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_LEN],
}

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a 32-byte key from a passphrase and salt.
///
/// Deterministic for identical inputs and intentionally expensive.
pub fn derive_key(passphrase: &[u8], salt: &[u8], iterations: u32) -> Result<DerivedKey> {
    if passphrase.is_empty() {
        return Err(MencError::invalid_parameters(
            "passphrase must not be empty",
        ));
    }
    if salt.len() != SALT_LEN {
        return Err(MencError::invalid_parameters(format!(
            "salt must be {} bytes, got {}",
            SALT_LEN,
            salt.len()
        )));
    }
    if iterations < MIN_ITERATIONS {
        return Err(MencError::invalid_parameters(format!(
            "iteration count {} is below the minimum of {}",
            iterations, MIN_ITERATIONS
        )));
    }

    let mut key = DerivedKey {
        bytes: [0u8; KEY_LEN],
    };
    pbkdf2_hmac::<Sha256>(passphrase, salt, iterations, &mut key.bytes);
    Ok(key)
}

/// Resolve the iteration count a container version was written with.
pub fn iterations_for_version(version: u8) -> Result<u32> {
    match version {
        1 => Ok(V1_ITERATIONS),
        other => Err(MencError::new(
            ErrorCategory::User,
            ErrorKind::UnsupportedVersion,
            format!(
                "no key derivation parameters for container version {}",
                other
            ),
        )),
    }
}

/// Generate a fresh random salt
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}
