//! File encryption/decryption operations
//!
//! This module provides path-level operations on top of the streaming
//! pipeline. Outputs are always written to a temporary file next to the
//! destination and renamed into place only once the operation has succeeded,
//! so a failed decryption never leaves unauthenticated plaintext behind.

use crate::container::{self, Header};
use crate::error::{ErrorCategory, ErrorKind, MencError, Result};
use crate::passphrase::PassphraseReader;
use crate::stream;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::debug;

/// Encrypt the file at `input_path` into a new container at `output_path`.
///
/// The output file is created with mode 0o600 (read/write for owner only) on Unix systems.
pub fn encrypt(input_path: &Path, output_path: &Path, passphrase: &[u8]) -> Result<()> {
    let input = File::open(input_path).map_err(|e| read_error(input_path, e))?;
    let plaintext_len = input
        .metadata()
        .map_err(|e| read_error(input_path, e))?
        .len();
    debug!(input = %input_path.display(), plaintext_len, "encrypting");

    write_atomically(output_path, |out| {
        stream::encrypt_stream(&input, out, passphrase, plaintext_len)
    })
    .map_err(|e| e.with_context(format!("failed to encrypt {}", input_path.display())))
}

/// Decrypt the container at `input_path` into `output_path`.
///
/// Nothing is written to `output_path` unless the whole container verifies.
/// The output file is created with mode 0o600 (read/write for owner only) on Unix systems.
pub fn decrypt(input_path: &Path, output_path: &Path, passphrase: &[u8]) -> Result<Header> {
    let input = File::open(input_path).map_err(|e| read_error(input_path, e))?;
    debug!(input = %input_path.display(), "decrypting");

    write_atomically(output_path, |out| {
        stream::decrypt_stream(&input, out, passphrase)
    })
    .map_err(|e| e.with_context(format!("failed to decrypt {}", input_path.display())))
}

/// Replace the container at `crypt_path` with a fresh encryption of `plain_path`.
///
/// The existing container is fully decrypted and verified first, which
/// guards against accidentally changing the passphrase. The replacement gets
/// a new salt and nonce and is swapped in atomically, so `crypt_path` always
/// holds either the old or the new container.
pub fn update(plain_path: &Path, crypt_path: &Path, passphrase: &[u8]) -> Result<()> {
    fs::metadata(plain_path).map_err(|e| read_error(plain_path, e))?;

    let existing = File::open(crypt_path).map_err(|e| read_error(crypt_path, e))?;
    stream::decrypt_stream(&existing, io::sink(), passphrase)
        .map_err(|e| e.with_context(format!("failed to verify {}", crypt_path.display())))?;
    drop(existing);
    debug!(crypt = %crypt_path.display(), "existing container verified; re-encrypting");

    encrypt(plain_path, crypt_path, passphrase)
}

/// Read and validate the header of a container. No passphrase is needed.
pub fn inspect(path: &Path) -> Result<Header> {
    let mut file = File::open(path).map_err(|e| read_error(path, e))?;
    let (_, header) = container::read_header_from(&mut file)
        .map_err(|e| e.with_context(format!("failed to inspect {}", path.display())))?;
    Ok(header)
}

/// Like [`encrypt`], with the passphrase taken from `passphrase_reader`.
pub fn encrypt_file(
    input_path: &Path,
    output_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<()> {
    fs::metadata(input_path).map_err(|e| read_error(input_path, e))?;
    let passphrase = passphrase_reader.read_passphrase()?;
    encrypt(input_path, output_path, &passphrase)
}

/// Like [`decrypt`], with the passphrase taken from `passphrase_reader`.
pub fn decrypt_file(
    input_path: &Path,
    output_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<Header> {
    inspect(input_path)?;
    let passphrase = passphrase_reader.read_passphrase()?;
    decrypt(input_path, output_path, &passphrase)
}

/// Like [`update`], with the passphrase taken from `passphrase_reader`.
pub fn update_file(
    plain_path: &Path,
    crypt_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<()> {
    inspect(crypt_path)?;
    let passphrase = passphrase_reader.read_passphrase()?;
    update(plain_path, crypt_path, &passphrase)
}

/// Run `fill` against a temp file in the directory of `path`, then
/// atomically move the result to `path`.
///
/// If `fill` fails the temp file is removed and `path` is left untouched.
fn write_atomically<T, F>(path: &Path, fill: F) -> Result<T>
where
    F: FnOnce(&mut NamedTempFile) -> Result<T>,
{
    let started = Instant::now();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp_file = NamedTempFile::new_in(dir).map_err(|e| {
        MencError::with_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to create tempfile in {}", dir.display()),
            e,
        )
    })?;

    let value = fill(&mut temp_file)?;

    // Flush and fsync() such that the rename later, if it succeeds, will
    // always point to a valid file.
    temp_file
        .flush()
        .map_err(|e| MencError::io(e, "failed to flush tempfile"))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| MencError::io(e, "failed to sync file prior to rename"))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = temp_file
            .as_file()
            .metadata()
            .map_err(|e| MencError::io(e, "failed to get tempfile metadata"))?
            .permissions();
        perms.set_mode(0o600);
        temp_file
            .as_file()
            .set_permissions(perms)
            .map_err(|e| MencError::io(e, "failed to set tempfile permissions"))?;
    }

    temp_file.persist(path).map_err(|e| {
        MencError::with_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to rename to target file {}", path.display()),
            e,
        )
    })?;
    debug!(output = %path.display(), elapsed = ?started.elapsed(), "output persisted");
    Ok(value)
}

fn read_error(path: &Path, err: io::Error) -> MencError {
    let category = if err.kind() == io::ErrorKind::NotFound {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    MencError::with_source(
        category,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}
