//! CLI integration tests
//!
//! Tests the command-line interface end-to-end.

mod common;

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// Path to the menc binary built for this test run
fn menc_bin() -> &'static str {
    env!("CARGO_BIN_EXE_menc")
}

/// Run menc with passphrase from stdin
fn run_menc_with_passphrase(args: &[&str], passphrase: &[u8]) -> Result<Output, std::io::Error> {
    let mut child = Command::new(menc_bin())
        .arg("--passphrase-stdin")
        .args(args)
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    {
        let stdin = child.stdin.as_mut().expect("failed to open stdin");
        // Ignore BrokenPipe errors - the command may exit before reading stdin
        // if it encounters an error (e.g., file not found)
        let _ = stdin.write_all(passphrase);
    }

    child.wait_with_output()
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn io_args<'a>(command: &'a str, input: &'a Path, output: &'a Path) -> [&'a str; 5] {
    [command, "-i", path_str(input), "-o", path_str(output)]
}

/// Run an `-i`/`-o` subcommand with the passphrase on stdin
fn run_io(command: &str, input: &Path, output: &Path, passphrase: &[u8]) -> Output {
    run_menc_with_passphrase(&io_args(command, input, output), passphrase)
        .expect("failed to run menc")
}

fn assert_success(result: &Output, what: &str) {
    assert!(
        result.status.success(),
        "{} failed: {}",
        what,
        String::from_utf8_lossy(&result.stderr)
    );
}

#[test]
fn test_encrypt_decrypt_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("hello.txt");
    let encrypted = temp_dir.path().join("hello.txt.menc");
    let decrypted = temp_dir.path().join("hello-decrypted.txt");

    fs::write(&plaintext, "Hello, menc!\n").unwrap();

    let result = run_io("encrypt", &plaintext, &encrypted, b"test");
    assert_success(&result, "encrypt");
    assert_eq!(&fs::read(&encrypted).unwrap()[..4], b"MENC");

    let result = run_io("decrypt", &encrypted, &decrypted, b"test");
    assert_success(&result, "decrypt");

    assert_eq!(
        fs::read_to_string(&decrypted).unwrap(),
        fs::read_to_string(&plaintext).unwrap()
    );
}

#[test]
fn test_short_aliases() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("plain.txt");
    let encrypted = temp_dir.path().join("plain.txt.menc");
    let decrypted = temp_dir.path().join("plain.out");

    fs::write(&plaintext, "alias check").unwrap();

    let result = run_io("e", &plaintext, &encrypted, b"pw");
    assert_success(&result, "e");

    let result = run_io("d", &encrypted, &decrypted, b"pw");
    assert_success(&result, "d");
    assert_eq!(fs::read_to_string(&decrypted).unwrap(), "alias check");
}

#[test]
fn test_passphrase_is_taken_verbatim() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("plain.txt");
    let encrypted = temp_dir.path().join("plain.txt.menc");
    let decrypted = temp_dir.path().join("plain.out");

    fs::write(&plaintext, "newline matters").unwrap();

    let result = run_io("encrypt", &plaintext, &encrypted, b"pw\n");
    assert_success(&result, "encrypt");

    let result = run_io("decrypt", &encrypted, &decrypted, b"pw");
    assert!(!result.status.success());
    assert!(!decrypted.exists());
}

#[test]
fn test_key_file_on_stdin() {
    const KEY: [u8; 4] = [0x00, 0xff, b'k', b'\n'];
    let temp_dir = TempDir::new().unwrap();
    let key_file = temp_dir.path().join("key.bin");
    let plaintext = temp_dir.path().join("plain.txt");
    let encrypted = temp_dir.path().join("plain.txt.menc");
    let decrypted = temp_dir.path().join("plain.out");

    fs::write(&key_file, KEY).unwrap();
    fs::write(&plaintext, "keyed by file").unwrap();

    let result = Command::new(menc_bin())
        .args(["--passphrase-stdin", "--log", "debug"])
        .args(io_args("encrypt", &plaintext, &encrypted))
        .env_remove("RUST_LOG")
        .stdin(fs::File::open(&key_file).unwrap())
        .output()
        .expect("failed to run menc");
    assert_success(&result, "encrypt");
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("output persisted"), "{}", stderr);
    assert!(stderr.contains("elapsed"), "{}", stderr);

    let result = run_io("decrypt", &encrypted, &decrypted, &KEY);
    assert_success(&result, "decrypt");
    assert_eq!(fs::read_to_string(&decrypted).unwrap(), "keyed by file");
}

#[test]
fn test_update_operation() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext1 = temp_dir.path().join("plaintext1.txt");
    let plaintext2 = temp_dir.path().join("plaintext2.txt");
    let encrypted = temp_dir.path().join("encrypted.menc");
    let decrypted = temp_dir.path().join("decrypted.txt");

    fs::write(&plaintext1, "Original content").unwrap();
    let result = run_io("encrypt", &plaintext1, &encrypted, b"test");
    assert_success(&result, "encrypt");

    fs::write(&plaintext2, "Updated content").unwrap();
    let result = run_io("update", &plaintext2, &encrypted, b"test");
    assert_success(&result, "update");

    let result = run_io("decrypt", &encrypted, &decrypted, b"test");
    assert_success(&result, "decrypt");
    assert_eq!(fs::read_to_string(&decrypted).unwrap(), "Updated content");
}

#[test]
fn test_update_with_wrong_passphrase_fails() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext1 = temp_dir.path().join("plaintext1.txt");
    let plaintext2 = temp_dir.path().join("plaintext2.txt");
    let encrypted = temp_dir.path().join("encrypted.menc");

    fs::write(&plaintext1, "Original").unwrap();
    let result = run_io("encrypt", &plaintext1, &encrypted, b"correct_password");
    assert_success(&result, "encrypt");
    let original = fs::read(&encrypted).unwrap();

    fs::write(&plaintext2, "Updated").unwrap();
    let result = run_io("update", &plaintext2, &encrypted, b"wrong_password");

    assert_eq!(result.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(
        stderr.contains("failed to verify") && stderr.contains("bad passphrase"),
        "Expected error message about verification, got: {}",
        stderr
    );
    assert_eq!(fs::read(&encrypted).unwrap(), original);
}

#[test]
fn test_decrypt_wrong_passphrase_reports_cause() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("plain.txt");
    let encrypted = temp_dir.path().join("plain.txt.menc");
    let decrypted = temp_dir.path().join("plain.out");

    fs::write(&plaintext, "abc").unwrap();
    let result = run_io("encrypt", &plaintext, &encrypted, b"pw");
    assert_success(&result, "encrypt");

    let result = run_io("decrypt", &encrypted, &decrypted, b"pwx");
    assert_eq!(result.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("Error: failed to decrypt"), "{}", stderr);
    assert!(stderr.contains("caused by:"), "{}", stderr);
    assert!(!decrypted.exists());
}

#[test]
fn test_decrypt_nonexistent_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let nonexistent = temp_dir.path().join("nonexistent.menc");
    let output = temp_dir.path().join("output.txt");

    let result = run_io("decrypt", &nonexistent, &output, b"test");

    assert!(!result.status.success());
    assert!(!output.exists());
}

#[test]
fn test_terminal_required_without_stdin_flag() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("plain.txt");
    let encrypted = temp_dir.path().join("plain.txt.menc");
    fs::write(&plaintext, "data").unwrap();

    let result = Command::new(menc_bin())
        .args(io_args("encrypt", &plaintext, &encrypted))
        .env_remove("MENC_PASSPHRASE_STDIN")
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert_eq!(result.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("not a terminal"), "{}", stderr);
    assert!(!encrypted.exists());
}

#[test]
fn test_passphrase_stdin_from_env() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("plain.txt");
    let encrypted = temp_dir.path().join("plain.txt.menc");
    fs::write(&plaintext, "data").unwrap();

    let mut child = Command::new(menc_bin())
        .args(io_args("encrypt", &plaintext, &encrypted))
        .env("MENC_PASSPHRASE_STDIN", "true")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.as_mut().unwrap().write_all(b"pw").unwrap();
    let result = child.wait_with_output().unwrap();

    assert_success(&result, "encrypt");
    assert!(encrypted.exists());
}

#[test]
fn test_inspect_prints_header() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("big.bin");
    let encrypted = temp_dir.path().join("big.bin.menc");
    fs::write(&plaintext, common::pattern(200_000)).unwrap();

    let result = run_io("encrypt", &plaintext, &encrypted, b"pw");
    assert_success(&result, "encrypt");

    let result = Command::new(menc_bin())
        .args(["inspect", "-i", path_str(&encrypted)])
        .output()
        .unwrap();
    assert_success(&result, "inspect");
    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("version:     1"), "{}", stdout);
    assert!(stdout.contains("chunk_count: 4"), "{}", stdout);
}

#[test]
fn test_inspect_rejects_plain_file() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("plain.txt");
    fs::write(&plaintext, "this is not a menc container").unwrap();

    let result = Command::new(menc_bin())
        .args(["inspect", "-i", path_str(&plaintext)])
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("unrecognized as menc data"), "{}", stderr);
}

#[test]
fn test_empty_file_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("empty.txt");
    let encrypted = temp_dir.path().join("empty.txt.menc");
    let decrypted = temp_dir.path().join("empty-decrypted.txt");

    fs::write(&plaintext, b"").unwrap();

    let result = run_io("encrypt", &plaintext, &encrypted, b"test");
    assert_success(&result, "encrypt");
    assert_eq!(fs::metadata(&encrypted).unwrap().len(), 37 + 16);

    let result = run_io("decrypt", &encrypted, &decrypted, b"test");
    assert_success(&result, "decrypt");
    assert_eq!(fs::read(&decrypted).unwrap(), b"");
}

#[test]
fn test_large_file_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("large.bin");
    let encrypted = temp_dir.path().join("large.bin.menc");
    let decrypted = temp_dir.path().join("large-decrypted.bin");

    let large_content = common::pattern(1024 * 1024 + 7);
    fs::write(&plaintext, &large_content).unwrap();

    let result = run_io("encrypt", &plaintext, &encrypted, b"test");
    assert_success(&result, "encrypt");

    let result = run_io("decrypt", &encrypted, &decrypted, b"test");
    assert_success(&result, "decrypt");
    assert_eq!(fs::read(&decrypted).unwrap(), large_content);
}
