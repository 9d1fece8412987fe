//! menc CLI - Passphrase-based streaming file encryption
//!
//! Command-line interface for encrypting and decrypting files into the
//! chunked menc container format.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;

use menc::container::{Header, TAG_LEN};
use menc::file_ops;
use menc::passphrase::{PassphraseReader, ReaderPassphraseReader, TerminalPassphraseReader};

#[derive(Parser)]
#[command(name = "menc")]
#[command(version)]
#[command(about = "Passphrase-based streaming file encryption.", long_about = None)]
struct Cli {
    /// Read passphrase from stdin instead of from terminal
    #[arg(long, global = true, env = "MENC_PASSPHRASE_STDIN")]
    passphrase_stdin: bool,

    /// Log filter used when RUST_LOG is not set (e.g. "debug", "menc=trace")
    #[arg(long, global = true, env = "MENC_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a file
    #[command(alias = "e")]
    Encrypt {
        /// Path to the file whose contents is to be encrypted
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the file to write the encrypted container to
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Decrypt a file
    #[command(alias = "d")]
    Decrypt {
        /// Path to the container to be decrypted
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the file to write the unencrypted text to
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Update an encrypted file with new content, while validating
    /// that the passphrase is not accidentally changed.
    #[command(alias = "u")]
    Update {
        /// Path to the file whose contents is to be encrypted
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the existing menc file to replace with the new container
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Print the header of a container without decrypting it
    Inspect {
        /// Path to the container to inspect
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log);

    let result = match cli.command {
        Commands::Encrypt { input, output } => {
            let mut reader = get_passphrase_reader(cli.passphrase_stdin, true);
            file_ops::encrypt_file(&input, &output, &mut *reader)
        }
        Commands::Decrypt { input, output } => {
            let mut reader = get_passphrase_reader(cli.passphrase_stdin, false);
            file_ops::decrypt_file(&input, &output, &mut *reader).map(|_| ())
        }
        Commands::Update { input, output } => {
            let mut reader = get_passphrase_reader(cli.passphrase_stdin, false);
            file_ops::update_file(&input, &output, &mut *reader)
        }
        Commands::Inspect { input } => {
            file_ops::inspect(&input).map(|header| print_header(&input, &header))
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = cause.source();
        }
        process::exit(1);
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn get_passphrase_reader(use_stdin: bool, confirm: bool) -> Box<dyn PassphraseReader> {
    if use_stdin {
        Box::new(ReaderPassphraseReader::new(Box::new(std::io::stdin())))
    } else if confirm {
        Box::new(TerminalPassphraseReader::with_confirmation())
    } else {
        Box::new(TerminalPassphraseReader::new())
    }
}

fn print_header(path: &Path, header: &Header) {
    println!("file:        {}", path.display());
    println!("version:     {}", header.version);
    println!("salt:        {}", URL_SAFE_NO_PAD.encode(header.salt));
    println!("nonce:       {}", URL_SAFE_NO_PAD.encode(header.nonce));
    println!("chunk_count: {}", header.chunk_count);
    println!("tag_len:     {}", TAG_LEN);
}
