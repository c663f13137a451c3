//! Entry point for `serial-link`.
//!
//! Parses CLI arguments and dispatches into either **send** or **receive**
//! mode.  All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, argument parsing, file I/O).

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use serial_link::config::{DEFAULT_BAUD_RATE, DEFAULT_RETRANSMISSIONS, DEFAULT_TIMEOUT_SECS};
use serial_link::{Link, LinkConfig, LinkError, Role, MAX_PAYLOAD_SIZE};

/// Reliable file transfer over a serial line.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Open the link as initiator and transmit a file.
    Send {
        #[command(flatten)]
        link: LinkArgs,
        /// File to transmit.
        file: PathBuf,
    },
    /// Open the link as responder and write everything received to a file.
    Receive {
        #[command(flatten)]
        link: LinkArgs,
        /// Destination file (created or truncated).
        file: PathBuf,
    },
}

#[derive(Args)]
struct LinkArgs {
    /// Serial device (e.g. /dev/ttyS0).
    #[arg(short, long)]
    port: String,
    /// Line rate in bits per second.
    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,
    /// Seconds to wait for each reply.
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,
    /// Transmissions per frame before giving up.
    #[arg(short, long, default_value_t = DEFAULT_RETRANSMISSIONS)]
    retries: u32,
}

impl LinkArgs {
    fn into_config(self, role: Role) -> LinkConfig {
        LinkConfig::new(role, self.port)
            .with_baud_rate(self.baud)
            .with_timeout_secs(self.timeout)
            .with_retransmissions(self.retries)
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{}: {source}", .path.display())]
    File { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Link(#[from] LinkError),
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    let result = match cli.mode {
        Mode::Send { link, file } => send_file(link.into_config(Role::Initiator), &file).await,
        Mode::Receive { link, file } => {
            receive_file(link.into_config(Role::Responder), &file).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            eprintln!("serial-link: {e}");
            ExitCode::FAILURE
        }
    }
}

fn file_error(path: &Path) -> impl FnOnce(io::Error) -> CliError + '_ {
    move |source| CliError::File {
        path: path.to_path_buf(),
        source,
    }
}

async fn send_file(config: LinkConfig, path: &Path) -> Result<(), CliError> {
    let data = tokio::fs::read(path).await.map_err(file_error(path))?;
    log::info!("Sending {} ({} bytes) on {}", path.display(), data.len(), config.channel);

    let mut link = Link::open_device(config).await?;
    for (index, chunk) in data.chunks(MAX_PAYLOAD_SIZE).enumerate() {
        if let Err(e) = link.send(chunk).await {
            log::warn!("packet {index} failed: {e}");
            // Best effort: the peer may still be listening for DISC.
            let _ = link.close().await;
            return Err(e.into());
        }
        log::debug!("packet {index}: {} bytes acknowledged", chunk.len());
    }
    link.close().await?;

    let stats = link.stats();
    log::info!(
        "Done: {} frames sent, {} retransmissions, {} timeouts",
        stats.frames_sent,
        stats.retransmissions,
        stats.timeouts
    );
    Ok(())
}

async fn receive_file(config: LinkConfig, path: &Path) -> Result<(), CliError> {
    let mut out = tokio::fs::File::create(path)
        .await
        .map_err(file_error(path))?;
    log::info!("Receiving into {} on {}", path.display(), config.channel);

    let mut link = Link::open_device(config).await?;
    let mut received = 0usize;
    loop {
        match link.receive().await {
            Ok(Some(payload)) => {
                if let Err(e) = out.write_all(&payload).await {
                    log::warn!("writing {} failed: {e}", path.display());
                    let _ = link.close().await;
                    return Err(file_error(path)(e));
                }
                received += payload.len();
            }
            Ok(None) => {}
            Err(LinkError::PeerDisconnected) => break,
            Err(e) => {
                let _ = link.close().await;
                return Err(e.into());
            }
        }
    }
    out.flush().await.map_err(file_error(path))?;
    link.close().await?;

    let stats = link.stats();
    log::info!(
        "Done: {received} bytes in {} packets, {} duplicates, {} rejections",
        stats.packets_delivered,
        stats.duplicates,
        stats.rejections_sent
    );
    Ok(())
}
