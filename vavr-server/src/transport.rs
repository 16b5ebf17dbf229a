//! Serial byte-stream transports
//!
//! Connects the emulated UART to the outside: stdin/stdout, a serial device
//! (for example one end of a socat PTY pair) or a TCP peer. Inbound bytes are
//! handed to the session's [`CommandSender`]; bytes the UART transmitted
//! arrive as chunks on an unbounded channel and are written out in order.

use std::path::PathBuf;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};
use vavr_bridge::CommandSender;

const READ_BUFFER: usize = 1024;

/// Where the emulated UART is connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEndpoint {
    /// Standard input and output of the process
    Stdio,
    /// A serial device opened at `baud`
    Device {
        /// Device path
        path: PathBuf,
        /// Line speed
        baud: u32,
    },
    /// A TCP peer at `host:port`
    Tcp(String),
}

/// Errors opening or using a transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// Serial device could not be opened
    #[error("cannot open {path}: {source}")]
    Device {
        /// Device path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: tokio_serial::Error,
    },

    /// TCP connect failed
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        /// Peer address
        addr: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Read or write failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Open `endpoint` and relay bytes until the session or the peer goes away
pub async fn run(
    endpoint: SerialEndpoint,
    commands: CommandSender,
    serial_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> Result<(), TransportError> {
    match endpoint {
        SerialEndpoint::Stdio => {
            info!("serial attached to stdio");
            pump(tokio::io::stdin(), tokio::io::stdout(), commands, serial_rx).await
        }
        SerialEndpoint::Device { path, baud } => {
            let stream = tokio_serial::new(path.to_string_lossy(), baud)
                .open_native_async()
                .map_err(|source| TransportError::Device {
                    path: path.clone(),
                    source,
                })?;
            info!(path = %path.display(), baud, "serial attached to device");
            let (reader, writer) = tokio::io::split(stream);
            pump(reader, writer, commands, serial_rx).await
        }
        SerialEndpoint::Tcp(addr) => {
            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|source| TransportError::Connect {
                    addr: addr.clone(),
                    source,
                })?;
            info!(%addr, "serial attached to TCP peer");
            let (reader, writer) = stream.into_split();
            pump(reader, writer, commands, serial_rx).await
        }
    }
}

/// Relay bytes between a reader/writer pair and the session
///
/// Reading stops at end of input; writing continues until the session drops
/// its end of `serial_rx`.
pub async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    commands: CommandSender,
    mut serial_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; READ_BUFFER];
    let mut reading = true;

    loop {
        tokio::select! {
            result = reader.read(&mut buffer), if reading => {
                let n = result?;
                if n == 0 {
                    debug!("serial input closed");
                    reading = false;
                    continue;
                }
                if commands.send_serial(buffer[..n].to_vec()).is_err() {
                    debug!("session gone, dropping serial input");
                    break;
                }
            }
            chunk = serial_rx.recv() => {
                let Some(chunk) = chunk else {
                    break;
                };
                writer.write_all(&chunk).await?;
                writer.flush().await?;
            }
        }
    }

    Ok(())
}
