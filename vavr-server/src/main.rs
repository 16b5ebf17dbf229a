//! virtualavr
//!
//! Compiles an Arduino program, runs it on a virtual AVR and exposes the
//! board over a WebSocket control protocol. The emulated UART is attached to
//! stdio, a serial device or a TCP peer.

mod config;
mod transport;
mod ws;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vavr_bridge::{
    command_queue, load_program, spawn_session, ArduinoCli, PinMap, ProgramSource, Session,
};
use vavr_sim::VirtualMcu;

use config::Config;

/// Capacity of the event and frame broadcast channels
const EVENT_CAPACITY: usize = 4096;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Logs go to stderr so stdout can carry serial data
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting virtualavr");

    let source = ProgramSource::from_path(&config.filename)
        .with_context(|| format!("cannot use {}", config.filename.display()))?;
    let toolchain = ArduinoCli::new().with_extra_flags(config.extra_flags());
    let image = load_program(&source, &toolchain)
        .await
        .context("failed to load program")?;

    let mcu = VirtualMcu::with_baud(config.firmware.build(), config.baudrate);
    warn!(firmware = mcu.firmware_name(), "{}", config.firmware_notice());

    let (commands, queue) = command_queue();
    let session = Session::load(mcu, &image, PinMap::uno(), &config.bridge_config(), queue)
        .context("failed to start session")?;

    let (event_tx, event_rx) = broadcast::channel(EVENT_CAPACITY);
    let (serial_tx, serial_rx) = mpsc::unbounded_channel();
    let (handle, mut session_task) = spawn_session(session, commands.clone(), event_tx, serial_tx);

    let (frame_tx, _) = broadcast::channel(EVENT_CAPACITY);
    tokio::spawn(ws::forward_events(event_rx, frame_tx.clone()));

    let listener = TcpListener::bind(("0.0.0.0", config.ws_port))
        .await
        .with_context(|| format!("cannot listen on port {}", config.ws_port))?;
    info!(port = config.ws_port, "WebSocket endpoint listening");
    let mut server = tokio::spawn(ws::serve(listener, ws::Hub::new(commands.clone(), frame_tx)));

    let endpoint = config.serial_endpoint();
    tokio::spawn(async move {
        if let Err(e) = transport::run(endpoint, commands, serial_rx).await {
            error!("serial transport failed: {}", e);
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
        result = &mut server => match result {
            Ok(Ok(())) => warn!("WebSocket server exited"),
            Ok(Err(e)) => error!("WebSocket server failed: {}", e),
            Err(e) => error!("WebSocket server task failed: {}", e),
        },
        result = &mut session_task => {
            let snapshot = result.context("session task failed")?;
            info!(cycles = snapshot.cycles, "session ended");
            return Ok(());
        }
    }

    handle.shutdown().await;
    let snapshot = session_task.await.context("session task failed")?;
    info!(
        cycles = snapshot.cycles,
        cpu_time = snapshot.cpu_time,
        "session ended"
    );
    server.abort();

    Ok(())
}
