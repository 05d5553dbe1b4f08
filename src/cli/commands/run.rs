//! `run`: drive a room live over stdio.

use tokio_util::sync::CancellationToken;

use crate::cli::args::RunArgs;
use crate::cli::commands::load_room;
use crate::error::PacketwalkError;
use crate::observability::EventEmitter;
use crate::runtime::{EofPolicy, LiveLoop};

/// Drive a room from NDJSON on stdin until cancelled or input ends.
///
/// # Errors
///
/// Returns a config error if the room cannot be loaded, or an I/O error
/// if stdio fails.
pub async fn run(args: &RunArgs, cancel: CancellationToken) -> Result<(), PacketwalkError> {
    if let Some(port) = args.metrics_port {
        crate::observability::init_metrics(Some(port))?;
        tracing::info!(port, "Prometheus metrics endpoint started");
    }

    let loaded = load_room(&args.source)?;

    let events = match &args.events_file {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::stderr(),
    };
    let eof = if args.exit_on_eof {
        EofPolicy::Exit
    } else {
        EofPolicy::Drain
    };

    tracing::info!(room = %loaded.room.name, phases = loaded.room.phases.len(), "starting live loop");
    let mut live = LiveLoop::new(loaded.room, tokio::io::stdout(), cancel)
        .with_events(events)
        .with_eof_policy(eof);
    live.run(tokio::io::stdin()).await
}
