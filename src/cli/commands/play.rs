//! `play`: run a room on a virtual clock.
//!
//! The script drives a [`Simulation`] with a scripted renderer; the
//! resulting effects are printed either as sequenced events or as a raw
//! trace with virtual timestamps.

use std::io::{BufWriter, Write};

use crate::cli::args::{PlayArgs, PlayOutput};
use crate::cli::commands::load_room;
use crate::error::PacketwalkError;
use crate::observability::{Event, EventEmitter};
use crate::runtime::{Simulation, parse_script};

/// Play a room and print what happened.
///
/// # Errors
///
/// Returns a config error if the room cannot be loaded, a usage error if
/// the script does not parse, or an I/O error writing output.
pub fn run(args: &PlayArgs) -> Result<(), PacketwalkError> {
    if let Some(port) = args.metrics_port {
        crate::observability::init_metrics(Some(port))?;
        tracing::info!(port, "Prometheus metrics endpoint started");
    }

    let loaded = load_room(&args.source)?;
    let script_text = match &args.script_file {
        Some(path) => std::fs::read_to_string(path)?,
        None => args.script.clone(),
    };
    let steps = parse_script(&script_text)?;
    tracing::debug!(steps = steps.len(), "script parsed");

    let room_name = loaded.room.name.clone();
    let mut sim = Simulation::with_scripted_renderer(loaded.room);
    sim.run_script(&steps);

    if sim.pending() > 0 {
        tracing::info!(
            pending = sim.pending(),
            now_ms = sim.now().as_millis(),
            "script ended with events still queued"
        );
    }

    let trace = sim.take_trace();
    match args.output {
        PlayOutput::Events => {
            let emitter = match &args.events_file {
                Some(path) => EventEmitter::from_file(path)?,
                None => EventEmitter::stdout(),
            };
            emitter.emit(Event::session_started(&room_name));
            for entry in &trace {
                if let Some(event) = Event::from_effect(&entry.effect, entry.at) {
                    emitter.emit(event);
                }
            }
            emitter.emit(Event::session_stopped("script finished"));
        }
        PlayOutput::Trace => {
            let sink: Box<dyn Write> = match &args.events_file {
                Some(path) => Box::new(std::fs::File::create(path)?),
                None => Box::new(std::io::stdout().lock()),
            };
            let mut out = BufWriter::new(sink);
            for entry in &trace {
                serde_json::to_writer(&mut out, entry)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
    }

    Ok(())
}
