//! `rooms`: list the built-in rooms.

use serde::Serialize;

use crate::cli::args::{OutputFormat, RoomsArgs};
use crate::error::PacketwalkError;
use crate::scenarios::list_rooms;

#[derive(Serialize)]
struct RoomEntry<'a> {
    name: &'a str,
    description: &'a str,
    phases: &'a [&'a str],
}

/// Print the built-in room registry.
///
/// # Errors
///
/// Returns a JSON error if serialization fails.
pub fn run(args: &RoomsArgs) -> Result<(), PacketwalkError> {
    let rooms = list_rooms();

    match args.format {
        OutputFormat::Human => {
            let width = rooms.iter().map(|r| r.name.len()).max().unwrap_or(0);
            for room in rooms {
                println!(
                    "{:<width$}  {}  [{}]",
                    room.name,
                    room.description,
                    room.phases.join(", ")
                );
            }
        }
        OutputFormat::Json => {
            let entries: Vec<RoomEntry<'_>> = rooms
                .iter()
                .map(|r| RoomEntry {
                    name: r.name,
                    description: r.description,
                    phases: r.phases,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}
