//! CLI command dispatch and handlers
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod completions;
pub mod evaluate;
pub mod play;
pub mod rooms;
pub mod run;
pub mod validate;
pub mod version;

use tokio_util::sync::CancellationToken;

use crate::cli::args::{Cli, Commands, RoomSource};
use crate::config::{LoadResult, RoomLoader};
use crate::error::PacketwalkError;
use crate::scenarios;

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<(), PacketwalkError> {
    match cli.command {
        Commands::Play(args) => play::run(&args),
        Commands::Run(args) => run::run(&args, cancel).await,
        Commands::Validate(args) => validate::run(&args),
        Commands::Evaluate(args) => evaluate::run(&args),
        Commands::Rooms(args) => rooms::run(&args),
        Commands::Completions(args) => {
            completions::run(&args);
            Ok(())
        }
        Commands::Version(args) => {
            version::run(&args);
            Ok(())
        }
    }
}

/// Loads the room named by `--room` or `--builtin` and logs its warnings.
///
/// # Errors
///
/// Returns a usage error if neither source is given (clap normally
/// prevents this), or the loader's error.
pub(crate) fn load_room(source: &RoomSource) -> Result<LoadResult, PacketwalkError> {
    let result = match (&source.room, &source.builtin) {
        (Some(path), _) => {
            tracing::info!(room = %path.display(), "loading room");
            RoomLoader::with_defaults().load(path)?
        }
        (None, Some(name)) => {
            tracing::info!(builtin = %name, "loading built-in room");
            scenarios::load_builtin(name)?
        }
        (None, None) => {
            return Err(PacketwalkError::Usage(
                "either --room or --builtin is required".to_string(),
            ));
        }
    };

    for warning in &result.warnings {
        tracing::warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }

    Ok(result)
}
