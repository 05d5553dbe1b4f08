//! `evaluate`: ask a room's firewall about one traffic descriptor.

use serde::Serialize;

use crate::cli::args::{EvaluateArgs, OutputFormat};
use crate::cli::commands::load_room;
use crate::error::PacketwalkError;
use crate::firewall::{Decision, FirewallTraffic, RuleBook};

#[derive(Serialize)]
struct Report<'a> {
    traffic: &'a FirewallTraffic,
    #[serde(flatten)]
    decision: &'a Decision,
}

/// Evaluate traffic against the room's initial rule list and print the
/// decision.
///
/// A deny is a normal answer, not an error.
///
/// # Errors
///
/// Returns a config error if the room cannot be loaded, or a JSON error
/// if serialization fails.
pub fn run(args: &EvaluateArgs) -> Result<(), PacketwalkError> {
    let loaded = load_room(&args.source)?;
    let book = RuleBook::new(loaded.room.rules);

    let traffic = FirewallTraffic {
        src_zone: args.src,
        dst_zone: args.dst,
        protocol: args.protocol.clone(),
        port: args.port,
    };
    let decision = book.evaluate(&traffic);
    tracing::debug!(%traffic, action = %decision.action, "evaluated");

    match args.format {
        OutputFormat::Human => match &decision.matched_rule_id {
            Some(id) => println!(
                "{traffic}: {} (rule '{id}' at index {})",
                decision.action,
                decision.matched_rule_index.unwrap_or_default()
            ),
            None => println!("{traffic}: {} (default policy)", decision.action),
        },
        OutputFormat::Json => {
            let report = Report {
                traffic: &traffic,
                decision: &decision,
            };
            println!("{}", serde_json::to_string(&report)?);
        }
    }
    Ok(())
}
