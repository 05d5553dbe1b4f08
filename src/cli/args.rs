//! CLI argument definitions
//!
//! All Clap derive structs for `packetwalk` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::firewall::Zone;

// ============================================================================
// Root CLI
// ============================================================================

/// Flow choreography for network-security lessons.
#[derive(Parser, Debug)]
#[command(name = "packetwalk", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "PACKETWALK_COLOR")]
    pub color: ColorChoice,

    /// Log line format.
    #[arg(long, default_value = "human", global = true, env = "PACKETWALK_LOG_FORMAT")]
    pub log_format: OutputFormat,
}

// ============================================================================
// Top-Level Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Play a room on a virtual clock and print what happens.
    Play(PlayArgs),

    /// Drive a room live: NDJSON commands and renderer events on stdin,
    /// render commands and notifications on stdout.
    Run(RunArgs),

    /// Validate room files.
    Validate(ValidateArgs),

    /// Evaluate one traffic descriptor against a room's firewall rules.
    Evaluate(EvaluateArgs),

    /// List built-in rooms.
    Rooms(RoomsArgs),

    /// Generate shell completion scripts.
    Completions(CompletionsArgs),

    /// Display version information.
    Version(VersionArgs),
}

// ============================================================================
// Room Selection
// ============================================================================

/// Where to load a room from.
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct RoomSource {
    /// Path to a room YAML file.
    #[arg(short, long, env = "PACKETWALK_ROOM")]
    pub room: Option<PathBuf>,

    /// Name of a built-in room (see `packetwalk rooms`).
    #[arg(short, long)]
    pub builtin: Option<String>,
}

// ============================================================================
// Play / Run
// ============================================================================

/// Arguments for `play`.
#[derive(Args, Debug)]
pub struct PlayArgs {
    /// Room to play.
    #[command(flatten)]
    pub source: RoomSource,

    /// Steps separated by spaces or commas, e.g. `"start wait:3s next settle"`.
    #[arg(short, long, default_value = "start settle", conflicts_with = "script_file")]
    pub script: String,

    /// Read the script from a file instead.
    #[arg(long)]
    pub script_file: Option<PathBuf>,

    /// What to print.
    #[arg(short, long, default_value = "events")]
    pub output: PlayOutput,

    /// Write output to a file instead of stdout.
    #[arg(long, env = "PACKETWALK_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Expose Prometheus metrics on this port.
    #[arg(long, env = "PACKETWALK_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Room to drive.
    #[command(flatten)]
    pub source: RoomSource,

    /// Write structured events to a file instead of stderr.
    #[arg(long, env = "PACKETWALK_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Exit as soon as stdin closes instead of letting pending timers fire.
    #[arg(long)]
    pub exit_on_eof: bool,

    /// Expose Prometheus metrics on this port.
    #[arg(long, env = "PACKETWALK_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

// ============================================================================
// Validate / Evaluate / Rooms
// ============================================================================

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Room files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for `evaluate`.
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Room whose rules to use.
    #[command(flatten)]
    pub source: RoomSource,

    /// Source zone.
    #[arg(long)]
    pub src: Zone,

    /// Destination zone.
    #[arg(long)]
    pub dst: Zone,

    /// Protocol name (case-insensitive).
    #[arg(long, default_value = "TCP")]
    pub protocol: String,

    /// Destination port.
    #[arg(long)]
    pub port: u16,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Arguments for `rooms`.
#[derive(Args, Debug)]
pub struct RoomsArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// Completions / Version
// ============================================================================

/// Arguments for shell completion generation.
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell for completion script.
    pub shell: Shell,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

/// What `play` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PlayOutput {
    /// Sequenced JSONL events.
    #[default]
    Events,
    /// Every effect with its virtual time.
    Trace,
}

/// Shell type for completion generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    /// Bash shell.
    Bash,
    /// Zsh shell.
    Zsh,
    /// Fish shell.
    Fish,
    /// `PowerShell`.
    #[value(name = "powershell")]
    PowerShell,
    /// Elvish shell.
    Elvish,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_with_builtin() {
        let cli = Cli::try_parse_from(["packetwalk", "play", "--builtin", "firewall"]);
        assert!(cli.is_ok(), "Failed to parse: {cli:?}");
    }

    #[test]
    fn test_room_and_builtin_mutually_exclusive() {
        let cli = Cli::try_parse_from([
            "packetwalk",
            "play",
            "--room",
            "lab.yaml",
            "--builtin",
            "vpn",
        ]);
        assert!(cli.is_err(), "Expected mutual exclusion error");
    }

    #[test]
    fn test_room_source_required() {
        let cli = Cli::try_parse_from(["packetwalk", "run"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_play_defaults() {
        let cli = Cli::try_parse_from(["packetwalk", "play", "-b", "tls"]).unwrap();
        let Commands::Play(args) = cli.command else {
            panic!("Expected PlayArgs");
        };
        assert_eq!(args.script, "start settle");
        assert_eq!(args.output, PlayOutput::Events);
        assert_eq!(args.source.builtin.as_deref(), Some("tls"));
    }

    #[test]
    fn test_script_and_script_file_conflict() {
        let cli = Cli::try_parse_from([
            "packetwalk",
            "play",
            "-b",
            "tls",
            "--script",
            "start",
            "--script-file",
            "s.txt",
        ]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_evaluate_parses_zones() {
        let cli = Cli::try_parse_from([
            "packetwalk",
            "evaluate",
            "-b",
            "firewall",
            "--src",
            "wan",
            "--dst",
            "lan",
            "--port",
            "22",
        ])
        .unwrap();
        let Commands::Evaluate(args) = cli.command else {
            panic!("Expected EvaluateArgs");
        };
        assert_eq!((args.src, args.dst), (Zone::Wan, Zone::Lan));
        assert_eq!(args.protocol, "TCP");
    }

    #[test]
    fn test_help_output() {
        let err = Cli::try_parse_from(["packetwalk", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_version_output() {
        let err = Cli::try_parse_from(["packetwalk", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_color_choices_parse() {
        for variant in ["auto", "always", "never"] {
            let cli = Cli::try_parse_from(["packetwalk", "--color", variant, "rooms"]);
            assert!(cli.is_ok(), "Failed to parse color={variant}");
        }
    }

    #[test]
    fn test_validate_requires_files() {
        let result = Cli::try_parse_from(["packetwalk", "validate"]);
        assert!(result.is_err(), "Expected error for missing files");
    }

    #[test]
    fn test_completions_shells_parse() {
        for shell in ["bash", "zsh", "fish", "powershell", "elvish"] {
            let cli = Cli::try_parse_from(["packetwalk", "completions", shell]);
            assert!(cli.is_ok(), "Failed to parse shell={shell}");
        }
    }

    #[test]
    fn test_verbose_count() {
        let cli = Cli::try_parse_from(["packetwalk", "-vvv", "rooms"]).unwrap();
        assert_eq!(cli.verbose, 3);
    }

    #[test]
    fn test_cli_debug_assert() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
