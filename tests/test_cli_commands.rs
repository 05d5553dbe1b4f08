mod common;

use common::{fixture_path, json_lines, run_command};
use serde_json::Value;

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// ============================================================================
// version / rooms / completions
// ============================================================================

#[test]
fn version_human() {
    let output = run_command(&["version"]);
    assert!(output.status.success());
    assert_eq!(
        stdout(&output).trim(),
        format!("packetwalk {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn version_json() {
    let output = run_command(&["version", "--format", "json"]);
    assert!(output.status.success());
    let parsed: Value = serde_json::from_str(&stdout(&output)).expect("valid JSON");
    assert_eq!(parsed["name"], "packetwalk");
    assert_eq!(parsed["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn rooms_json_lists_builtins() {
    let output = run_command(&["rooms", "--format", "json"]);
    assert!(output.status.success());
    let parsed: Value = serde_json::from_str(&stdout(&output)).expect("valid JSON");
    let names: Vec<&str> = parsed
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|r| r["name"].as_str())
        .collect();
    assert_eq!(names, ["firewall", "vpn", "tls"]);
}

#[test]
fn rooms_human_mentions_phases() {
    let output = run_command(&["rooms"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("dns, https, attack"));
}

#[test]
fn completions_bash() {
    let output = run_command(&["completions", "bash"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("packetwalk"));
}

// ============================================================================
// validate
// ============================================================================

#[test]
fn validate_valid_room() {
    let room = fixture_path("lab_room.yaml");
    let output = run_command(&["validate", room.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "validate should succeed for a valid room: {}",
        stderr(&output)
    );
    assert!(stdout(&output).contains(": ok"));
}

#[test]
fn validate_broken_room() {
    let room = fixture_path("broken_room.yaml");
    let output = run_command(&["validate", room.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));

    let out = stdout(&output);
    assert!(out.contains("FAILED"));
    assert!(out.contains("unknown anchor 'fw2' (did you mean 'fw1'?)"), "{out}");
    assert!(out.contains("unknown phase 'htps'"), "{out}");
}

#[test]
fn validate_missing_file() {
    let output = run_command(&["validate", "/tmp/nonexistent_packetwalk_room.yaml"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn validate_warnings_fail_only_when_strict() {
    let room = fixture_path("warning_room.yaml");
    let path = room.to_str().unwrap();

    let lenient = run_command(&["validate", path]);
    assert!(lenient.status.success(), "{}", stderr(&lenient));
    assert!(stdout(&lenient).contains("warning:"));

    let strict = run_command(&["validate", "--strict", path]);
    assert_eq!(strict.status.code(), Some(2));
}

#[test]
fn validate_reports_every_file() {
    let good = fixture_path("lab_room.yaml");
    let bad = fixture_path("broken_room.yaml");
    let output = run_command(&[
        "validate",
        "--format",
        "json",
        bad.to_str().unwrap(),
        good.to_str().unwrap(),
    ]);
    assert!(!output.status.success());

    let parsed: Value = serde_json::from_str(&stdout(&output)).expect("valid JSON");
    let reports = parsed.as_array().expect("array");
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["valid"], false);
    assert_eq!(reports[1]["valid"], true);
}

// ============================================================================
// evaluate
// ============================================================================

#[test]
fn evaluate_allowed_traffic() {
    let output = run_command(&[
        "evaluate", "-b", "firewall", "--src", "lan", "--dst", "wan", "--protocol", "tcp",
        "--port", "443", "--format", "json",
    ]);
    assert!(output.status.success(), "{}", stderr(&output));
    let parsed: Value = serde_json::from_str(&stdout(&output)).expect("valid JSON");
    assert_eq!(parsed["action"], "allow");
    assert_eq!(parsed["matched_rule_id"], "web-out");
    assert_eq!(parsed["matched_rule_index"], 1);
    assert_eq!(parsed["traffic"]["src_zone"], "LAN");
}

#[test]
fn evaluate_default_deny_is_not_an_error() {
    let output = run_command(&[
        "evaluate", "-b", "firewall", "--src", "wan", "--dst", "lan", "--port", "8080",
    ]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "WAN→LAN TCP/8080: deny (default policy)");
}

#[test]
fn evaluate_explicit_deny_names_rule() {
    let output = run_command(&[
        "evaluate", "-b", "firewall", "--src", "wan", "--dst", "lan", "--port", "22",
    ]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("deny (rule 'ssh-in' at index 2)"));
}

// ============================================================================
// play
// ============================================================================

#[test]
fn play_room_file_emits_sequenced_events() {
    let room = fixture_path("lab_room.yaml");
    let output = run_command(&["--quiet", "play", "--room", room.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));

    let events = json_lines(&output);
    let types: Vec<&str> = events.iter().filter_map(|e| e["type"].as_str()).collect();
    assert_eq!(types.first(), Some(&"SessionStarted"));
    assert_eq!(types.last(), Some(&"SessionStopped"));
    assert_eq!(types.iter().filter(|t| **t == "HopDispatched").count(), 2);
    assert!(types.contains(&"DecisionMade"));

    for (i, event) in events.iter().enumerate() {
        assert_eq!(event["sequence"], i as u64);
    }

    let idle = events
        .iter()
        .find(|e| e["type"] == "TrackIdle")
        .expect("track finished");
    assert_eq!(idle["outcome"], "completed");
    // 500ms travel + 1s hold + 500ms travel
    assert_eq!(idle["clock_ms"], 2000);
}

#[test]
fn play_trace_output_has_virtual_times() {
    let output = run_command(&[
        "--quiet", "play", "-b", "firewall", "--script", "attack settle", "--output", "trace",
    ]);
    assert!(output.status.success(), "{}", stderr(&output));

    let trace = json_lines(&output);
    let blocked = trace
        .iter()
        .find(|e| e["effect"]["notification"] == "track_blocked")
        .expect("attack is blocked");
    assert_eq!(blocked["effect"]["track"], "attack");
    assert_eq!(blocked["effect"]["decision"]["matched_rule_id"], "ssh-in");
    assert!(blocked["at_ms"].as_u64().unwrap() > 0);
}

#[test]
fn play_unknown_builtin_suggests_name() {
    let output = run_command(&["--quiet", "play", "-b", "tsl"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("did you mean 'tls'?"));
}

#[test]
fn play_bad_script_is_usage_error() {
    let output = run_command(&["--quiet", "play", "-b", "tls", "--script", "start jump"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn room_and_builtin_are_exclusive() {
    let room = fixture_path("lab_room.yaml");
    let output = run_command(&["play", "--room", room.to_str().unwrap(), "--builtin", "vpn"]);
    assert!(!output.status.success());
}
