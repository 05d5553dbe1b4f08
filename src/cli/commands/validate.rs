//! `validate`: check room files without playing them.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::{LoadWarning, RoomLoader};
use crate::error::{ConfigError, PacketwalkError, Severity, ValidationIssue};

#[derive(Debug, Serialize)]
struct FileReport {
    file: PathBuf,
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<LoadWarning>,
}

/// Validate every file, report all of them, then fail if any failed.
///
/// With `--strict`, a file with warnings fails too.
///
/// # Errors
///
/// Returns the first failing file's config error once every file has been
/// reported.
pub fn run(args: &ValidateArgs) -> Result<(), PacketwalkError> {
    let loader = RoomLoader::with_defaults();
    let mut first_failure: Option<ConfigError> = None;
    let mut reports = Vec::with_capacity(args.files.len());

    for path in &args.files {
        tracing::info!(file = %path.display(), "validating room");
        let (report, failure) = check(&loader, path, args.strict);
        if first_failure.is_none() {
            first_failure = failure;
        }
        reports.push(report);
    }

    match args.format {
        OutputFormat::Human => {
            for report in &reports {
                print_human(report);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
    }

    first_failure.map_or(Ok(()), |e| Err(e.into()))
}

fn check(loader: &RoomLoader, path: &Path, strict: bool) -> (FileReport, Option<ConfigError>) {
    match loader.load(path) {
        Ok(result) => {
            let failure = (strict && !result.warnings.is_empty()).then(|| {
                ConfigError::ValidationError {
                    path: path.display().to_string(),
                    errors: result
                        .warnings
                        .iter()
                        .map(|w| ValidationIssue {
                            path: w.location.clone().unwrap_or_default(),
                            message: w.message.clone(),
                            severity: Severity::Warning,
                        })
                        .collect(),
                }
            });
            let report = FileReport {
                file: path.to_path_buf(),
                valid: failure.is_none(),
                errors: Vec::new(),
                warnings: result.warnings,
            };
            (report, failure)
        }
        Err(e) => {
            let errors = match &e {
                ConfigError::ValidationError { errors, .. } => {
                    errors.iter().map(ToString::to_string).collect()
                }
                other => vec![other.to_string()],
            };
            let report = FileReport {
                file: path.to_path_buf(),
                valid: false,
                errors,
                warnings: Vec::new(),
            };
            (report, Some(e))
        }
    }
}

fn print_human(report: &FileReport) {
    let status = if report.valid { "ok" } else { "FAILED" };
    println!("{}: {status}", report.file.display());
    for error in &report.errors {
        println!("  {error}");
    }
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn room_file(yaml: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    const CLEAN: &str = r"
room:
  name: clean
anchors:
  a: { position: [0, 0, 0] }
  b: { position: [1, 0, 0] }
phases:
  dns:
    path:
      - { from: a, to: b }
";

    const WARNS: &str = r"
room:
  name: warns
anchors:
  a: { position: [0, 0, 0] }
phases:
  dns:
    path: []
";

    #[test]
    fn clean_file_passes_strict() {
        let file = room_file(CLEAN);
        let (report, failure) = check(&RoomLoader::with_defaults(), file.path(), true);
        assert!(report.valid);
        assert!(failure.is_none());
    }

    #[test]
    fn warnings_fail_only_in_strict_mode() {
        let file = room_file(WARNS);
        let loader = RoomLoader::with_defaults();

        let (lenient, failure) = check(&loader, file.path(), false);
        assert!(lenient.valid);
        assert!(!lenient.warnings.is_empty());
        assert!(failure.is_none());

        let (strict, failure) = check(&loader, file.path(), true);
        assert!(!strict.valid);
        assert!(matches!(failure, Some(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn missing_file_is_reported() {
        let (report, failure) = check(
            &RoomLoader::with_defaults(),
            Path::new("/nonexistent/room.yaml"),
            false,
        );
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(failure.is_some());
    }
}
