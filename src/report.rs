//! Summary output and exit status mapping.

use crate::error::Error;
use crate::stats::StatsSnapshot;
use crate::Result;

/// Exit status for configuration, planning, walk and cache errors.
pub const EXIT_ERROR: i32 = 1;
/// Exit status when at least one formatter failed.
pub const EXIT_FORMATTER_FAILED: i32 = 2;
/// Exit status for `--fail-on-change` with a non-zero change count.
pub const EXIT_FAIL_ON_CHANGE: i32 = 3;
/// Exit status after an interrupt, following shell convention.
pub const EXIT_CANCELLED: i32 = 130;

/// Print the run summary.
///
/// The `N files changed` line is the tool's contract with scripts and is
/// always printed to stdout; the counter breakdown goes to the log.
pub fn print_summary(snapshot: &StatsSnapshot) {
    println!("{} files changed", snapshot.changed);

    tracing::debug!(
        traversed = snapshot.traversed,
        matched = snapshot.matched,
        formatted = snapshot.formatted,
        changed = snapshot.changed,
        walk_ms = u64::try_from(snapshot.walk.as_millis()).unwrap_or(u64::MAX),
        format_ms = u64::try_from(snapshot.format.as_millis()).unwrap_or(u64::MAX),
        "run complete"
    );
}

/// Enforce `--fail-on-change`.
///
/// # Errors
///
/// Returns `Error::FailOnChange` when enabled and files changed.
pub fn check_fail_on_change(enabled: bool, snapshot: &StatsSnapshot) -> Result<()> {
    if enabled && snapshot.changed > 0 {
        return Err(Error::FailOnChange {
            changed: snapshot.changed,
        });
    }
    Ok(())
}

/// Map an error to the process exit status.
#[must_use]
pub fn exit_code(error: &Error) -> i32 {
    match error {
        Error::FailOnChange { .. } => EXIT_FAIL_ON_CHANGE,
        Error::Engine(_) => EXIT_FORMATTER_FAILED,
        Error::Cancelled => EXIT_CANCELLED,
        Error::Config(_) | Error::Plan(_) | Error::Walk(_) | Error::Cache(_) | Error::Io(_) => {
            EXIT_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, PlanError};
    use std::time::Duration;

    fn snapshot(changed: u64) -> StatsSnapshot {
        StatsSnapshot {
            traversed: 10,
            matched: changed,
            formatted: changed,
            changed,
            walk: Duration::ZERO,
            format: Duration::ZERO,
        }
    }

    #[test]
    fn test_fail_on_change_disabled() {
        assert!(check_fail_on_change(false, &snapshot(5)).is_ok());
    }

    #[test]
    fn test_fail_on_change_zero_changes() {
        assert!(check_fail_on_change(true, &snapshot(0)).is_ok());
    }

    #[test]
    fn test_fail_on_change_triggers() {
        let err = check_fail_on_change(true, &snapshot(3)).unwrap_err();
        assert!(matches!(err, Error::FailOnChange { changed: 3 }));
        assert_eq!(exit_code(&err), EXIT_FAIL_ON_CHANGE);
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let config = Error::config("bad config");
        let plan = Error::Plan(PlanError::UnknownFormatter("x".to_string()));
        let formatter = Error::Engine(EngineError::FormatterFailed {
            name: "f".to_string(),
            code: 1,
            stderr: String::new(),
        });
        let fail_on_change = Error::FailOnChange { changed: 1 };

        assert_eq!(exit_code(&config), EXIT_ERROR);
        assert_eq!(exit_code(&plan), EXIT_ERROR);
        assert_eq!(exit_code(&formatter), EXIT_FORMATTER_FAILED);
        assert_eq!(exit_code(&fail_on_change), EXIT_FAIL_ON_CHANGE);
        assert_eq!(exit_code(&Error::Cancelled), EXIT_CANCELLED);

        assert_ne!(EXIT_ERROR, EXIT_FORMATTER_FAILED);
        assert_ne!(EXIT_FORMATTER_FAILED, EXIT_FAIL_ON_CHANGE);
    }
}
