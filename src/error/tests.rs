//! Tests for error types.

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("formatter elm: command is empty");
        assert_eq!(
            err.to_string(),
            "configuration error: formatter elm: command is empty"
        );
    }

    #[test]
    fn test_plan_error_unknown_before() {
        let err = PlanError::UnknownBefore {
            formatter: "hs-a".to_string(),
            before: "hs-b".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "formatter hs-a is before hs-b but config for hs-b was not found"
        );
    }

    #[test]
    fn test_plan_error_cycle_names_nodes() {
        let err = PlanError::Cycle {
            cycle: vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string(),
                "a".to_string(),
            ],
        };
        assert_eq!(err.to_string(), "formatter cycle detected: a -> b -> c -> a");
    }

    #[test]
    fn test_plan_error_unknown_formatter() {
        let err = PlanError::UnknownFormatter("foo".to_string());
        assert_eq!(err.to_string(), "formatter not found in config: foo");
    }

    #[test]
    fn test_plan_error_conversion() {
        let plan_err = PlanError::CommandNotFound {
            name: "elm".to_string(),
            command: "elm-format".to_string(),
        };
        let err: Error = plan_err.into();
        assert!(matches!(err, Error::Plan(_)));
        // Plan errors surface without an extra prefix.
        assert!(err.to_string().starts_with("formatter elm"));
    }

    #[test]
    fn test_walk_error_not_a_working_tree() {
        let err = WalkError::NotAWorkingTree {
            path: std::path::PathBuf::from("/tmp/tree"),
        };
        assert_eq!(err.to_string(), "/tmp/tree is not inside a git working tree");
        let err: Error = err.into();
        assert!(matches!(err, Error::Walk(_)));
    }

    #[test]
    fn test_engine_error_formatter_failed() {
        let err = EngineError::FormatterFailed {
            name: "rustfmt".to_string(),
            code: 1,
            stderr: "parse error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "formatter rustfmt exited with status 1: parse error"
        );
    }

    #[test]
    fn test_cache_error_busy() {
        let err: Error = CacheError::Busy.into();
        assert_eq!(
            err.to_string(),
            "cache error: cache is locked by another fmtree instance"
        );
    }

    #[test]
    fn test_cache_error_database() {
        let err = CacheError::Database("disk I/O error".to_string());
        assert_eq!(err.to_string(), "database error: disk I/O error");
    }

    #[test]
    fn test_fail_on_change_message() {
        let err = Error::FailOnChange { changed: 3 };
        assert_eq!(
            err.to_string(),
            "3 files changed while --fail-on-change is set"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_fatal_before_work() {
        assert!(Error::config("bad").is_fatal_before_work());
        assert!(Error::Plan(PlanError::UnknownFormatter("x".into())).is_fatal_before_work());
        assert!(Error::Cache(CacheError::Busy).is_fatal_before_work());
        assert!(!Error::Cancelled.is_fatal_before_work());
        assert!(!Error::FailOnChange { changed: 1 }.is_fatal_before_work());
    }

    #[test]
    fn test_error_propagation_with_question_mark() {
        fn inner() -> Result<i32> {
            Err(Error::config("inner error"))
        }

        fn outer() -> Result<i32> {
            let _ = inner()?;
            Ok(0)
        }

        let result = outer();
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().to_string(),
            "configuration error: inner error"
        );
    }
}
