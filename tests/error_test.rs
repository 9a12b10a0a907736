//! Tests for error types

use std::path::PathBuf;

use trueno_tracker::Error;

#[test]
fn test_not_found_error() {
    let error = Error::NotFound("run abc".to_string());
    assert_eq!(format!("{error}"), "Not found: run abc");
    assert!(error.is_not_found());
    assert!(!Error::QueueClosed.is_not_found());
}

#[test]
fn test_locked_error_suggests_force_resume() {
    let error = Error::Locked {
        run_hash: "abc".to_string(),
        owner: "pid 42".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Run abc is locked"));
    assert!(error_str.contains("pid 42"));
    assert!(error_str.contains("force_resume"));
}

#[test]
fn test_version_mismatch_error_carries_hint() {
    let error = Error::VersionMismatch {
        run_hash: "abc".to_string(),
        hint: "call Repo::upgrade_run(\"abc\")".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("legacy metric format"));
    assert!(error_str.contains("upgrade_run"));
}

#[test]
fn test_migration_failed_names_backup() {
    let error = Error::MigrationFailed {
        backup_path: PathBuf::from("/repo/bcp/abc.json"),
        source: Box::new(Error::Storage("disk full".to_string())),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Failed to convert metrics"));
    assert!(error_str.contains("disk full"));
    assert!(error_str.contains("/repo/bcp/abc.json"));
    assert!(std::error::Error::source(&error).is_some());
}

#[test]
fn test_incompatible_value_error() {
    let error = Error::IncompatibleValue {
        name: "loss".to_string(),
        sequence_dtype: "float".to_string(),
        value_dtype: "text".to_string(),
    };
    assert_eq!(
        format!("{error}"),
        "Cannot track text value on sequence 'loss' with dtype float"
    );
}

#[test]
fn test_teardown_error_lists_failures() {
    let error = Error::Teardown {
        run_hash: "abc".to_string(),
        failures: vec!["lock: denied".to_string(), "queue: closed".to_string()],
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("lock: denied; queue: closed"));
}

#[test]
fn test_unknown_sequence_kind_error() {
    let error = Error::UnknownSequenceKind("videos".to_string());
    assert_eq!(format!("{error}"), "'videos' is not a valid Sequence");
}

#[test]
fn test_invalid_run_hash_error() {
    let error = Error::InvalidRunHash("a/b".to_string());
    assert!(format!("{error}").contains("must not contain '/'"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = json_error.into();
    assert!(format!("{error}").contains("JSON error"));
}

#[test]
fn test_error_debug() {
    let error = Error::QueueClosed;
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("QueueClosed"));
}

#[test]
fn test_result_type_alias() {
    #[allow(clippy::unnecessary_wraps)]
    fn returns_result() -> trueno_tracker::Result<i32> {
        Ok(42)
    }

    let result = returns_result();
    assert!(result.is_ok());
    assert_eq!(result.unwrap(), 42);
}

#[test]
fn test_result_type_alias_error() {
    fn returns_error() -> trueno_tracker::Result<i32> {
        Err(Error::NotEnabled("abc".to_string()))
    }

    let result = returns_error();
    assert!(result.is_err());
}
