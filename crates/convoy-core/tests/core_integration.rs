#![allow(clippy::unwrap_used, clippy::expect_used)]

use convoy_core::*;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// 1. Error Display and From impls
// ---------------------------------------------------------------------------

#[test]
fn error_display_and_from_impls() {
    let task = Uuid::new_v4();
    let missing = Uuid::new_v4();
    let dangling = ConvoyError::DanglingDependency { task, missing };
    assert_eq!(
        dangling.to_string(),
        format!("Task {task} depends on unknown task {missing}")
    );

    let role_err = ConvoyError::UnknownRole("auditor".to_string());
    assert_eq!(role_err.to_string(), "Unknown role: auditor");

    let model_err = ConvoyError::UnknownModel("gpt-9".to_string());
    assert_eq!(model_err.to_string(), "Unknown model: gpt-9");

    let unsupported = ConvoyError::UnsupportedTaskType {
        role: "tester".to_string(),
        task_type: "plan".to_string(),
    };
    assert_eq!(
        unsupported.to_string(),
        "Role tester does not accept plan tasks"
    );

    let planning = ConvoyError::Planning("connection refused".to_string());
    assert_eq!(planning.to_string(), "Planning error: connection refused");

    let config_err = ConvoyError::Config("missing key".to_string());
    assert_eq!(config_err.to_string(), "Config error: missing key");

    // From<serde_json::Error> conversion
    let bad_json = serde_json::from_str::<serde_json::Value>("not json");
    let convoy_err: ConvoyError = bad_json.unwrap_err().into();
    assert!(convoy_err.to_string().starts_with("JSON error:"));

    // From<std::io::Error> conversion
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
    let convoy_err: ConvoyError = io_err.into();
    assert!(convoy_err.to_string().starts_with("IO error:"));
}

// ---------------------------------------------------------------------------
// 2. ErrorKind classification drives retry decisions
// ---------------------------------------------------------------------------

#[test]
fn error_kind_classification() {
    let cases = [
        (
            ConvoyError::CyclicDependency { cycle: vec![] },
            ErrorKind::CyclicDependency,
            false,
        ),
        (
            ConvoyError::DuplicateTask(Uuid::new_v4()),
            ErrorKind::DuplicateTask,
            false,
        ),
        (
            ConvoyError::InvalidPlan("index 7".into()),
            ErrorKind::InvalidPlan,
            false,
        ),
        (
            ConvoyError::Provider("502 Bad Gateway".into()),
            ErrorKind::Provider,
            true,
        ),
        (ConvoyError::Timeout { after_ms: 5 }, ErrorKind::Timeout, true),
    ];

    for (err, kind, retryable) in cases {
        assert_eq!(err.kind(), kind, "{err}");
        assert_eq!(err.is_retryable(), retryable, "{err}");
    }
}

// ---------------------------------------------------------------------------
// 3. TaskError serialization
// ---------------------------------------------------------------------------

#[test]
fn task_error_serialization() {
    let failed = Uuid::new_v4();
    let detail = TaskError::dependency_failed(failed);
    assert_eq!(detail.kind, ErrorKind::DependencyFailed);
    assert!(detail.message.contains(&failed.to_string()));

    let json = serde_json::to_value(&detail).unwrap();
    assert_eq!(json["kind"], "dependency_failed");

    let parsed: TaskError = serde_json::from_value(json).unwrap();
    assert_eq!(parsed, detail);

    let bad: Result<ErrorKind, _> = serde_json::from_str("\"exploded\"");
    assert!(bad.is_err());
}
