//! CLI error paths and the exit codes they map to

use clap::Parser;
use faultmend::cli::{execute, Cli};
use faultmend::errors::{
    get_exit_code, EXIT_CONFIG_ERROR, EXIT_ERROR, EXIT_VALIDATION_ERROR,
};
use std::io::Write;
use tempfile::NamedTempFile;

fn file_with(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", content).unwrap();
    file
}

fn path(file: &NamedTempFile) -> &str {
    file.path().to_str().unwrap()
}

const CONTEXT: &str = r#"{
    "error_type": "TimeoutException",
    "message": "upstream timed out",
    "service_name": "checkout",
    "operation_name": "Checkout",
    "component_id": "checkout-api",
    "severity": "high"
}"#;

/// Config that points the analysis service at a closed port.
fn offline_config() -> NamedTempFile {
    file_with(
        r#"
        [llm]
        endpoint = "http://127.0.0.1:9"
        timeout_secs = 2
        "#,
    )
}

async fn run_cli(args: &[&str]) -> anyhow::Result<()> {
    let cli = Cli::try_parse_from(args).unwrap();
    execute(cli).await
}

#[tokio::test]
async fn test_invalid_plan_exits_with_validation_code() {
    let config = offline_config();
    let plan = file_with(r#"{"context": "nothing"}"#);
    let ctx = file_with(CONTEXT);

    let err = run_cli(&[
        "faultmend",
        "--config",
        path(&config),
        "validate-plan",
        path(&plan),
        path(&ctx),
    ])
    .await
    .unwrap_err();
    assert_eq!(get_exit_code(&err), EXIT_VALIDATION_ERROR);
    assert!(err.to_string().contains("no steps or strategies"));
}

#[tokio::test]
async fn test_valid_plan_succeeds() {
    let config = offline_config();
    let plan = file_with(r#"{"strategies": ["restart:target=checkout-api"]}"#);
    let ctx = file_with(CONTEXT);

    run_cli(&[
        "faultmend",
        "-c",
        path(&config),
        "validate-plan",
        path(&plan),
        path(&ctx),
    ])
    .await
    .unwrap();
}

#[tokio::test]
async fn test_out_of_range_config_exits_with_config_code() {
    let config = file_with(
        r#"
        [patterns]
        fingerprint_match_ratio = 1.5
        "#,
    );
    let ctx = file_with(CONTEXT);

    let err = run_cli(&["faultmend", "-c", path(&config), "graph", path(&ctx)])
        .await
        .unwrap_err();
    assert_eq!(get_exit_code(&err), EXIT_CONFIG_ERROR);
}

#[tokio::test]
async fn test_unreadable_context_is_a_general_error() {
    let config = offline_config();
    let ctx = file_with(r#"{"service_name": "checkout"}"#);

    let err = run_cli(&["faultmend", "-c", path(&config), "graph", path(&ctx)])
        .await
        .unwrap_err();
    assert_eq!(get_exit_code(&err), EXIT_ERROR);
    assert!(format!("{:#}", err).contains("error context"));
}

#[tokio::test]
async fn test_unreachable_analysis_service_still_succeeds() {
    let config = offline_config();
    let ctx = file_with(CONTEXT);

    run_cli(&[
        "faultmend",
        "-c",
        path(&config),
        "analyze",
        path(&ctx),
        "--plan",
    ])
    .await
    .unwrap();
}
