//! Configuration loading and validation tests
//!
//! Tests focus on observable outcomes of loading a file: defaults filled in,
//! overrides applied and bad values rejected before the server starts.

use neuropipe::config::{ConfigError, PipelineConfig};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio_test::{assert_err, assert_ok};

const STAGES: &str = r#"
[stages.segmentation]
command = "python"
args = ["-m", "segment"]
timeout_secs = 900

[stages.features]
command = "python"
args = ["-m", "radiomics"]

[stages.reports]
command = "report-writer"
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(&format!(
        r#"
[server]
host = "127.0.0.1"
api_prefix = "v1"
cors_origins = ["https://viewer.example.org"]

[storage]
upload_dir = "/data/uploads"
output_dir = "/data/outputs"
reports_dir = "/data/reports"

[registry]
retention_secs = 86400
sweep_interval_secs = 600
{STAGES}"#
    ));

    let config = assert_ok!(PipelineConfig::load_from_file(temp_file.path()));

    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.api_prefix, "v1");
    assert_eq!(config.server.cors_origins, vec!["https://viewer.example.org"]);
    assert_eq!(config.storage.upload_dir, PathBuf::from("/data/uploads"));
    assert_eq!(config.registry.retention(), Some(Duration::from_secs(86400)));
    assert_eq!(config.registry.sweep_interval(), Duration::from_secs(600));
    assert_eq!(config.stages.segmentation.args, vec!["-m", "segment"]);
    assert_eq!(config.stages.segmentation.timeout_secs, Some(900));
    assert_eq!(config.stages.reports.timeout_secs, None);
}

#[test]
fn test_config_fills_defaults_for_omitted_sections() {
    let temp_file = write_config(STAGES);

    let config = assert_ok!(PipelineConfig::load_from_file(temp_file.path()));

    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.api_prefix, "api");
    assert_eq!(config.storage.output_dir, PathBuf::from("outputs"));
    assert_eq!(config.storage.reports_dir, PathBuf::from("reports"));
    assert!(config.storage.create_dirs);
    assert_eq!(config.registry.retention(), None);
}

#[test]
fn test_missing_file_is_read_error() {
    let err = assert_err!(PipelineConfig::load_from_file(
        std::path::Path::new("/nonexistent/neuropipe.toml")
    ));
    assert!(matches!(err, ConfigError::FileRead(_)));
}

#[test]
fn test_invalid_toml_is_parse_error() {
    let temp_file = write_config("[server\nport = ");

    let err = assert_err!(PipelineConfig::load_from_file(temp_file.path()));
    assert!(matches!(err, ConfigError::TomlParse(_)));
}

#[test]
fn test_missing_stage_section_is_parse_error() {
    let temp_file = write_config(
        r#"
[stages.segmentation]
command = "segment"
"#,
    );

    let err = assert_err!(PipelineConfig::load_from_file(temp_file.path()));
    assert!(matches!(err, ConfigError::TomlParse(_)));
}

#[test]
fn test_invalid_values_fail_validation() {
    let cases = [
        ("[server]\napi_prefix = \"api/v1\"\n", "api_prefix"),
        ("[server]\ncors_origins = [\"localhost:3000\"]\n", "cors_origins"),
        ("[registry]\nsweep_interval_secs = 0\n", "sweep_interval_secs"),
    ];

    for (section, field) in cases {
        let temp_file = write_config(&format!("{section}{STAGES}"));
        let err = assert_err!(PipelineConfig::load_from_file(temp_file.path()));
        match err {
            ConfigError::InvalidConfig(message) => assert!(message.contains(field), "{message}"),
            other => panic!("expected validation error for {field}, got {other:?}"),
        }
    }
}

#[test]
fn test_empty_stage_command_fails_validation() {
    let temp_file = write_config(
        r#"
[stages.segmentation]
command = "  "

[stages.features]
command = "extract"

[stages.reports]
command = "report"
"#,
    );

    let err = assert_err!(PipelineConfig::load_from_file(temp_file.path()));
    assert!(err.to_string().contains("stages.segmentation.command"));
}

#[test]
fn test_port_override() {
    let mut config = assert_ok!(PipelineConfig::from_toml_str(STAGES));

    assert_ok!(config.apply_overrides(|name| (name == "PORT").then(|| "9100".to_string())));
    assert_eq!(config.server.port, 9100);
    assert_eq!(assert_ok!(config.socket_addr()).port(), 9100);

    let err = assert_err!(config.apply_overrides(|_| Some("not-a-port".to_string())));
    assert!(matches!(err, ConfigError::InvalidOverride { .. }));
}

#[test]
fn test_ensure_directories_creates_storage_tree() {
    let root = tempfile::tempdir().unwrap();
    let mut config = assert_ok!(PipelineConfig::from_toml_str(STAGES));
    config.storage.upload_dir = root.path().join("in");
    config.storage.output_dir = root.path().join("out");
    config.storage.reports_dir = root.path().join("out/reports");

    assert_ok!(config.ensure_directories());

    assert!(root.path().join("in").is_dir());
    assert!(root.path().join("out/reports").is_dir());
}
