//! CLI smoke tests for the heliograph binary

use assert_cmd::Command;

#[test]
fn test_help_runs() {
    let mut cmd = Command::cargo_bin("heliograph").unwrap();
    cmd.arg("--help").assert().success();
}

#[test]
fn test_rejects_invalid_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");
    // Missing app_key/server_url must fail validation before any network use.
    std::fs::write(&config_path, "[client]\n").unwrap();

    let mut cmd = Command::cargo_bin("heliograph").unwrap();
    cmd.arg("--config").arg(&config_path).assert().failure();
}
