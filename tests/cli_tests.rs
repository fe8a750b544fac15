// CLI integration tests
// These test the actual command-line interface using the compiled binary

use std::process::Command;

use tempfile::TempDir;

const CLI_BINARY: &str = env!("CARGO_BIN_EXE_homeconnect");

fn cli(home: &TempDir) -> Command {
    let mut command = Command::new(CLI_BINARY);
    command
        .env("HOME", home.path())
        .env_remove("HC_CLIENT_ID")
        .env_remove("HC_BASE_URL")
        .env_remove("HC_REDIRECT_URL")
        .env_remove("HC_SCOPE");
    command
}

#[test]
fn test_cli_help_command() {
    let output = Command::new(CLI_BINARY)
        .arg("--help")
        .output()
        .expect("Failed to execute CLI");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("A CLI for talking to Home Connect appliances"));
    assert!(stdout.contains("login"));
    assert!(stdout.contains("logout"));
    assert!(stdout.contains("appliances"));
    assert!(stdout.contains("watch"));
}

#[test]
fn test_cli_version_command() {
    let output = Command::new(CLI_BINARY)
        .arg("--version")
        .output()
        .expect("Failed to execute CLI");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("homeconnect"));
}

#[test]
fn test_cli_invalid_command() {
    let output = Command::new(CLI_BINARY)
        .arg("invalid-command")
        .output()
        .expect("Failed to execute CLI");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error:") || stderr.contains("unrecognized"));
}

#[test]
fn test_cli_appliances_without_client_id() {
    let home = TempDir::new().unwrap();
    let output = cli(&home)
        .arg("appliances")
        .output()
        .expect("Failed to execute CLI");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Client id is required"));
}

#[test]
fn test_cli_appliances_without_login() {
    let home = TempDir::new().unwrap();
    let output = cli(&home)
        .args(["--client-id", "client123", "appliances"])
        .output()
        .expect("Failed to execute CLI");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Not logged in"));
}

#[test]
fn test_cli_rejects_unknown_scope() {
    let home = TempDir::new().unwrap();
    let output = cli(&home)
        .args(["--client-id", "client123", "--scope", "Monitor Bogus", "auth-url"])
        .output()
        .expect("Failed to execute CLI");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Bogus"));
}

#[test]
fn test_cli_auth_url() {
    let home = TempDir::new().unwrap();
    let output = cli(&home)
        .args([
            "--client-id",
            "client123",
            "--base-url",
            "https://simulator.home-connect.com",
            "auth-url",
        ])
        .output()
        .expect("Failed to execute CLI");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("https://simulator.home-connect.com/security/oauth/authorize?"));
    assert!(stdout.contains("client_id=client123"));
    assert!(stdout.contains("response_type=code"));
}

#[test]
fn test_cli_logout_without_config() {
    let home = TempDir::new().unwrap();
    let output = cli(&home)
        .arg("logout")
        .output()
        .expect("Failed to execute CLI");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Logged out."));
}
