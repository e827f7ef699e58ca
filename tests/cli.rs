use std::fs;
use std::process::{Command, Output};

fn check_option(args: &[&str]) -> Output {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.json");
    fs::write(&config, "{}").unwrap();

    Command::new(env!("CARGO_BIN_EXE_stunnel"))
        .arg("--config")
        .arg(&config)
        .arg("check-option")
        .args(args)
        .env_remove("STUNNEL_LOG")
        .env("NO_COLOR", "1")
        .output()
        .unwrap()
}

#[test]
fn valid_option_exits_zero() {
    let output = check_option(&["8080:80,6006:6006"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("8080 → 80"));
    assert!(stdout.contains("6006 → 6006"));
}

#[test]
fn invalid_format_exits_non_zero() {
    for value in ["8080", "0:80", "8080:80,", "a:b"] {
        let output = check_option(&[value]);
        assert!(!output.status.success(), "'{}' should be rejected", value);
        assert!(String::from_utf8_lossy(&output.stderr).contains("invalid --tunnel value"));
    }
}

#[test]
fn missing_value_exits_non_zero() {
    let output = check_option(&[]);
    assert!(!output.status.success());
}
