//! CLI tests for the camwatch_agent binary.
use assert_cmd::Command;

#[test]
fn help_prints_usage_and_exits_zero() {
    let out = Command::cargo_bin("camwatch_agent")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("--port"));
    assert!(text.contains("CAMWATCH_VAPIX_URL"));
}

#[test]
fn invalid_port_fails_before_binding() {
    Command::cargo_bin("camwatch_agent")
        .unwrap()
        .args(["--port", "not-a-port"])
        .assert()
        .failure();
}

#[test]
fn unknown_flag_fails() {
    Command::cargo_bin("camwatch_agent")
        .unwrap()
        .arg("--enableSSL")
        .assert()
        .failure();
}
