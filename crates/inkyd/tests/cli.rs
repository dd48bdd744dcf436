// CLI surface smoke tests. The daemon itself needs a broker; these
// only exercise argument parsing and fail-fast startup validation.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_the_configuration_flags() {
    Command::cargo_bin("inkyd")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--device-id"))
        .stdout(predicate::str::contains("--verbose"));
}

#[test]
fn unknown_transport_fails_fast() {
    Command::cargo_bin("inkyd")
        .unwrap()
        .env("INKY_MQTT__TRANSPORT", "carrier-pigeon")
        .env("INKY_DISPLAY__MOCK", "true")
        .assert()
        .failure()
        .stderr(predicate::str::contains("mqtt.transport"));
}

#[test]
fn hardware_mode_without_driver_fails_fast() {
    Command::cargo_bin("inkyd")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("driver"));
}
