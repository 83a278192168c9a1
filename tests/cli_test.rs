use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

mod common;

const LOCATIONS: &str = "tests/fixtures/locations.csv";

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("investment-engine"));
    cmd.arg("tests/fixtures/commands.csv")
        .arg("--locations")
        .arg(LOCATIONS);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "location,total_invested,total_investors,investment_limit,remaining",
        ))
        // One completed 500, the failed 300 released, the over-cap request rejected
        .stdout(predicate::str::contains("1,500,1,1000,500"))
        // Closed location never admits anything
        .stdout(predicate::str::contains("2,0,0,500,500"))
        // Confirmed then refunded
        .stdout(predicate::str::contains("3,0,0,300,300"));

    Ok(())
}

#[test]
fn test_sweep_expires_unconfirmed_investments() {
    let commands = common::csv_file(&[
        "op, user, location, amount, payment_id, event_id",
        "invest, 1, 1, 400, ,",
        "invest, 2, 1, 100, ,",
        "succeeded, , , , pi_2, evt_1",
        "sweep, , , , ,",
    ]);

    let mut cmd = Command::new(cargo_bin!("investment-engine"));
    cmd.arg(commands.path())
        .arg("--locations")
        .arg(LOCATIONS)
        .arg("--confirmation-timeout-secs")
        .arg("0");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("1,100,1,1000,900"));
}

#[test]
fn test_webhook_secret_from_environment() {
    let commands = common::csv_file(&[
        "op, user, location, amount, payment_id, event_id",
        "invest, 1, 3, 120.50, ,",
        "succeeded, , , , pi_1,",
    ]);

    let mut cmd = Command::new(cargo_bin!("investment-engine"));
    cmd.env("PAYMENT_WEBHOOK_SECRET", "whsec_from_env")
        .arg(commands.path())
        .arg("--locations")
        .arg(LOCATIONS);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("3,120.5,1,300,179.5"));
}

#[test]
fn test_bad_rows_are_reported_and_skipped() {
    let commands = common::csv_file(&[
        "op, user, location, amount, payment_id, event_id",
        "withdraw, 1, 1, 10, ,",
        "invest, 1, 1, 5, ,",
        "invest, 1, 1, 10.001, ,",
        "succeeded, , , , pi_99, evt_1",
        "invest, 1, 1, 25, ,",
    ]);

    let mut cmd = Command::new(cargo_bin!("investment-engine"));
    cmd.env("RUST_LOG", "warn")
        .arg(commands.path())
        .arg("--locations")
        .arg(LOCATIONS);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("unreadable operation"))
        .stderr(predicate::str::contains("operation failed"))
        .stdout(predicate::str::contains("1,25,0,1000,975"));
}

#[test]
fn test_missing_locations_file_fails() {
    let mut cmd = Command::new(cargo_bin!("investment-engine"));
    cmd.arg("tests/fixtures/commands.csv")
        .arg("--locations")
        .arg("tests/fixtures/does_not_exist.csv");

    cmd.assert().failure();
}
