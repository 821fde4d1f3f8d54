// End-to-end tests for the misrecon binary.
// Run with: cargo test -p misrecon-cli --test cli_tests

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn misrecon() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_misrecon"));
    cmd.current_dir(env!("CARGO_MANIFEST_DIR"));
    cmd
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../recon/tests/fixtures").join(name)
}

fn code(out: &Output) -> i32 {
    out.status.code().expect("process terminated by signal")
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

/// Assert stdout is a single, parseable JSON value.
fn stdout_json(out: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&out.stdout);
    serde_json::from_str(stdout.trim())
        .unwrap_or_else(|e| panic!("stdout is not JSON ({e}):\n{stdout}"))
}

fn run_args(mis: &[PathBuf]) -> Command {
    let mut cmd = misrecon();
    cmd.arg("run")
        .arg("-c")
        .arg(fixture("motor.recon.toml"))
        .arg("--internal")
        .arg(fixture("internal.csv"))
        .arg("--offline")
        .arg(fixture("offline.csv"));
    for m in mis {
        cmd.arg("--mis").arg(m);
    }
    cmd
}

// -------------------------------------------------------------------------
// validate / profiles
// -------------------------------------------------------------------------

#[test]
fn validate_accepts_fixture_config() {
    let out = misrecon().arg("validate").arg(fixture("motor.recon.toml")).output().unwrap();
    assert_eq!(code(&out), 0, "{}", stderr(&out));
    let err = stderr(&out);
    assert!(err.contains("valid: 'Motor MIS fixture' with 2 insurer profile(s)"), "{err}");
}

#[test]
fn validate_accepts_shipped_profiles() {
    let shipped = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../profiles/motor.recon.toml");
    let out = misrecon().arg("validate").arg(&shipped).output().unwrap();
    assert_eq!(code(&out), 0, "{}", stderr(&out));

    let out = misrecon()
        .args(["profiles", "--resolve", "kotak_may_2025.xlsx"])
        .arg(&shipped)
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "KOTAK");
}

#[test]
fn validate_rejects_config_without_insurers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.recon.toml");
    std::fs::write(
        &path,
        "name = \"bad\"\n[internal.columns]\npolicy_number = \"Policy Number\"\n",
    )
    .unwrap();

    let out = misrecon().arg("validate").arg(&path).output().unwrap();
    assert_eq!(code(&out), 61);
    assert!(stderr(&out).starts_with("error: config validation error"), "{}", stderr(&out));
}

#[test]
fn validate_missing_file_is_runtime_error() {
    let out = misrecon().arg("validate").arg("no/such/config.toml").output().unwrap();
    assert_eq!(code(&out), 62);
}

#[test]
fn profiles_lists_and_resolves() {
    let out = misrecon().arg("profiles").arg(fixture("motor.recon.toml")).output().unwrap();
    assert_eq!(code(&out), 0);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.lines().any(|l| l.starts_with("RELIANCE")), "{stdout}");
    assert!(stdout.lines().any(|l| l.starts_with("UNITED")), "{stdout}");

    let out = misrecon()
        .args(["profiles", "--resolve", "United India Insurance Co. Ltd"])
        .arg(fixture("motor.recon.toml"))
        .output()
        .unwrap();
    assert_eq!(code(&out), 0);
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "UNITED");

    let out = misrecon()
        .args(["profiles", "--json"])
        .arg(fixture("motor.recon.toml"))
        .output()
        .unwrap();
    let json = stdout_json(&out);
    assert_eq!(json[0]["id"], "RELIANCE");
    assert_eq!(json[0]["filters"], 3);
}

#[test]
fn profiles_unknown_hint_fails_with_hint() {
    let out = misrecon()
        .args(["profiles", "--resolve", "Acme Assurance"])
        .arg(fixture("motor.recon.toml"))
        .output()
        .unwrap();
    assert_eq!(code(&out), 62);
    let err = stderr(&out);
    assert!(err.contains("unknown insurer"), "{err}");
    assert!(err.contains("hint:"), "{err}");
}

// -------------------------------------------------------------------------
// run
// -------------------------------------------------------------------------

#[test]
fn run_reports_discrepancies_as_json() {
    let out = run_args(&[fixture("reliance_mis.csv")]).arg("--json").output().unwrap();
    assert_eq!(code(&out), 60, "{}", stderr(&out));

    let json = stdout_json(&out);
    let run = &json["runs"][0];
    assert_eq!(run["insurer"], "RELIANCE");
    assert_eq!(run["report"]["summary"]["matched"], 3);
    assert_eq!(run["report"]["summary"]["unbooked"], 2);
    assert_eq!(run["insurer_summary"]["pending"]["nop"], 1);
    assert_eq!(json["meta"]["files"], 1);

    let err = stderr(&out);
    assert!(err.contains("RELIANCE ("), "{err}");
    assert!(err.contains("3 matched (1 with mismatches)"), "{err}");
    assert!(err.contains("error: mismatches or unbooked policies found"), "{err}");
}

#[test]
fn run_skipped_file_takes_precedence() {
    let dir = tempfile::tempdir().unwrap();
    let acme = dir.path().join("acme_mis.csv");
    std::fs::copy(fixture("reliance_mis.csv"), &acme).unwrap();

    let out = run_args(&[fixture("reliance_mis.csv"), acme]).output().unwrap();
    assert_eq!(code(&out), 64);
    let err = stderr(&out);
    assert!(err.contains("skipped"), "{err}");
    assert!(err.contains("1 of 2 MIS file(s) skipped"), "{err}");
}

#[test]
fn run_insurer_flag_overrides_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let mis = dir.path().join("may_dump.csv");
    std::fs::copy(fixture("united_mis.csv"), &mis).unwrap();

    let out = run_args(&[mis]).args(["--insurer", "UIIC", "--json"]).output().unwrap();
    assert_eq!(code(&out), 60, "{}", stderr(&out));
    let json = stdout_json(&out);
    assert_eq!(json["runs"][0]["insurer"], "UNITED");
}

#[test]
fn run_clean_reconciliation_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let internal = dir.path().join("booked.csv");
    let mis = dir.path().join("united_mis.csv");
    std::fs::write(
        &internal,
        "Policy Number,Premium,Insurance Company\nU1,100,UIIC\nU2,250.50,United India Insurance\n",
    )
    .unwrap();
    std::fs::write(&mis, "Policy No,Premium Amount\nU1,100\nU2,\"250.5\"\n").unwrap();
    let output = dir.path().join("out.json");

    let out = misrecon()
        .arg("run")
        .arg("-c")
        .arg(fixture("motor.recon.toml"))
        .arg("--internal")
        .arg(&internal)
        .arg("--mis")
        .arg(&mis)
        .arg("--output")
        .arg(&output)
        .output()
        .unwrap();
    assert_eq!(code(&out), 0, "{}", stderr(&out));
    assert!(out.stdout.is_empty());

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(written["runs"][0]["report"]["summary"]["matched"], 2);
    assert_eq!(written["runs"][0]["insurer_summary"]["booked"]["nop"], 2);
}

#[test]
fn run_unknown_field_is_usage_error() {
    let out = run_args(&[fixture("reliance_mis.csv")])
        .args(["--fields", "premium_amount,engine_number"])
        .output()
        .unwrap();
    assert_eq!(code(&out), 2);
    assert!(stderr(&out).contains("engine_number"));
}

#[test]
fn run_unknown_field_checked_before_reading_inputs() {
    let out = misrecon()
        .arg("run")
        .arg("-c")
        .arg(fixture("motor.recon.toml"))
        .args(["--internal", "no/such/internal.csv", "--mis", "no/such/mis.csv"])
        .args(["--fields", "colour"])
        .output()
        .unwrap();
    assert_eq!(code(&out), 2, "{}", stderr(&out));
    let err = stderr(&out);
    assert!(err.contains("colour"), "{err}");
    assert!(!err.contains("cannot read"), "{err}");
}

#[test]
fn run_rejects_malformed_reference_date() {
    let out = run_args(&[fixture("reliance_mis.csv")])
        .args(["--reference-date", "31/05/2025"])
        .output()
        .unwrap();
    assert_eq!(code(&out), 2);
}

#[test]
fn run_missing_internal_file() {
    let out = misrecon()
        .arg("run")
        .arg("-c")
        .arg(fixture("motor.recon.toml"))
        .args(["--internal", "no/such/internal.csv", "--mis"])
        .arg(fixture("reliance_mis.csv"))
        .output()
        .unwrap();
    assert_eq!(code(&out), 62);
    assert!(stderr(&out).contains("cannot read"));
}

#[test]
fn run_requires_mis() {
    let out = misrecon()
        .arg("run")
        .arg("-c")
        .arg(fixture("motor.recon.toml"))
        .arg("--internal")
        .arg(fixture("internal.csv"))
        .output()
        .unwrap();
    assert_eq!(code(&out), 2);
}
