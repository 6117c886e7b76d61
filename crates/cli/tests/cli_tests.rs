// End-to-end tests for the `cmap` binary.
//
// Every test gets its own store in a temp dir; `run` and `refresh` use
// --offline so nothing leaves the machine unless a mock registry is set up.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use httpmock::prelude::*;
use tempfile::TempDir;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn cmap(db: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_cmap"));
    cmd.arg("--db").arg(db);
    cmd.env_remove("CMAP_CONFIG");
    cmd.env_remove("RUST_LOG");
    cmd
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim())
        .unwrap_or_else(|e| panic!("stdout must be one JSON value: {e}\nstdout:\n{stdout}"))
}

fn ingest_fixtures(db: &Path) {
    let output = cmap(db)
        .arg("ingest")
        .arg("--circuits")
        .arg(fixtures_dir().join("circuits.json"))
        .arg("--telemetry")
        .arg(fixtures_dir().join("telemetry.json"))
        .output()
        .expect("cmap ingest");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("circuits: 8 loaded, 0 skipped"), "{stdout}");
    assert!(stdout.contains("telemetry: 7 loaded, 0 skipped"), "{stdout}");
}

// ===========================================================================
// ingest / run / refresh
// ===========================================================================

#[test]
fn ingest_then_offline_run() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("circuitmap.db");
    ingest_fixtures(&db);

    let output = cmap(&db).args(["run", "--offline", "--json"]).output().expect("cmap run");
    assert_eq!(output.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report = stdout_json(&output);
    assert_eq!(report["cancelled"], false);
    assert_eq!(report["summary"]["total_sites"], 6);
    assert_eq!(report["summary"]["succeeded"], 6);
    assert_eq!(report["summary"]["failed"], 0);
    assert_eq!(report["summary"]["excluded"], 3);

    let sites = report["sites"].as_array().unwrap();
    let cal = sites.iter().find(|s| s["site"] == "CAL 12").unwrap();
    assert_eq!(cal["state"], "done");
    assert_eq!(cal["exclusion"], "no_device");
}

#[test]
fn refresh_reports_flipped_uplinks() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("circuitmap.db");
    ingest_fixtures(&db);

    let output = cmap(&db).args(["refresh", "AZP 41", "--offline", "--json"]).output().expect("cmap refresh");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report = stdout_json(&output);
    let wan1 = report["assignments"]
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["interface"] == "wan1")
        .unwrap();
    assert_eq!(wan1["circuit_id"], "DSR-2002");
    assert_eq!(wan1["flipped"], true);
}

#[test]
fn human_run_output_lists_sites() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("circuitmap.db");
    ingest_fixtures(&db);

    let output = cmap(&db).args(["run", "--offline"]).output().expect("cmap run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ALB 03"), "{stdout}");
    assert!(stdout.contains("DSR-1001"), "{stdout}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("6 sites: 6 succeeded"), "{stderr}");
}

// ===========================================================================
// confirm / audit
// ===========================================================================

#[test]
fn confirm_freezes_value_and_audits() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("circuitmap.db");
    ingest_fixtures(&db);

    assert!(cmap(&db).args(["refresh", "NMA 02", "--offline"]).status().unwrap().success());
    let confirmed = cmap(&db)
        .args(["confirm", "NMA 02", "wan2", "--provider", "Verizon Wireless"])
        .status()
        .unwrap();
    assert!(confirmed.success());
    assert!(cmap(&db).args(["refresh", "NMA 02", "--offline"]).status().unwrap().success());

    let output = cmap(&db).args(["audit", "--site", "NMA 02", "--json"]).output().unwrap();
    assert!(output.status.success());
    let audits = stdout_json(&output);
    let audits = audits.as_array().unwrap();
    assert!(audits.iter().any(|a| a["reason"] == "manual_override" && a["circuit_id"] == "MAN-4002"));
    assert!(audits.iter().any(|a| a["reason"] == "confirmed" && a["old_value"] == "Verizon Wireless"));
}

#[test]
fn confirm_unknown_assignment_is_usage_error() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("circuitmap.db");
    let output = cmap(&db).args(["confirm", "ZZZ 99", "wan1"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no assignment for ZZZ 99 wan1"));
}

#[test]
fn confirm_rejects_bad_interface() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("circuitmap.db");
    let output = cmap(&db).args(["confirm", "ALB 03", "wan3"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ===========================================================================
// validate / ingest errors
// ===========================================================================

#[test]
fn validate_exit_codes() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("circuitmap.db");

    let good = dir.path().join("good.toml");
    std::fs::write(&good, "[matcher]\nstrict_threshold = 85\n").unwrap();
    let output = cmap(&db).arg("validate").arg(&good).output().unwrap();
    assert_eq!(output.status.code(), Some(0));

    let bad = dir.path().join("bad.toml");
    std::fs::write(&bad, "[matcher]\nstrict_threshold = 150\n").unwrap();
    let output = cmap(&db).arg("validate").arg(&bad).output().unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("strict_threshold"));

    let output = cmap(&db).arg("validate").arg(dir.path().join("missing.toml")).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn reingest_reports_protected_circuits() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("circuitmap.db");
    ingest_fixtures(&db);

    let mut circuits: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(fixtures_dir().join("circuits.json")).unwrap()).unwrap();
    for c in circuits.as_array_mut().unwrap() {
        c["carrier"] = "Importer Value".into();
        c["manual_override"] = false.into();
    }
    let feed = dir.path().join("circuits.json");
    std::fs::write(&feed, circuits.to_string()).unwrap();

    let output = cmap(&db).arg("ingest").arg("--circuits").arg(&feed).arg("--json").output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let summary = stdout_json(&output);
    assert_eq!(summary["circuits"]["loaded"], 7);
    assert_eq!(summary["circuits"]["protected"], 1);
    assert!(summary["telemetry"].is_null());
}

#[test]
fn ingest_requires_a_feed() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("circuitmap.db");
    let output = cmap(&db).arg("ingest").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn ingest_rejects_non_array_feed() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("circuitmap.db");
    let feed = dir.path().join("circuits.json");
    std::fs::write(&feed, r#"{"circuits": []}"#).unwrap();
    let output = cmap(&db).arg("ingest").arg("--circuits").arg(&feed).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ===========================================================================
// resolve
// ===========================================================================

#[test]
fn resolve_uses_registry_then_store_cache() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/ip/96.81.183.205");
        then.status(200).json_body(serde_json::json!({
            "name": "COMCAST-16",
            "entities": [{
                "vcardArray": ["vcard", [
                    ["fn", {}, "text", "Comcast Cable Communications, LLC"],
                    ["kind", {}, "text", "org"]
                ]]
            }]
        }));
    });

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("circuitmap.db");
    let config = dir.path().join("cmap.toml");
    std::fs::write(
        &config,
        format!("[registry]\nbase_url = \"{}\"\nbackoff_base_ms = 1\nthrottle_ms = 0\n", server.base_url()),
    )
    .unwrap();

    let resolve = || {
        cmap(&db)
            .arg("--config")
            .arg(&config)
            .args(["resolve", "96.81.183.205"])
            .output()
            .unwrap()
    };

    let first = resolve();
    assert!(first.status.success(), "stderr: {}", String::from_utf8_lossy(&first.stderr));
    let result = stdout_json(&first);
    assert_eq!(result["source"], "live");
    assert_eq!(result["organization"], "Comcast Cable Communications, LLC");

    let second = stdout_json(&resolve());
    assert_eq!(second["source"], "cache");
    mock.assert_calls(1);
}

#[test]
fn resolve_private_address_offline() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("circuitmap.db");
    let output = cmap(&db).args(["resolve", "192.168.0.151", "--offline"]).output().unwrap();
    assert!(output.status.success());
    let result = stdout_json(&output);
    assert_eq!(result["source"], "none");
    assert_eq!(result["organization"], serde_json::Value::Null);
}
