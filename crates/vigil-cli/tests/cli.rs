//! End-to-end tests driving the `vigil` binary.
//!
//! Each test runs against its own temp directory and config file, so
//! nothing here touches the real data directory.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;
use uuid::Uuid;
use vigil_core::{CanonicalName, UsageRecord, local_date_of};
use vigil_db::Store;

fn vigil_binary() -> String {
    env!("CARGO_BIN_EXE_vigil").to_string()
}

/// Writes a config file pointing at a database inside `temp`.
fn write_config(temp: &Path) -> (PathBuf, PathBuf) {
    let db_path = temp.join("vigil.db");
    let config_path = temp.join("config.toml");
    std::fs::write(
        &config_path,
        format!(r#"database_path = "{}""#, db_path.display()),
    )
    .unwrap();
    (config_path, db_path)
}

fn vigil(temp: &Path, config: &Path) -> Command {
    let mut command = Command::new(vigil_binary());
    // An isolated HOME keeps the user's real config.toml out of the
    // figment chain.
    command
        .env("HOME", temp)
        .env("XDG_CONFIG_HOME", temp.join(".config"))
        .arg("--config")
        .arg(config);
    command
}

/// A finalized hour-long Chrome session on 2026-03-10.
fn chrome_session() -> UsageRecord {
    let started = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
    UsageRecord::from_stored(
        Uuid::new_v4(),
        CanonicalName::new("Chrome").unwrap(),
        "chrome".to_string(),
        "New Tab".to_string(),
        None,
        local_date_of(started),
        started,
        Some(started + Duration::hours(1)),
        3_600_000,
        started + Duration::hours(1),
        true,
    )
}

fn seed(db_path: &Path, records: &[UsageRecord]) {
    let store = Store::open(db_path).unwrap();
    for record in records {
        store.insert_record(record, Duration::hours(6)).unwrap();
    }
}

#[test]
fn report_on_empty_store_prints_hint() {
    let temp = TempDir::new().unwrap();
    let (config, _db) = write_config(temp.path());

    let output = vigil(temp.path(), &config)
        .arg("report")
        .arg("--date")
        .arg("2026-03-10")
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "report should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("No usage recorded for this period."));
    assert!(stdout.contains("vigil track"));
}

#[test]
fn report_shows_seeded_sessions() {
    let temp = TempDir::new().unwrap();
    let (config, db_path) = write_config(temp.path());
    seed(&db_path, &[chrome_session()]);

    let output = vigil(temp.path(), &config)
        .arg("report")
        .arg("--date")
        .arg("2026-03-10")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("USAGE REPORT: Tuesday, Mar 10, 2026"));
    assert!(stdout.contains("Chrome"));
    assert!(stdout.contains("1h 0m"));
    assert!(stdout.contains("Total tracked: 1h 0m across 1 application"));
}

#[test]
fn report_json_is_machine_readable() {
    let temp = TempDir::new().unwrap();
    let (config, db_path) = write_config(temp.path());
    seed(&db_path, &[chrome_session()]);

    let output = vigil(temp.path(), &config)
        .arg("report")
        .arg("--date")
        .arg("2026-03-10")
        .arg("--json")
        .output()
        .unwrap();

    assert!(output.status.success());
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("report --json should emit valid JSON");
    assert_eq!(report["range"]["from"], "2026-03-10");
    assert_eq!(report["range"]["days"], 1);
    assert_eq!(report["total_ms"], 3_600_000);
    let apps = report["apps"].as_array().unwrap();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0]["name"], "Chrome");
    assert_eq!(apps[0]["live"], false);
}

#[test]
fn report_rejects_reversed_range() {
    let temp = TempDir::new().unwrap();
    let (config, _db) = write_config(temp.path());

    let output = vigil(temp.path(), &config)
        .arg("report")
        .arg("--from")
        .arg("2026-03-10")
        .arg("--to")
        .arg("2026-03-01")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--from must not be after --to"), "{stderr}");
}

#[test]
fn corrupted_database_is_quarantined_not_fatal() {
    let temp = TempDir::new().unwrap();
    let (config, db_path) = write_config(temp.path());
    std::fs::write(&db_path, b"definitely not a sqlite database").unwrap();

    let output = vigil(temp.path(), &config)
        .arg("report")
        .arg("--date")
        .arg("2026-03-10")
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "report should survive a damaged database: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("No usage recorded for this period."));

    let quarantined = std::fs::read_dir(temp.path())
        .unwrap()
        .filter_map(Result::ok)
        .any(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with("vigil.db.corrupt-")
        });
    assert!(quarantined, "damaged file should be renamed aside");
}

#[test]
fn status_reports_stored_sessions() {
    let temp = TempDir::new().unwrap();
    let (config, db_path) = write_config(temp.path());
    seed(&db_path, &[chrome_session()]);

    let output = vigil(temp.path(), &config).arg("status").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Backend: file"));
    assert!(stdout.contains("Stored sessions: 1"));
}

#[test]
fn prune_removes_old_sessions() {
    let temp = TempDir::new().unwrap();
    let (config, db_path) = write_config(temp.path());

    let mut old = chrome_session();
    let started = Utc::now() - Duration::days(200);
    old = UsageRecord::from_stored(
        old.id,
        old.name.clone(),
        old.process_name.clone(),
        old.window_title.clone(),
        None,
        local_date_of(started),
        started,
        Some(started + Duration::hours(1)),
        3_600_000,
        started + Duration::hours(1),
        true,
    );
    seed(&db_path, &[old]);

    let output = vigil(temp.path(), &config)
        .arg("prune")
        .arg("--older-than")
        .arg("90")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Deleted 1 session older than 90 days."));

    let store = Store::open(&db_path).unwrap();
    assert_eq!(store.session_count().unwrap(), 0);
}

#[test]
fn resolve_prints_canonical_name() {
    let temp = TempDir::new().unwrap();
    let (config, _db) = write_config(temp.path());

    let output = vigil(temp.path(), &config)
        .arg("resolve")
        .arg("chrome.exe")
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "Chrome\n");
}

#[test]
fn environment_overrides_config_file() {
    let temp = TempDir::new().unwrap();
    let (config, _db) = write_config(temp.path());
    let env_db = temp.path().join("override.db");
    seed(&env_db, &[chrome_session()]);

    let output = vigil(temp.path(), &config)
        .env("VIGIL_DATABASE_PATH", &env_db)
        .arg("status")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&format!("Database: {}", env_db.display())));
    assert!(stdout.contains("Stored sessions: 1"));
}

#[test]
fn help_is_printed_without_a_subcommand() {
    let temp = TempDir::new().unwrap();
    let (config, _db) = write_config(temp.path());

    let output = vigil(temp.path(), &config).output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("track"));
    assert!(stdout.contains("report"));
}
