//! Integration tests for the gsave binary.

use assert_cmd::Command;
use serde_json::Value;

fn gsave(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("gsave").unwrap();
    cmd.env("HOME", home)
        .env_remove("GRAPHSAVER_CONFIG")
        .env_remove("GRAPHSAVER_MAX_ROWS")
        .env_remove("RUST_LOG");
    cmd
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd.output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
}

fn row_count(output: &Value, table: &str) -> i64 {
    output["tables"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["table"] == table)
        .and_then(|t| t["rows"].as_i64())
        .unwrap()
}

#[test]
fn test_version_json() {
    let home = tempfile::tempdir().unwrap();
    let out = json_stdout(gsave(home.path()).args(["version", "--json"]));
    assert_eq!(out["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(out["default_max_rows"], 128);
    assert!(out["sqlite"].as_str().unwrap().starts_with('3'));
}

#[test]
fn test_explain_single_type() {
    let home = tempfile::tempdir().unwrap();
    let out = json_stdout(gsave(home.path()).args(["explain", "--type", "Album", "--rows", "2", "--json"]));

    let tables = out.as_array().unwrap();
    assert_eq!(tables.len(), 1);
    let album = &tables[0];
    assert_eq!(album["table"], "albums");
    assert_eq!(album["type_id"], 4);
    assert!(album["insert"].as_str().unwrap().contains(":title_1"));
    assert!(album["update"].as_str().unwrap().contains("FROM (VALUES"));
    assert_eq!(album["collections"][0]["field"], "songs");
}

#[test]
fn test_explain_unknown_type_fails() {
    let home = tempfile::tempdir().unwrap();
    let output = gsave(home.path())
        .args(["explain", "--type", "Podcast", "--json"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(3));
    let err: Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(err["error"]["code"], "TYPE_NOT_REGISTERED");
}

#[test]
fn test_explain_rejects_zero_rows() {
    let home = tempfile::tempdir().unwrap();
    gsave(home.path())
        .args(["explain", "--rows", "0", "--json"])
        .assert()
        .code(7);
}

#[test]
fn test_demo_commits_to_file() {
    let home = tempfile::tempdir().unwrap();
    let db = home.path().join("demo.db");
    let out = json_stdout(
        gsave(home.path())
            .args(["demo", "--json", "--db"])
            .arg(&db),
    );

    assert_eq!(out["dry_run"], false);
    assert_eq!(row_count(&out, "albums"), 1);
    assert_eq!(row_count(&out, "album_songs"), 4);
    assert!(out.get("sql").is_none());
    assert!(db.exists());

    let artist = out["entities"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["name"] == "artist")
        .unwrap();
    assert_eq!(artist["version"], 2);
}

#[test]
fn test_demo_dry_run_rolls_back() {
    let home = tempfile::tempdir().unwrap();
    let out = json_stdout(gsave(home.path()).args(["demo", "--dry-run", "--json"]));

    assert_eq!(out["dry_run"], true);
    assert_eq!(row_count(&out, "albums"), 0);
    let sql = out["sql"].as_array().unwrap();
    assert_eq!(sql.len() as u64, out["statements"].as_u64().unwrap());
    assert!(sql.iter().any(|s| s.as_str().unwrap().starts_with("UPDATE \"artists\"")));
}

#[test]
fn test_demo_respects_config_file() {
    let home = tempfile::tempdir().unwrap();
    let config = home.path().join("settings.json");
    std::fs::write(&config, r#"{ "max_rows_per_statement": 1 }"#).unwrap();

    let out = json_stdout(
        gsave(home.path())
            .args(["demo", "--dry-run", "--json", "--config"])
            .arg(&config),
    );
    assert_eq!(out["max_rows_per_statement"], 1);
}
