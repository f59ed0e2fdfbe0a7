//! Black-box tests of the `mstore` binary for commands that need no database.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn mstore_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("mstore");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let docs = root.join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(
        docs.join("guide.md"),
        "# Guide\n\nShort intro.\n\n## Install\n\nRun the installer.\n\n## Usage\n\nCall the binary.",
    )
    .unwrap();

    let config_content = format!(
        r#"[docs]
root = "{}/docs"

[chunking]
max_chars = 200
overlap_lines = 1

[embedding]
provider = "disabled"
"#,
        root.display()
    );
    let config_path = root.join("mstore.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mstore(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = mstore_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("REMOTE_EMAIL")
        .env_remove("REMOTE_PASSWORD")
        .env_remove("DATABASE_URL")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mstore binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_help_lists_commands() {
    let output = Command::new(mstore_binary()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["process", "watch", "search", "serve", "health", "stats", "chunk", "fetch"] {
        assert!(stdout.contains(cmd), "help is missing {}: {}", cmd, stdout);
    }
}

#[test]
fn test_chunk_prints_json_chunks() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("docs/guide.md");

    let (stdout, stderr, success) = run_mstore(&config, &["chunk", file.to_str().unwrap()]);
    assert!(success, "chunk failed: {}", stderr);

    let chunks: Vec<Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0]["chunk_index"], 0);
    assert_eq!(chunks[1]["metadata"]["header"], "Install");
    assert_eq!(chunks[1]["metadata"]["header_level"], 2);
    assert_eq!(chunks[2]["metadata"]["total_chunks"], 3);
    assert_eq!(chunks[2]["metadata"]["chunk_type"], "complete_section");
}

#[test]
fn test_chunk_missing_file_fails() {
    let (tmp, config) = setup_test_env();
    let missing = tmp.path().join("docs/nope.md");

    let (_, stderr, success) = run_mstore(&config, &["chunk", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to read"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_file_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_mstore(&tmp.path().join("absent.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("bad.toml");
    fs::write(&config, "[chunking]\nmax_chars = 0\n").unwrap();

    let (_, stderr, success) = run_mstore(&config, &["chunk", "whatever.md"]);
    assert!(!success);
    assert!(stderr.contains("max_chars"), "stderr: {}", stderr);
}

#[test]
fn test_fetch_requires_credentials() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_mstore(&config, &["fetch"]);
    assert!(!success);
    assert!(stderr.contains("remote credentials missing"), "stderr: {}", stderr);
}

#[test]
fn test_stats_requires_database_url() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_mstore(&config, &["stats"]);
    assert!(!success);
    assert!(stderr.to_lowercase().contains("database"), "stderr: {}", stderr);
}
