use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn taxo_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_taxo"))
}

/// Temp dir with a config (SQLite checkpoints, disabled provider) and a
/// 10-file × 30-test input.
fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[provider]
kind = "disabled"

[chunking]
max_tests = 250

[reliability]
max_attempts = 1

[checkpoint]
backend = "sqlite"
path = "{}/data/taxo.sqlite"
"#,
        root.display()
    );
    let config_path = config_dir.join("taxo.toml");
    fs::write(&config_path, config_content).unwrap();

    let files: Vec<serde_json::Value> = (0..10)
        .map(|f| {
            let tests: Vec<serde_json::Value> = (0..30)
                .map(|t| {
                    serde_json::json!({
                        "index": f * 30 + t,
                        "name": format!("handles case {}", t),
                        "suitePath": format!("Module{}", f),
                    })
                })
                .collect();
            serde_json::json!({ "path": format!("src/module{}/service_test.go", f), "tests": tests })
        })
        .collect();
    let input_path = root.join("tests.json");
    fs::write(&input_path, serde_json::to_string(&files).unwrap()).unwrap();

    (tmp, config_path, input_path)
}

fn run_taxo(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = taxo_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run taxo binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path, _) = setup_test_env();

    let (stdout, stderr, success) = run_taxo(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Checkpoint store initialized"));
    assert!(tmp.path().join("data").join("taxo.sqlite").exists());

    // Idempotent
    let (_, stderr, success) = run_taxo(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_plan_reports_chunks() {
    let (_tmp, config_path, input_path) = setup_test_env();

    let (stdout, stderr, success) =
        run_taxo(&config_path, &["plan", input_path.to_str().unwrap()]);
    assert!(success, "plan failed: {}", stderr);

    let plan: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(plan["files"], 10);
    assert_eq!(plan["tests"], 300);
    assert_eq!(plan["chunks"], 2);
    assert_eq!(plan["largest_chunk_tests"], 240);
    assert_eq!(plan["oversized_chunks"], 0);
}

#[test]
fn test_classify_with_disabled_provider_fails_cleanly() {
    let (_tmp, config_path, input_path) = setup_test_env();

    let (stdout, stderr, success) = run_taxo(
        &config_path,
        &[
            "--progress",
            "off",
            "classify",
            input_path.to_str().unwrap(),
            "--language",
            "go",
        ],
    );
    assert!(!success);
    assert!(stdout.is_empty(), "nothing on stdout on failure: {}", stdout);
    assert!(stderr.contains("classification failed at chunk 0 of 2"), "{}", stderr);
    assert!(stderr.contains("hint: check provider configuration"), "{}", stderr);
}

#[test]
fn test_classify_rejects_empty_input() {
    let (tmp, config_path, _) = setup_test_env();
    let empty = tmp.path().join("empty.json");
    fs::write(&empty, "[]").unwrap();

    let (_, stderr, success) = run_taxo(
        &config_path,
        &["classify", empty.to_str().unwrap(), "--language", "go"],
    );
    assert!(!success);
    assert!(stderr.contains("no tests to classify"), "{}", stderr);
}

#[test]
fn test_unknown_progress_mode() {
    let (_tmp, config_path, input_path) = setup_test_env();

    let (_, stderr, success) = run_taxo(
        &config_path,
        &[
            "--progress",
            "loud",
            "classify",
            input_path.to_str().unwrap(),
            "--language",
            "go",
        ],
    );
    assert!(!success);
    assert!(stderr.contains("unknown progress mode"), "{}", stderr);
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _, input_path) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[chunking]\nmax_tests = 0\n").unwrap();

    let (_, stderr, success) = run_taxo(&bad, &["plan", input_path.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("max_tests"), "{}", stderr);
}
