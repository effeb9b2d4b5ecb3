use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn hearth_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_hearth"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let docs = root.join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(
        docs.join("heating.md"),
        "# Heating\n\nThe boiler runs from six until nine every morning.\n\n## Holidays\n\nSet the away mode before leaving for more than a day.",
    )
    .unwrap();
    fs::write(
        docs.join("security.md"),
        "# Security\n\nThe alarm arms itself at midnight when every door is locked.",
    )
    .unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config = format!(
        r#"[knowledge]
base_dir = "{root}"
paths = ["docs"]
chunk_size = 300
chunk_overlap = 40
index_path = "{root}/data/knowledge.sqlite"

[embedding]
provider = "hash"
dims = 256

[cache]
db_path = "{root}/data/cache.sqlite"

[pipeline]
default_profile = "hybrid"
"#,
        root = root.display()
    );
    let config_path = config_dir.join("hearth.toml");
    fs::write(&config_path, config).unwrap();

    (tmp, config_path)
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(hearth_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run hearth")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_init_creates_databases() {
    let (tmp, config) = setup_test_env();
    let output = run(&config, &["init"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(tmp.path().join("data/knowledge.sqlite").exists());
    assert!(tmp.path().join("data/cache.sqlite").exists());

    // idempotent
    assert!(run(&config, &["init"]).status.success());
}

#[test]
fn test_reindex_then_search() {
    let (_tmp, config) = setup_test_env();

    let output = run(&config, &["reindex"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let result: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(result["ok"], true);
    assert_eq!(result["documents_loaded"], 2);

    let output = run(&config, &["search", "boiler morning", "--k", "1"]);
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("heating.md"), "{out}");
    assert!(out.starts_with("1. "));
    assert!(!out.contains("2. "));

    let output = run(&config, &["status"]);
    let out = stdout(&output);
    assert!(out.contains("initialized:     true"), "{out}");
    assert!(out.contains("hash-256"));
}

#[test]
fn test_reindex_without_documents_fails() {
    let (tmp, config) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("docs")).unwrap();
    let output = run(&config, &["reindex"]);
    assert!(!output.status.success());
    assert!(stdout(&output).contains("no documents found"));
}

#[test]
fn test_profiles_marks_default() {
    let (_tmp, config) = setup_test_env();
    let output = run(&config, &["profiles"]);
    assert!(output.status.success());
    let out = stdout(&output);
    let hybrid = out.lines().find(|l| l.contains("hybrid")).unwrap();
    assert!(hybrid.starts_with('*'));
    let local = out.lines().find(|l| l.contains("local ")).unwrap();
    assert!(local.starts_with(' '));
}

#[test]
fn test_cache_commands() {
    let (_tmp, config) = setup_test_env();
    let output = run(&config, &["cache", "stats"]);
    assert!(output.status.success());
    let stats: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(stats["total_entries"], 0);

    let output = run(&config, &["cache", "cleanup"]);
    assert!(stdout(&output).contains("Removed 0 expired entries."));
    let output = run(&config, &["cache", "clear"]);
    assert!(stdout(&output).contains("Removed 0 entries."));
}

#[test]
fn test_missing_config_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let output = run(&tmp.path().join("absent.toml"), &["status"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read config file"));
}
