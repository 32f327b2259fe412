use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use pks_qa_core::artifact::{encode, IndexArtifact};
use pks_qa_core::index::{FlatIndex, Metric};

fn pks_qa_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("pks-qa");
    path
}

fn run_pks_qa(args: &[&str]) -> (String, String, bool) {
    let binary = pks_qa_binary();
    let output = Command::new(&binary)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pks-qa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn artifact_bytes() -> Vec<u8> {
    let index =
        FlatIndex::from_flat(Metric::InnerProduct, 2, vec![1.0, 0.0, 0.0, 1.0, 0.9, 0.1]).unwrap();
    let chunks = ["Alpha chunk about onboarding.", "Beta chunk.", "Gamma chunk."]
        .into_iter()
        .collect();
    encode(&IndexArtifact::new(index, chunks).unwrap()).unwrap()
}

/// A directory-sourced config whose Ollama endpoint refuses connections.
fn setup_ask_env(with_artifact: bool) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();

    let index_dir = root.join("index");
    fs::create_dir_all(&index_dir).unwrap();
    if with_artifact {
        fs::write(index_dir.join("faiss_index.json"), artifact_bytes()).unwrap();
    }

    let dead_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let config_content = format!(
        r#"[source]
kind = "directory"
folder_id = "{}"

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 2
url = "http://127.0.0.1:{}"
timeout_secs = 2

[retrieval]
top_k = 2
"#,
        index_dir.display(),
        dead_port
    );
    let config_path = root.join("pks-qa.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> String {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn test_inspect_valid_artifact() {
    let tmp = TempDir::new().unwrap();
    let path = write_file(tmp.path(), "index.json", &artifact_bytes());

    let (stdout, stderr, success) = run_pks_qa(&["inspect", &path]);
    assert!(success, "inspect failed: {}", stderr);
    assert!(stdout.contains("metric:   inner_product"));
    assert!(stdout.contains("dims:     2"));
    assert!(stdout.contains("vectors:  3"));
    assert!(stdout.contains("chunks:   3"));
    assert!(stdout.contains("first:    Alpha chunk about onboarding."));
}

#[test]
fn test_inspect_does_not_need_config() {
    let tmp = TempDir::new().unwrap();
    let path = write_file(tmp.path(), "index.json", &artifact_bytes());
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_pks_qa(&[
        "--config",
        missing.to_str().unwrap(),
        "inspect",
        &path,
    ]);
    assert!(success, "inspect failed: {}", stderr);
}

#[test]
fn test_inspect_reports_error_kinds() {
    let tmp = TempDir::new().unwrap();
    let good = artifact_bytes();

    let truncated = write_file(tmp.path(), "truncated.json", &good[..good.len() / 2]);
    let (_, stderr, success) = run_pks_qa(&["inspect", &truncated]);
    assert!(!success);
    assert!(stderr.contains("(truncated)"), "stderr: {}", stderr);

    let foreign = write_file(tmp.path(), "foreign.pkl", b"\x80\x04\x95not json at all");
    let (_, stderr, success) = run_pks_qa(&["inspect", &foreign]);
    assert!(!success);
    assert!(stderr.contains("(format_mismatch)"), "stderr: {}", stderr);

    let mut value: serde_json::Value = serde_json::from_slice(&good).unwrap();
    value["chunks"].as_array_mut().unwrap().pop();
    let short = write_file(
        tmp.path(),
        "short.json",
        &serde_json::to_vec(&value).unwrap(),
    );
    let (_, stderr, success) = run_pks_qa(&["inspect", &short]);
    assert!(!success);
    assert!(stderr.contains("(count_mismatch)"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("missing.toml");
    let (_, stderr, success) = run_pks_qa(&["--config", missing.to_str().unwrap(), "ask", "hi"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_config_fails_before_loading() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("pks-qa.toml");
    fs::write(
        &config_path,
        "[source]\nkind = \"directory\"\nfolder_id = \"/tmp\"\n\n[retrieval]\ntop_k = 0\n",
    )
    .unwrap();

    let (stdout, stderr, success) =
        run_pks_qa(&["--config", config_path.to_str().unwrap(), "ask", "hi"]);
    assert!(!success);
    assert!(stderr.contains("top_k"), "stderr: {}", stderr);
    assert!(!stdout.contains("Loading index"));
}

#[test]
fn test_empty_folder_is_fatal() {
    let (_tmp, config_path) = setup_ask_env(false);
    let (stdout, stderr, success) =
        run_pks_qa(&["--config", config_path.to_str().unwrap(), "ask", "hi"]);
    assert!(!success);
    assert!(stdout.contains("Loading index..."));
    assert!(stderr.contains("no artifact found"), "stderr: {}", stderr);
}

#[test]
fn test_query_failure_is_reported_inline() {
    let (_tmp, config_path) = setup_ask_env(true);
    let (stdout, stderr, success) = run_pks_qa(&[
        "--config",
        config_path.to_str().unwrap(),
        "ask",
        "what is onboarding?",
    ]);
    assert!(success, "ask failed: {}", stderr);
    assert!(stdout.contains("Loading index..."));
    assert!(stdout.contains("Loaded index from: faiss_index.json"));
    assert!(stdout.contains("Error: failed to embed question"));
}
