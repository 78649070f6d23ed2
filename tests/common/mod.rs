#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use filetime::{FileTime, set_file_mtime};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_repodex") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) {
        "repodex.exe"
    } else {
        "repodex"
    };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve repodex binary path for integration test"),
    }
}

/// Run the binary with cache and activity log redirected into `sandbox`.
///
/// Output is forced to JSON unless the args say otherwise, and the full
/// transcript is written to a per-case log file for post-mortem.
pub fn run_cli_case(case_name: &str, sandbox: &Path, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("repodex-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", sandbox)
        .env("REPODEX_CACHE_DIR", sandbox.join("cache"))
        .env("REPODEX_ACTIVITY_LOG", sandbox.join("activity.jsonl"))
        .env("REPODEX_OUTPUT_FORMAT", "json")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute repodex command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Parse the single JSON line a command printed.
pub fn json_output(result: &CmdResult) -> serde_json::Value {
    serde_json::from_str(result.stdout.trim()).unwrap_or_else(|e| {
        panic!(
            "stdout is not one JSON document ({e}); log: {}",
            result.log_path.display()
        )
    })
}

/// Create `<root>/<rel>/.git/HEAD` with a fixed mtime.
pub fn make_repo(root: &Path, rel: &str, head_secs: i64) -> PathBuf {
    let repo = root.join(rel);
    fs::create_dir_all(repo.join(".git")).expect("create .git");
    touch_head(&repo, head_secs);
    repo
}

pub fn touch_head(repo: &Path, head_secs: i64) {
    let head = repo.join(".git").join("HEAD");
    fs::write(&head, "ref: refs/heads/main\n").expect("write HEAD");
    set_file_mtime(&head, FileTime::from_unix_time(head_secs, 0)).expect("set HEAD mtime");
}
