//! End-to-end runs of the `ringcore` binary over script files.

use std::fs;
use std::path::Path;
use std::process::Command;

use serde_json::{Value, json};
use tempfile::tempdir;

fn run_script(dir: &Path, script: &str) -> Vec<Value> {
    let script_path = dir.join("script.txt");
    fs::write(&script_path, script).expect("write script");

    let output = Command::new(env!("CARGO_BIN_EXE_ringcore"))
        .arg(&script_path)
        .env("RINGCORE_CONFIG", dir.join("absent.toml"))
        .env("RUST_LOG", "off")
        .output()
        .expect("run ringcore");
    assert!(
        output.status.success(),
        "ringcore failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    String::from_utf8(output.stdout)
        .expect("utf8 stdout")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json reply"))
        .collect()
}

#[test]
fn script_walks_the_kernel_and_evaluates() {
    let dir = tempdir().expect("tempdir");
    let replies = run_script(
        dir.path(),
        "# square only materializes at 3, 5 and 7\n\
         invoke 3\n\
         eval square x=5\n\
         eval square x=5\n\
         invoke 2\n\
         eval square x=5\n\
         ascend\n\
         invoke 7\n\
         ascend\n\
         where\n",
    );

    assert_eq!(replies.len(), 9);
    assert_eq!(replies[0]["coordinate"], json!({"ring": 0, "rank": 3}));
    assert_eq!(replies[1]["result"]["value"], json!(25));
    assert_eq!(replies[1]["outcome"], "miss");
    assert_eq!(replies[2]["outcome"], "hit");
    assert_eq!(replies[4]["result"], json!({"kind": "empty"}));
    assert!(replies[5]["error"].is_string());
    assert_eq!(replies[7]["coordinate"], json!({"ring": 1, "rank": 1}));
    assert_eq!(replies[8]["coordinate"], json!({"ring": 1, "rank": 1}));
}

#[test]
fn script_reset_and_collapse_report_counts() {
    let dir = tempdir().expect("tempdir");
    let replies = run_script(
        dir.path(),
        "eval sum a=1 b=2\n\
         eval ring_index i=15\n\
         collapse 0\n\
         stats\n\
         bogus\n\
         reset\n",
    );

    assert_eq!(replies[0]["result"]["value"], 3.0);
    assert_eq!(replies[1]["result"]["value"], json!({"ring": 2, "rank": 2}));
    assert_eq!(replies[2], json!({"ring": 0, "removed": 2}));
    assert_eq!(replies[3]["entries"], 0);
    assert_eq!(replies[3]["misses"], 2);
    assert!(replies[4]["error"].as_str().unwrap().contains("bogus"));
    assert_eq!(replies[5]["coordinate"], json!({"ring": 0, "rank": 1}));
}
