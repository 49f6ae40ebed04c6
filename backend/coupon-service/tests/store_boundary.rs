//! All stock and participant mutations must go through the store module's
//! server-side scripts. Any other code path touching those keys directly
//! would reintroduce the check-then-act race the scripts exist to close.

use std::fs;
use std::path::{Path, PathBuf};

fn collect_rs_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        if let Ok(read_dir) = fs::read_dir(&dir) {
            for entry in read_dir.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().map(|e| e == "rs").unwrap_or(false) {
                    files.push(path);
                }
            }
        }
    }
    files
}

fn file_contains(path: &Path, needle: &str) -> bool {
    fs::read_to_string(path)
        .map(|c| c.contains(needle))
        .unwrap_or(false)
}

#[test]
fn decision_keys_are_only_touched_by_the_store_module() {
    let src_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src");

    // Redis commands that mutate the decision keys, and the key prefix
    // itself. Only the store module may mention either.
    let needles = ["SADD", "SREM", "SISMEMBER", "DECR", "coupon:{", "coupon:user:{"];

    let mut offenders = Vec::new();
    for file in collect_rs_files(&src_root) {
        let path_str = file.to_string_lossy().replace('\\', "/");
        if path_str.contains("/src/store/") {
            continue;
        }
        for needle in needles {
            if file_contains(&file, needle) {
                offenders.push(format!("{} (contains {:?})", path_str, needle));
            }
        }
    }

    if !offenders.is_empty() {
        panic!(
            "Decision-key access outside the store module. Offenders: {:?}",
            offenders
        );
    }
}
