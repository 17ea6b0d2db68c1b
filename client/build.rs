//! Build script for jsd-client
//!
//! Stamps the commit and build time into `jsd --version`.

use chrono::Utc;
use std::process::Command;

fn git_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?;
    Some(hash.trim().to_string()).filter(|h| !h.is_empty())
}

fn main() {
    let commit = git_commit().unwrap_or_else(|| "unknown".to_string());
    let built_at = Utc::now().to_rfc3339();

    println!("cargo:rustc-env=JSD_GIT_HASH={}", commit);
    println!("cargo:rustc-env=JSD_BUILD_TIME={}", built_at);
    println!("cargo:rerun-if-changed=../.git/HEAD");
}
